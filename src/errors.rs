//! Error handling for the trust and integrity layer

/// Result type alias for the trust layer
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trust layer
///
/// The taxonomy mirrors how failures are surfaced to callers:
/// user-correctable input problems, authorization failures that redirect to
/// login, rate limiting that escalates to a challenge, double-vote conflicts,
/// audit integrity violations that require operator attention, and storage
/// failures split into retryable and fatal classes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed token, session handle, or request field; user corrects and retries
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// No valid session; caller should redirect to login
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Brute-force threshold tripped; caller must present a challenge
    #[error("Rate limited: challenge required")]
    RateLimited,

    /// Double-vote or duplicate-session attempt; informed, no retry
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Audit hash chain mismatch; operator alert, never auto-corrected
    #[error("Integrity violation: {message}")]
    IntegrityViolation { message: String },

    /// Retryable storage failure (lock poisoning, transient contention)
    #[error("Transient storage failure: {message}")]
    TransientStorage { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration or connectivity failure; surfaced as a generic error page
    #[error("Fatal error: {message}")]
    Fatal { message: String },
}

impl Error {
    /// Create a new invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new integrity-violation error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Create a new transient storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::TransientStorage {
            message: message.into(),
        }
    }

    /// Create a new fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage { .. })
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! integrity_error {
    ($msg:expr) => {
        $crate::Error::integrity($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::integrity(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! conflict_error {
    ($msg:expr) => {
        $crate::Error::conflict($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::conflict(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let input_err = Error::invalid_input("bad token format");
        assert!(matches!(input_err, Error::InvalidInput { .. }));

        let auth_err = Error::unauthorized("no session");
        assert!(matches!(auth_err, Error::Unauthorized { .. }));

        let conflict_err = Error::conflict("already voted");
        assert!(matches!(conflict_err, Error::Conflict { .. }));

        let integrity_err = Error::integrity("chain broken at 7");
        assert!(matches!(integrity_err, Error::IntegrityViolation { .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::storage("lock poisoned").is_retryable());
        assert!(!Error::fatal("missing chain key").is_retryable());
        assert!(!Error::conflict("already voted").is_retryable());
    }

    #[test]
    fn test_error_macros() {
        let storage_err = storage_error!("lock error on {}", "sessions");
        assert!(matches!(storage_err, Error::TransientStorage { .. }));

        let integrity_err = integrity_error!("hash mismatch");
        assert!(matches!(integrity_err, Error::IntegrityViolation { .. }));

        let conflict_err = conflict_error!("duplicate");
        assert!(matches!(conflict_err, Error::Conflict { .. }));
    }
}
