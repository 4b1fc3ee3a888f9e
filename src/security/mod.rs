//! Security components of the trust layer

pub mod brute_force;
pub mod cleanup;
pub mod csrf;
pub mod event_log;
pub mod ledger;
pub mod session;
pub mod trust;

use rand::RngCore;

// Re-export session types
pub use session::{
    Session, SessionHandle, SessionState, SessionStats, SessionStore, SessionValidation,
};

// Re-export CSRF guard types
pub use csrf::{CsrfGuard, CsrfToken, CsrfValidation};

// Re-export brute-force gate types
pub use brute_force::{
    BruteForceGate, Challenge, ChallengeKind, ChallengePayload, FailureKey, GateStats,
};

// Re-export audit ledger types
pub use ledger::{
    AuditEntry, AuditLedger, AuditTrailReport, IntegrityReport, IntegrityViolation,
    IntegrityViolationKind, LedgerStats, ReconciliationFinding, ReconciliationReport,
    ReconciliationSnapshot, VoteCategory,
};

// Re-export security event log types
pub use event_log::{EventCategory, SecurityEventLog, SecurityEventRecord, Severity};

// Re-export the coordinator
pub use trust::{ChallengeResponse, LoginOutcome, TrustLayer, VoteOutcome};

// Re-export the background sweeper
pub use cleanup::{CleanupService, CleanupStats};

/// A Blake3 digest (32 bytes)
pub type Hash = [u8; 32];

/// Secure random token generator for session identifiers and CSRF values
pub struct TokenGenerator {
    rng: rand::rngs::ThreadRng,
}

impl TokenGenerator {
    /// Create a new token generator
    pub fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Generate an opaque 256-bit token rendered as lowercase hex
    pub fn generate_opaque(&mut self) -> String {
        let mut token = [0u8; 32];
        self.rng.fill_bytes(&mut token);
        hex::encode(token)
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cryptographic utilities shared across components
pub struct CryptoUtils;

impl CryptoUtils {
    /// Hash arbitrary data with Blake3
    pub fn hash(data: &[u8]) -> Hash {
        blake3::hash(data).into()
    }

    /// Keyed Blake3 hash for the audit chain
    pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> Hash {
        blake3::keyed_hash(key, data).into()
    }

    /// Verify that two byte slices are equal in constant time
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    /// Current unix timestamp in seconds
    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Render a unix timestamp in ISO-8601 for operator reports
    pub fn timestamp_iso(timestamp: u64) -> String {
        use chrono::{TimeZone, Utc};
        match Utc.timestamp_opt(timestamp as i64, 0) {
            chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            _ => format!("invalid({timestamp})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generator() {
        let mut generator = TokenGenerator::new();

        let token1 = generator.generate_opaque();
        let token2 = generator.generate_opaque();

        // 256 bits of entropy as 64 hex chars
        assert_eq!(token1.len(), 64);
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_crypto_utils() {
        let data = b"vote payload";
        let hash = CryptoUtils::hash(data);
        let hash2 = CryptoUtils::hash(data);
        assert_eq!(hash, hash2);
        assert!(CryptoUtils::constant_time_eq(&hash, &hash2));

        let other = CryptoUtils::hash(b"different payload");
        assert!(!CryptoUtils::constant_time_eq(&hash, &other));
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let data = b"entry fields";
        let h1 = CryptoUtils::keyed_hash(&[1u8; 32], data);
        let h2 = CryptoUtils::keyed_hash(&[2u8; 32], data);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_timestamp_iso() {
        let rendered = CryptoUtils::timestamp_iso(0);
        assert_eq!(rendered, "1970-01-01T00:00:00Z");
    }
}
