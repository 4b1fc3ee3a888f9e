//! Configuration for the trust and integrity layer
//!
//! Loads sensitive configuration from environment variables with validation.
//! Timeouts and thresholds live here as one explicit struct passed into each
//! component constructor, never as ambient globals or inline literals.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout in seconds: session expires this long after last activity
    pub idle_timeout_seconds: u64,

    /// Absolute timeout in seconds: session expires this long after creation
    /// regardless of activity
    pub absolute_timeout_seconds: u64,

    /// How long revoked/expired session tombstones are retained so validation
    /// can distinguish Revoked from NotFound
    pub tombstone_retention_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 1800,     // 30 minutes
            absolute_timeout_seconds: 28800, // 8 hours
            tombstone_retention_seconds: 3600,
        }
    }
}

/// CSRF token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Token lifetime in seconds
    pub token_ttl_seconds: u64,

    /// Mint a replacement token atomically when one is consumed
    /// (multi-tab form support)
    pub rotate_on_validate: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 900, // 15 minutes
            rotate_on_validate: true,
        }
    }
}

/// Brute-force gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceConfig {
    /// Failures within the window that trigger a challenge
    pub failure_threshold: u32,

    /// Sliding window duration in seconds
    pub window_seconds: u64,

    /// Challenge lifetime in seconds
    pub challenge_ttl_seconds: u64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_seconds: 300, // 5 minutes
            challenge_ttl_seconds: 120,
        }
    }
}

/// Audit ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Keyed-hash secret for the audit chain (base64 encoded, minimum 32 bytes)
    pub chain_key: String,
}

/// Security event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Maximum events retained in the in-memory ring
    pub max_recent_events: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_recent_events: 10000,
        }
    }
}

/// Complete trust-layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub session: SessionConfig,
    pub csrf: CsrfConfig,
    pub brute_force: BruteForceConfig,
    pub ledger: LedgerConfig,
    pub event_log: EventLogConfig,

    /// Interval between background cleanup sweeps in seconds
    pub cleanup_interval_seconds: u64,
}

impl TrustConfig {
    /// Load configuration from environment variables
    ///
    /// **CRITICAL**: `CASTGUARD_CHAIN_KEY` must be set in production
    /// (minimum 32 bytes, base64 encoded).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let chain_key = std::env::var("CASTGUARD_CHAIN_KEY")
            .map_err(|_| Error::fatal("CASTGUARD_CHAIN_KEY environment variable required"))?;
        Self::validate_key(&chain_key, "CASTGUARD_CHAIN_KEY")?;

        let session = SessionConfig {
            idle_timeout_seconds: env_u64("CASTGUARD_SESSION_IDLE_SECONDS", 1800)?,
            absolute_timeout_seconds: env_u64("CASTGUARD_SESSION_ABSOLUTE_SECONDS", 28800)?,
            tombstone_retention_seconds: env_u64("CASTGUARD_SESSION_TOMBSTONE_SECONDS", 3600)?,
        };

        let csrf = CsrfConfig {
            token_ttl_seconds: env_u64("CASTGUARD_CSRF_TTL_SECONDS", 900)?,
            rotate_on_validate: std::env::var("CASTGUARD_CSRF_ROTATE")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        };

        let brute_force = BruteForceConfig {
            failure_threshold: env_u64("CASTGUARD_FAILURE_THRESHOLD", 3)? as u32,
            window_seconds: env_u64("CASTGUARD_FAILURE_WINDOW_SECONDS", 300)?,
            challenge_ttl_seconds: env_u64("CASTGUARD_CHALLENGE_TTL_SECONDS", 120)?,
        };

        let event_log = EventLogConfig {
            max_recent_events: env_u64("CASTGUARD_MAX_RECENT_EVENTS", 10000)? as usize,
        };

        Ok(Self {
            session,
            csrf,
            brute_force,
            ledger: LedgerConfig { chain_key },
            event_log,
            cleanup_interval_seconds: env_u64("CASTGUARD_CLEANUP_INTERVAL_SECONDS", 300)?,
        })
    }

    /// Create configuration for testing with short timeouts and a random key
    pub fn for_testing() -> Self {
        use base64::Engine;
        let chain_key =
            base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 32]>());

        Self {
            session: SessionConfig {
                idle_timeout_seconds: 300,
                absolute_timeout_seconds: 600,
                tombstone_retention_seconds: 60,
            },
            csrf: CsrfConfig {
                token_ttl_seconds: 120,
                rotate_on_validate: true,
            },
            brute_force: BruteForceConfig {
                failure_threshold: 3,
                window_seconds: 300,
                challenge_ttl_seconds: 60,
            },
            ledger: LedgerConfig { chain_key },
            event_log: EventLogConfig {
                max_recent_events: 1000,
            },
            cleanup_interval_seconds: 1,
        }
    }

    /// Validate a base64-encoded key
    fn validate_key(key: &str, name: &str) -> Result<()> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .map_err(|_| Error::fatal(format!("{name} must be valid base64")))?;

        if decoded.len() < 32 {
            return Err(Error::fatal(format!(
                "{name} must be at least 32 bytes when decoded"
            )));
        }

        Ok(())
    }

    /// Get the chain key as a fixed 32-byte array for keyed hashing
    pub fn chain_key_bytes(&self) -> Result<[u8; 32]> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.ledger.chain_key)
            .map_err(|_| Error::fatal("Invalid chain key"))?;

        if decoded.len() < 32 {
            return Err(Error::fatal("Chain key must be at least 32 bytes"));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded[..32]);
        Ok(key)
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::fatal(format!("Invalid {name}"))),
        Err(_) => Ok(default),
    }
}
