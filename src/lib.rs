//! Trust & Integrity Layer for a Ballot-Casting Web Application
//!
//! This crate owns the security-critical subsystems of the surrounding
//! voting application: authenticated session lifecycle, CSRF protection,
//! brute-force throttling with challenge escalation, and a tamper-evident
//! hash-chained audit ledger reconciled against live tally counters.
//! Page rendering, relational CRUD, and transport concerns are external
//! collaborators.

pub mod config;
pub mod errors;
pub mod security;

// Re-export commonly used types
pub use config::TrustConfig;
pub use errors::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the trust layer with proper logging
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castguard=info".into()),
        )
        .init();

    tracing::info!("🛡️  Trust layer v{} initialized", VERSION);
    Ok(())
}
