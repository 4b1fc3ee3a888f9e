//! CSRF token issue and single-use validation
//!
//! Tokens are opaque 256-bit random values bound to the session identifier
//! that received them. Validation compares in constant time and sets the
//! consumed flag as an atomic compare-and-set under the store's write lock,
//! so two requests racing to spend the same single-use token can never both
//! observe success. Deployments that render multi-tab forms can opt into
//! rotation-on-validate: a replacement token is minted atomically before
//! the old one is invalidated.
//!
//! Token ownership is keyed by session id as a weak reference: destroying a
//! session cascades token invalidation, never the reverse.

use crate::config::CsrfConfig;
use crate::security::event_log::{EventCategory, SecurityEventLog, Severity};
use crate::security::{CryptoUtils, TokenGenerator};
use crate::{Result, storage_error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A single-use request token bound to one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfToken {
    pub token: String,
    pub session_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub consumed: bool,
}

impl CsrfToken {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Result of validating a supplied CSRF token
#[derive(Debug, Clone, PartialEq)]
pub enum CsrfValidation {
    /// Token matched and is now consumed; `rotated` carries the replacement
    /// when rotation-on-validate is configured
    Ok { rotated: Option<String> },
    /// Token unknown or bound to a different session
    Mismatch,
    /// Token aged past its TTL
    Expired,
    /// Token was already spent; a double-submit race lost
    AlreadyConsumed,
}

/// Issues and validates one-time request tokens scoped to a session
pub struct CsrfGuard {
    config: CsrfConfig,
    /// Main storage: token value -> CsrfToken
    tokens: RwLock<HashMap<String, CsrfToken>>,
    /// Session index: session_id -> token values, for cascade invalidation
    by_session: RwLock<HashMap<String, Vec<String>>>,
    events: Arc<SecurityEventLog>,
}

impl CsrfGuard {
    /// Create a new CSRF guard
    pub fn new(config: CsrfConfig, events: Arc<SecurityEventLog>) -> Self {
        Self {
            config,
            tokens: RwLock::new(HashMap::new()),
            by_session: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create for testing with a private event log
    pub fn for_testing() -> Self {
        let config = crate::TrustConfig::for_testing();
        Self::new(
            config.csrf,
            Arc::new(SecurityEventLog::new(config.event_log)),
        )
    }

    /// Mint a token bound to the session's current identifier
    ///
    /// One token per rendered form; a session may hold several live tokens
    /// at once (multiple open tabs).
    pub fn issue(&self, session_id: &str) -> Result<String> {
        let value = TokenGenerator::new().generate_opaque();

        let now = CryptoUtils::now();
        let token = CsrfToken {
            token: value.clone(),
            session_id: session_id.to_string(),
            issued_at: now,
            expires_at: now + self.config.token_ttl_seconds,
            consumed: false,
        };

        {
            let mut tokens = self
                .tokens
                .write()
                .map_err(|_| storage_error!("CSRF store write error"))?;
            let mut by_session = self
                .by_session
                .write()
                .map_err(|_| storage_error!("CSRF index write error"))?;

            tokens.insert(value.clone(), token);
            by_session
                .entry(session_id.to_string())
                .or_default()
                .push(value.clone());
        }

        tracing::debug!(
            "🎟️ CSRF token issued: session={}, token={}",
            SecurityEventLog::redact(session_id),
            &value[..8]
        );

        Ok(value)
    }

    /// Validate a supplied token against a session and mark it consumed
    ///
    /// The whole check-and-consume runs under the write lock: the consumed
    /// flag is a compare-and-set, and the rotated replacement (when
    /// configured) is inserted before the lock is released.
    pub fn validate(&self, session_id: &str, supplied: &str) -> Result<CsrfValidation> {
        let now = CryptoUtils::now();

        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| storage_error!("CSRF store write error"))?;

        // Find the stored token by constant-time comparison over the
        // session's candidates rather than by direct map lookup, so the
        // comparison itself leaks nothing about stored values.
        let stored_value = {
            let by_session = self
                .by_session
                .read()
                .map_err(|_| storage_error!("CSRF index read error"))?;

            by_session.get(session_id).and_then(|candidates| {
                candidates
                    .iter()
                    .find(|candidate| {
                        CryptoUtils::constant_time_eq(candidate.as_bytes(), supplied.as_bytes())
                    })
                    .cloned()
            })
        };

        let Some(stored_value) = stored_value else {
            self.log_rejection(session_id, "csrf token mismatch");
            return Ok(CsrfValidation::Mismatch);
        };

        let Some(token) = tokens.get_mut(&stored_value) else {
            self.log_rejection(session_id, "csrf token mismatch");
            return Ok(CsrfValidation::Mismatch);
        };

        if token.is_expired(now) {
            self.log_rejection(session_id, "csrf token expired");
            return Ok(CsrfValidation::Expired);
        }

        // Atomic compare-and-set on the consumed flag
        if token.consumed {
            self.log_rejection(session_id, "csrf token replayed");
            return Ok(CsrfValidation::AlreadyConsumed);
        }
        token.consumed = true;

        let rotated = if self.config.rotate_on_validate {
            let replacement = TokenGenerator::new().generate_opaque();

            tokens.insert(
                replacement.clone(),
                CsrfToken {
                    token: replacement.clone(),
                    session_id: session_id.to_string(),
                    issued_at: now,
                    expires_at: now + self.config.token_ttl_seconds,
                    consumed: false,
                },
            );

            let mut by_session = self
                .by_session
                .write()
                .map_err(|_| storage_error!("CSRF index write error"))?;
            by_session
                .entry(session_id.to_string())
                .or_default()
                .push(replacement.clone());

            Some(replacement)
        } else {
            None
        };

        Ok(CsrfValidation::Ok { rotated })
    }

    /// Whether a request method may carry state-changing intent
    ///
    /// The transport adapter calls this before any token processing:
    /// a GET (or anything else) against a state-changing endpoint is
    /// rejected outright, leaking nothing about the resource.
    pub fn method_allowed(method: &str) -> bool {
        method.eq_ignore_ascii_case("POST")
    }

    /// Invalidate every token bound to a session (cascade from destruction)
    pub fn invalidate_session(&self, session_id: &str) -> Result<u32> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| storage_error!("CSRF store write error"))?;
        let mut by_session = self
            .by_session
            .write()
            .map_err(|_| storage_error!("CSRF index write error"))?;

        let mut removed = 0;
        if let Some(values) = by_session.remove(session_id) {
            for value in values {
                if tokens.remove(&value).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(
                "🎟️ CSRF tokens invalidated: session={}, count={}",
                SecurityEventLog::redact(session_id),
                removed
            );
        }

        Ok(removed)
    }

    /// Sweep expired and consumed tokens
    pub fn cleanup_expired(&self) -> Result<u32> {
        let now = CryptoUtils::now();

        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| storage_error!("CSRF store write error"))?;
        let mut by_session = self
            .by_session
            .write()
            .map_err(|_| storage_error!("CSRF index write error"))?;

        let initial = tokens.len();
        tokens.retain(|_, token| !token.consumed && !token.is_expired(now));

        by_session.retain(|_, values| {
            values.retain(|value| tokens.contains_key(value));
            !values.is_empty()
        });

        Ok((initial - tokens.len()) as u32)
    }

    fn log_rejection(&self, session_id: &str, message: &str) {
        self.events.log(
            EventCategory::Anomaly,
            Severity::Medium,
            message,
            &[("session", &SecurityEventLog::redact(session_id))],
        );
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, token_value: &str) {
        let mut tokens = self.tokens.write().unwrap();
        if let Some(token) = tokens.get_mut(token_value) {
            token.expires_at = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_without_rotation() -> CsrfGuard {
        let config = crate::TrustConfig::for_testing();
        CsrfGuard::new(
            CsrfConfig {
                token_ttl_seconds: 120,
                rotate_on_validate: false,
            },
            Arc::new(SecurityEventLog::new(config.event_log)),
        )
    }

    #[test]
    fn test_issue_and_validate() {
        let guard = guard_without_rotation();

        let token = guard.issue("session_a").unwrap();
        assert_eq!(token.len(), 64);

        match guard.validate("session_a", &token).unwrap() {
            CsrfValidation::Ok { rotated } => assert!(rotated.is_none()),
            other => panic!("Expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn test_single_use_enforced() {
        let guard = guard_without_rotation();

        let token = guard.issue("session_a").unwrap();
        assert!(matches!(
            guard.validate("session_a", &token).unwrap(),
            CsrfValidation::Ok { .. }
        ));

        // Second validation with the same token must never be Ok
        assert_eq!(
            guard.validate("session_a", &token).unwrap(),
            CsrfValidation::AlreadyConsumed
        );
    }

    #[test]
    fn test_wrong_session_is_mismatch() {
        let guard = guard_without_rotation();

        let token = guard.issue("session_a").unwrap();
        assert_eq!(
            guard.validate("session_b", &token).unwrap(),
            CsrfValidation::Mismatch
        );

        // The failed attempt did not consume it for the right session
        assert!(matches!(
            guard.validate("session_a", &token).unwrap(),
            CsrfValidation::Ok { .. }
        ));
    }

    #[test]
    fn test_unknown_token_is_mismatch() {
        let guard = guard_without_rotation();
        guard.issue("session_a").unwrap();

        assert_eq!(
            guard.validate("session_a", "0000000000").unwrap(),
            CsrfValidation::Mismatch
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let guard = guard_without_rotation();

        let token = guard.issue("session_a").unwrap();
        guard.force_expire(&token);

        assert_eq!(
            guard.validate("session_a", &token).unwrap(),
            CsrfValidation::Expired
        );
    }

    #[test]
    fn test_rotation_on_validate() {
        let guard = CsrfGuard::for_testing(); // rotation enabled

        let token = guard.issue("session_a").unwrap();
        let rotated = match guard.validate("session_a", &token).unwrap() {
            CsrfValidation::Ok { rotated } => rotated.expect("rotation configured"),
            other => panic!("Expected Ok, got {other:?}"),
        };

        assert_ne!(token, rotated);

        // Old token is spent; the rotated one works exactly once
        assert_eq!(
            guard.validate("session_a", &token).unwrap(),
            CsrfValidation::AlreadyConsumed
        );
        assert!(matches!(
            guard.validate("session_a", &rotated).unwrap(),
            CsrfValidation::Ok { .. }
        ));
    }

    #[test]
    fn test_session_cascade_invalidation() {
        let guard = guard_without_rotation();

        let t1 = guard.issue("session_a").unwrap();
        let t2 = guard.issue("session_a").unwrap();
        let other = guard.issue("session_b").unwrap();

        assert_eq!(guard.invalidate_session("session_a").unwrap(), 2);

        assert_eq!(
            guard.validate("session_a", &t1).unwrap(),
            CsrfValidation::Mismatch
        );
        assert_eq!(
            guard.validate("session_a", &t2).unwrap(),
            CsrfValidation::Mismatch
        );

        // Unrelated session untouched
        assert!(matches!(
            guard.validate("session_b", &other).unwrap(),
            CsrfValidation::Ok { .. }
        ));
    }

    #[test]
    fn test_method_filtering() {
        assert!(CsrfGuard::method_allowed("POST"));
        assert!(CsrfGuard::method_allowed("post"));
        assert!(!CsrfGuard::method_allowed("GET"));
        assert!(!CsrfGuard::method_allowed("PUT"));
        assert!(!CsrfGuard::method_allowed(""));
    }

    #[test]
    fn test_double_submit_race() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let guard = Arc::new(guard_without_rotation());
        let token = guard.issue("session_a").unwrap();
        let successes = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let token = token.clone();
                let successes = Arc::clone(&successes);
                std::thread::spawn(move || {
                    if let Ok(CsrfValidation::Ok { .. }) = guard.validate("session_a", &token) {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one racer may observe success
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_sweeps_consumed_and_expired() {
        let guard = guard_without_rotation();

        let spent = guard.issue("session_a").unwrap();
        let stale = guard.issue("session_a").unwrap();
        let _live = guard.issue("session_a").unwrap();

        guard.validate("session_a", &spent).unwrap();
        guard.force_expire(&stale);

        assert_eq!(guard.cleanup_expired().unwrap(), 2);
    }
}
