//! Authenticated session lifecycle with fixation-safe regeneration
//!
//! Session identifiers are opaque 256-bit random values. Every privilege
//! transition (login, logout, explicit regeneration) issues a fresh
//! identifier so a pre-set identifier can never survive into an
//! authenticated session. Revoked and expired records are kept as
//! tombstones for a bounded retention period so validation can tell a
//! revoked handle apart from one that never existed.

use crate::config::SessionConfig;
use crate::security::event_log::{EventCategory, SecurityEventLog, Severity};
use crate::security::{CryptoUtils, TokenGenerator};
use crate::{Result, conflict_error, storage_error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lifecycle state of a session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Live and usable as a credential
    Active,
    /// Destroyed by logout or superseded by regeneration
    Revoked { revoked_at: u64 },
    /// Idle or absolute timeout exceeded
    Expired { expired_at: u64 },
}

/// A live session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub principal: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub absolute_expiry: u64,
    pub regeneration_count: u32,
    pub state: SessionState,
}

impl Session {
    fn new(session_id: String, principal: String, absolute_timeout_seconds: u64) -> Self {
        let now = CryptoUtils::now();
        Self {
            session_id,
            principal,
            created_at: now,
            last_activity: now,
            absolute_expiry: now + absolute_timeout_seconds,
            regeneration_count: 0,
            state: SessionState::Active,
        }
    }

    /// Whether this record has outlived its idle or absolute timeout
    fn is_timed_out(&self, idle_timeout_seconds: u64, now: u64) -> bool {
        now > self.absolute_expiry || now.saturating_sub(self.last_activity) > idle_timeout_seconds
    }
}

/// Opaque session credential handed to the transport layer as a cookie value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    session_id: String,
    cookie_max_age: u64,
}

impl SessionHandle {
    /// The opaque identifier; treat as a secret
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Cookie attributes the transport layer must attach to this credential
    pub fn cookie_attributes(&self) -> String {
        format!(
            "HttpOnly; Secure; SameSite=Strict; Max-Age={}",
            self.cookie_max_age
        )
    }
}

/// Result of validating a session handle
///
/// These are outcomes, not errors: an expired or unknown handle is a normal
/// consequence of adversarial or stale input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValidation {
    /// Handle is live; bound principal returned, idle clock refreshed
    Valid { principal: String },
    /// Idle or absolute timeout exceeded
    Expired,
    /// Handle was never issued (or its tombstone aged out)
    NotFound,
    /// Handle was destroyed or superseded by regeneration
    Revoked,
}

/// Operational counts for the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_records: usize,
    pub active_sessions: usize,
    pub revoked_tombstones: usize,
    pub expired_tombstones: usize,
}

/// Owner of the authenticated-session lifecycle
///
/// Lock order when both maps are held: `sessions` first, then
/// `by_principal`.
pub struct SessionStore {
    config: SessionConfig,
    /// Main storage: session_id -> Session (including tombstones)
    sessions: RwLock<HashMap<String, Session>>,
    /// Index of the single live session per principal
    by_principal: RwLock<HashMap<String, String>>,
    events: Arc<SecurityEventLog>,
}

impl SessionStore {
    /// Create a new session store
    pub fn new(config: SessionConfig, events: Arc<SecurityEventLog>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            by_principal: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create for testing with short timeouts and a private event log
    pub fn for_testing() -> Self {
        let config = crate::TrustConfig::for_testing();
        Self::new(
            config.session,
            Arc::new(SecurityEventLog::new(config.event_log)),
        )
    }

    fn fresh_id(&self) -> String {
        TokenGenerator::new().generate_opaque()
    }

    /// Start a session for a freshly authenticated principal
    ///
    /// Fails with `Conflict` if the principal already has a live session;
    /// use [`SessionStore::start_regenerated`] on the login path, which
    /// supersedes any prior identifier (anti-fixation).
    pub fn start(&self, principal: &str) -> Result<SessionHandle> {
        let now = CryptoUtils::now();
        {
            // Lock order: sessions before by_principal, same as insert_fresh
            let sessions = self
                .sessions
                .read()
                .map_err(|_| storage_error!("Session store read error"))?;
            let by_principal = self
                .by_principal
                .read()
                .map_err(|_| storage_error!("Session index read error"))?;

            if let Some(existing_id) = by_principal.get(principal) {
                if let Some(existing) = sessions.get(existing_id) {
                    if existing.state == SessionState::Active
                        && !existing.is_timed_out(self.config.idle_timeout_seconds, now)
                    {
                        return Err(conflict_error!(
                            "Session already active for this principal"
                        ));
                    }
                }
            }
        }

        self.insert_fresh(principal, 0)
    }

    /// Start a session, revoking any prior identifier for the principal
    ///
    /// This is the login-time entry point: a fresh identifier is always
    /// issued even if a session already existed, closing the
    /// session-fixation attack surface.
    pub fn start_regenerated(&self, principal: &str) -> Result<SessionHandle> {
        let prior = {
            let by_principal = self
                .by_principal
                .read()
                .map_err(|_| storage_error!("Session index read error"))?;
            by_principal.get(principal).cloned()
        };

        if let Some(prior_id) = prior {
            self.revoke_id(&prior_id)?;
        }

        self.insert_fresh(principal, 0)
    }

    fn insert_fresh(&self, principal: &str, regeneration_count: u32) -> Result<SessionHandle> {
        let session_id = self.fresh_id();
        let mut session = Session::new(
            session_id.clone(),
            principal.to_string(),
            self.config.absolute_timeout_seconds,
        );
        session.regeneration_count = regeneration_count;

        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| storage_error!("Session store write error"))?;
            let mut by_principal = self
                .by_principal
                .write()
                .map_err(|_| storage_error!("Session index write error"))?;

            // A still-indexed live session for this principal is superseded
            // here, under both locks, so two racing inserts cannot leave two
            // live sessions behind
            if let Some(old_id) = by_principal.get(principal) {
                if let Some(old) = sessions.get_mut(old_id) {
                    if old.state == SessionState::Active {
                        old.state = SessionState::Revoked {
                            revoked_at: CryptoUtils::now(),
                        };
                    }
                }
            }

            sessions.insert(session_id.clone(), session);
            by_principal.insert(principal.to_string(), session_id.clone());
        }

        self.events.log(
            EventCategory::Authentication,
            Severity::Info,
            "session started",
            &[
                ("principal", principal),
                ("session", &SecurityEventLog::redact(&session_id)),
            ],
        );

        tracing::info!(
            "🔑 Session started: principal={}, session={}",
            principal,
            &session_id[..8]
        );

        Ok(SessionHandle {
            session_id,
            cookie_max_age: self.config.idle_timeout_seconds,
        })
    }

    /// Validate a handle, refreshing the idle-activity clock on success
    pub fn validate(&self, handle: &SessionHandle) -> Result<SessionValidation> {
        let now = CryptoUtils::now();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| storage_error!("Session store write error"))?;

        let Some(session) = sessions.get_mut(handle.id()) else {
            return Ok(SessionValidation::NotFound);
        };

        match session.state {
            SessionState::Revoked { .. } => return Ok(SessionValidation::Revoked),
            SessionState::Expired { .. } => return Ok(SessionValidation::Expired),
            SessionState::Active => {}
        }

        if session.is_timed_out(self.config.idle_timeout_seconds, now) {
            session.state = SessionState::Expired { expired_at: now };
            let principal = session.principal.clone();
            drop(sessions);
            self.clear_index_entry(&principal, handle.id())?;
            return Ok(SessionValidation::Expired);
        }

        session.last_activity = now;
        Ok(SessionValidation::Valid {
            principal: session.principal.clone(),
        })
    }

    /// Destroy a session; idempotent, never errors on an absent handle
    pub fn destroy(&self, handle: &SessionHandle) -> Result<bool> {
        let destroyed = self.revoke_id(handle.id())?;
        if destroyed {
            self.events.log(
                EventCategory::Authentication,
                Severity::Info,
                "session destroyed",
                &[("session", &SecurityEventLog::redact(handle.id()))],
            );
        }
        Ok(destroyed)
    }

    /// Issue a fresh identifier for an already-valid session
    ///
    /// The old identifier becomes `Revoked`; the regeneration counter
    /// carries over incremented.
    pub fn regenerate(&self, handle: &SessionHandle) -> Result<SessionHandle> {
        let (principal, regeneration_count) = {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| storage_error!("Session store read error"))?;

            let session = sessions
                .get(handle.id())
                .filter(|s| s.state == SessionState::Active)
                .ok_or_else(|| {
                    crate::Error::unauthorized("Cannot regenerate an invalid session")
                })?;

            (session.principal.clone(), session.regeneration_count + 1)
        };

        self.revoke_id(handle.id())?;
        self.insert_fresh(&principal, regeneration_count)
    }

    fn revoke_id(&self, session_id: &str) -> Result<bool> {
        let now = CryptoUtils::now();
        let principal = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| storage_error!("Session store write error"))?;

            match sessions.get_mut(session_id) {
                Some(session) if session.state == SessionState::Active => {
                    session.state = SessionState::Revoked { revoked_at: now };
                    Some(session.principal.clone())
                }
                _ => None,
            }
        };

        if let Some(principal) = &principal {
            self.clear_index_entry(principal, session_id)?;
        }
        Ok(principal.is_some())
    }

    fn clear_index_entry(&self, principal: &str, session_id: &str) -> Result<()> {
        let mut by_principal = self
            .by_principal
            .write()
            .map_err(|_| storage_error!("Session index write error"))?;

        if by_principal.get(principal).map(String::as_str) == Some(session_id) {
            by_principal.remove(principal);
        }
        Ok(())
    }

    /// Sweep timed-out sessions and aged-out tombstones
    pub fn cleanup_expired(&self) -> Result<u32> {
        let now = CryptoUtils::now();
        let idle = self.config.idle_timeout_seconds;
        let retention = self.config.tombstone_retention_seconds;

        let mut stale_indexed: Vec<(String, String)> = Vec::new();
        let removed = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| storage_error!("Session store write error"))?;

            // Mark timed-out actives first so they leave a tombstone
            for session in sessions.values_mut() {
                if session.state == SessionState::Active && session.is_timed_out(idle, now) {
                    session.state = SessionState::Expired { expired_at: now };
                    stale_indexed.push((session.principal.clone(), session.session_id.clone()));
                }
            }

            let initial = sessions.len();
            sessions.retain(|_, session| match session.state {
                SessionState::Active => true,
                SessionState::Revoked { revoked_at } => now.saturating_sub(revoked_at) < retention,
                SessionState::Expired { expired_at } => now.saturating_sub(expired_at) < retention,
            });
            (initial - sessions.len()) as u32
        };

        for (principal, session_id) in stale_indexed {
            self.clear_index_entry(&principal, &session_id)?;
        }

        Ok(removed)
    }

    /// Get operational statistics
    pub fn session_stats(&self) -> Result<SessionStats> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| storage_error!("Session store read error"))?;

        let mut stats = SessionStats {
            total_records: sessions.len(),
            active_sessions: 0,
            revoked_tombstones: 0,
            expired_tombstones: 0,
        };

        for session in sessions.values() {
            match session.state {
                SessionState::Active => stats.active_sessions += 1,
                SessionState::Revoked { .. } => stats.revoked_tombstones += 1,
                SessionState::Expired { .. } => stats.expired_tombstones += 1,
            }
        }

        Ok(stats)
    }

    /// Rebuild a handle from a raw cookie value supplied by the transport layer
    pub fn handle_from_cookie(&self, cookie_value: &str) -> SessionHandle {
        SessionHandle {
            session_id: cookie_value.to_string(),
            cookie_max_age: self.config.idle_timeout_seconds,
        }
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, handle: &SessionHandle) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.get_mut(handle.id()) {
            session.last_activity = 0;
            session.absolute_expiry = 0;
        }
    }
}
