//! Coordinator wiring the trust components into the request control flow
//!
//! An inbound login attempt passes through the brute-force gate before
//! credentials are considered; a state-changing vote submission passes
//! through session validation, then CSRF validation, and only then reaches
//! the ledger transaction. User-facing outcomes are deliberately generic:
//! a denied login does not reveal whether the principal exists, and a
//! rejected vote does not reveal why the token failed.

use crate::config::TrustConfig;
use crate::security::brute_force::{BruteForceGate, ChallengePayload};
use crate::security::csrf::{CsrfGuard, CsrfValidation};
use crate::security::event_log::{EventCategory, SecurityEventLog, Severity};
use crate::security::ledger::{
    AuditLedger, AuditTrailReport, IntegrityReport, ReconciliationReport, VoteCategory,
};
use crate::security::session::{SessionHandle, SessionStore, SessionValidation};
use crate::{Result, storage_error};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Outcome of a login attempt
///
/// `Denied` carries no detail by design: nothing here distinguishes an
/// unknown principal from a wrong password.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Authenticated; fresh fixation-safe session and a first CSRF token
    Success {
        handle: SessionHandle,
        csrf_token: String,
    },
    /// Threshold crossed; the client must answer this challenge and retry
    ChallengeRequired(ChallengePayload),
    /// Authentication failed
    Denied,
}

/// Outcome of a vote submission
#[derive(Debug)]
pub enum VoteOutcome {
    /// Vote recorded; `rotated_csrf` replaces the consumed token when
    /// rotation is configured
    Accepted {
        audit_id: u64,
        rotated_csrf: Option<String>,
    },
    /// This voter already cast a ballot; no state changed
    AlreadyVoted,
    /// Session or CSRF validation failed; no state changed
    Rejected,
}

/// An answered challenge accompanying a login retry
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    pub challenge_id: Uuid,
    pub answer: String,
}

/// The trust and integrity layer, composed
pub struct TrustLayer {
    sessions: Arc<SessionStore>,
    csrf: Arc<CsrfGuard>,
    gate: Arc<BruteForceGate>,
    ledger: Arc<AuditLedger>,
    events: Arc<SecurityEventLog>,
    cleanup_interval_seconds: u64,
    /// Integrity violations requiring operator attention, beyond the log line
    operator_alerts: Mutex<Vec<String>>,
}

impl TrustLayer {
    /// Build the full layer from configuration
    pub fn new(config: TrustConfig) -> Result<Self> {
        let chain_key = config.chain_key_bytes()?;
        let events = Arc::new(SecurityEventLog::new(config.event_log.clone()));

        Ok(Self {
            sessions: Arc::new(SessionStore::new(config.session, Arc::clone(&events))),
            csrf: Arc::new(CsrfGuard::new(config.csrf, Arc::clone(&events))),
            gate: Arc::new(BruteForceGate::new(config.brute_force, Arc::clone(&events))),
            ledger: Arc::new(AuditLedger::new(chain_key, Arc::clone(&events))),
            events,
            cleanup_interval_seconds: config.cleanup_interval_seconds,
            operator_alerts: Mutex::new(Vec::new()),
        })
    }

    /// Build with testing configuration
    pub fn for_testing() -> Self {
        Self::new(TrustConfig::for_testing()).expect("testing config is valid")
    }

    /// Process a login attempt
    ///
    /// `credentials_valid` is the verdict of the external credential check;
    /// this layer decides whether the attempt may proceed at all, records
    /// the result, and hands out the session.
    pub fn login(
        &self,
        principal: &str,
        credentials_valid: bool,
        source: &str,
        challenge_response: Option<ChallengeResponse>,
    ) -> Result<LoginOutcome> {
        if self.gate.should_challenge(principal, source)? {
            match challenge_response {
                None => return Ok(LoginOutcome::ChallengeRequired(self.gate.issue_challenge()?)),
                Some(response) => {
                    if !self
                        .gate
                        .verify_challenge(&response.challenge_id, &response.answer)?
                    {
                        // A failed challenge counts as an authentication failure
                        self.gate.record_failure(principal, source)?;
                        return Ok(LoginOutcome::ChallengeRequired(
                            self.gate.issue_challenge()?,
                        ));
                    }
                }
            }
        }

        if !credentials_valid {
            self.gate.record_failure(principal, source)?;
            self.events.log(
                EventCategory::Authentication,
                Severity::Info,
                "login denied",
                &[("principal", principal), ("source", source)],
            );
            return Ok(LoginOutcome::Denied);
        }

        self.gate.record_success(principal)?;

        // Fixation-safe: login always issues a fresh identifier, superseding
        // any pre-login session for this principal
        let handle = self.sessions.start_regenerated(principal)?;
        let csrf_token = self.csrf.issue(handle.id())?;

        Ok(LoginOutcome::Success { handle, csrf_token })
    }

    /// Process a state-changing vote submission
    ///
    /// Order is fixed: session first, CSRF second, ledger last. A request
    /// that fails either check is rejected before any side effect and the
    /// rejection never reveals which check failed.
    pub fn submit_vote(
        &self,
        handle: &SessionHandle,
        csrf_token: &str,
        category: VoteCategory,
        payload: &[u8],
    ) -> Result<VoteOutcome> {
        let principal = match self.sessions.validate(handle)? {
            SessionValidation::Valid { principal } => principal,
            SessionValidation::Expired
            | SessionValidation::NotFound
            | SessionValidation::Revoked => {
                self.events.log(
                    EventCategory::Anomaly,
                    Severity::Medium,
                    "vote submission with invalid session",
                    &[("session", &SecurityEventLog::redact(handle.id()))],
                );
                return Ok(VoteOutcome::Rejected);
            }
        };

        let rotated_csrf = match self.csrf.validate(handle.id(), csrf_token)? {
            CsrfValidation::Ok { rotated } => rotated,
            CsrfValidation::Mismatch
            | CsrfValidation::Expired
            | CsrfValidation::AlreadyConsumed => {
                // CsrfGuard already logged the MEDIUM event
                return Ok(VoteOutcome::Rejected);
            }
        };

        match self.ledger.record_vote_submission(&principal, category, payload) {
            Ok(audit_id) => Ok(VoteOutcome::Accepted {
                audit_id,
                rotated_csrf,
            }),
            Err(crate::Error::Conflict { .. }) => Ok(VoteOutcome::AlreadyVoted),
            Err(e) => Err(e),
        }
    }

    /// Destroy a session and cascade CSRF invalidation
    pub fn logout(&self, handle: &SessionHandle) -> Result<()> {
        self.csrf.invalidate_session(handle.id())?;
        self.sessions.destroy(handle)?;
        Ok(())
    }

    /// Mint an additional CSRF token for a rendered form on a live session
    pub fn issue_form_token(&self, handle: &SessionHandle) -> Result<Option<String>> {
        match self.sessions.validate(handle)? {
            SessionValidation::Valid { .. } => Ok(Some(self.csrf.issue(handle.id())?)),
            _ => Ok(None),
        }
    }

    /// Operator surface: verify the audit chain and raise an alert on
    /// violation — tampering must reach an operator channel, not just a log
    pub fn verify_integrity(
        &self,
        range: std::ops::RangeInclusive<u64>,
    ) -> Result<IntegrityReport> {
        let report = self.ledger.verify_integrity(range)?;

        if !report.is_clean() {
            let mut alerts = self
                .operator_alerts
                .lock()
                .map_err(|_| storage_error!("Alert queue lock error"))?;
            for violation in &report.violations {
                alerts.push(format!(
                    "audit chain violation at sequence {} ({:?})",
                    violation.sequence, violation.kind
                ));
            }
        }

        Ok(report)
    }

    /// Operator surface: reconcile audit entries against tally counters
    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        let report = self.ledger.reconcile()?;

        if !report.is_consistent() {
            let mut alerts = self
                .operator_alerts
                .lock()
                .map_err(|_| storage_error!("Alert queue lock error"))?;
            for finding in &report.findings {
                alerts.push(format!("reconciliation: {}", finding.description));
            }
        }

        Ok(report)
    }

    /// Operator surface: read-only reporting over a period
    pub fn generate_audit_trail(
        &self,
        period_start: u64,
        period_end: u64,
    ) -> Result<AuditTrailReport> {
        self.ledger.generate_audit_trail(period_start, period_end)
    }

    /// Drain pending operator alerts
    pub fn take_operator_alerts(&self) -> Result<Vec<String>> {
        let mut alerts = self
            .operator_alerts
            .lock()
            .map_err(|_| storage_error!("Alert queue lock error"))?;
        Ok(std::mem::take(&mut *alerts))
    }

    /// Build the background cleanup service over this layer's stores
    pub fn cleanup_service(
        &self,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
    ) -> crate::security::cleanup::CleanupService {
        crate::security::cleanup::CleanupService::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.csrf),
            Arc::clone(&self.gate),
            stop_signal,
            self.cleanup_interval_seconds,
        )
    }

    /// Component accessors for the surrounding application
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn csrf(&self) -> &Arc<CsrfGuard> {
        &self.csrf
    }

    pub fn gate(&self) -> &Arc<BruteForceGate> {
        &self.gate
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn events(&self) -> &Arc<SecurityEventLog> {
        &self.events
    }
}
