//! Failed-authentication tracking with challenge escalation
//!
//! Failures are tracked under two independent keys: the principal being
//! targeted and the source address of the attempt. Either key crossing the
//! threshold within the sliding window triggers a challenge. This dual
//! keying covers both attack shapes: one password sprayed across many
//! usernames (source key trips) and many passwords against one username
//! from rotating addresses (principal key trips).
//!
//! Failure timestamps live in a per-key deque; counts decay naturally as
//! entries age out of the window. A successful authentication removes the
//! principal record entirely.

use crate::config::BruteForceConfig;
use crate::security::event_log::{EventCategory, SecurityEventLog, Severity};
use crate::security::CryptoUtils;
use crate::{Result, storage_error};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Upper bound on outstanding challenges; issuance past this point is
/// itself treated as an attack
const MAX_PENDING_CHALLENGES: usize = 10_000;

/// Tracking key for a failure record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKey {
    /// The principal an attempt targeted
    Principal(String),
    /// The source address the attempt came from
    Source(String),
}

/// Kind of challenge; tagged for extensibility even though only
/// arithmetic exists today
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChallengeKind {
    Arithmetic,
}

/// A server-side challenge record; the expected answer never leaves here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: Uuid,
    pub kind: ChallengeKind,
    pub question: String,
    expected_answer: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// The client-facing rendition of a challenge: question plus an opaque
/// reference, never the expected value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub challenge_id: Uuid,
    pub question: String,
}

/// Operational counts for the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStats {
    pub tracked_principals: usize,
    pub tracked_sources: usize,
    pub pending_challenges: usize,
}

/// Tracks failed authentication attempts and escalates to a challenge
pub struct BruteForceGate {
    config: BruteForceConfig,
    /// Failure timestamps per key, oldest first
    failures: RwLock<HashMap<FailureKey, VecDeque<u64>>>,
    /// Outstanding challenges awaiting an answer
    challenges: RwLock<HashMap<Uuid, Challenge>>,
    events: Arc<SecurityEventLog>,
}

impl BruteForceGate {
    /// Create a new gate
    pub fn new(config: BruteForceConfig, events: Arc<SecurityEventLog>) -> Self {
        Self {
            config,
            failures: RwLock::new(HashMap::new()),
            challenges: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create for testing with a private event log
    pub fn for_testing() -> Self {
        let config = crate::TrustConfig::for_testing();
        Self::new(
            config.brute_force,
            Arc::new(SecurityEventLog::new(config.event_log)),
        )
    }

    /// Record a failed attempt under both the principal and source keys
    ///
    /// The increment is an atomic increment-and-read per key: the push and
    /// the threshold observation happen under the same write lock, so a
    /// burst of concurrent attempts cannot undercount past the threshold.
    pub fn record_failure(&self, principal: &str, source: &str) -> Result<()> {
        let now = CryptoUtils::now();
        let mut escalated = false;

        {
            let mut failures = self
                .failures
                .write()
                .map_err(|_| storage_error!("Failure record write error"))?;

            for key in [
                FailureKey::Principal(principal.to_string()),
                FailureKey::Source(source.to_string()),
            ] {
                let record = failures.entry(key).or_default();
                Self::expire_window(record, now, self.config.window_seconds);
                record.push_back(now);
                if record.len() as u32 >= self.config.failure_threshold {
                    escalated = true;
                }
            }
        }

        self.events.log(
            EventCategory::Authentication,
            Severity::Info,
            "authentication failure recorded",
            &[("principal", principal), ("source", source)],
        );

        if escalated {
            self.events.log(
                EventCategory::Anomaly,
                Severity::Medium,
                "failure threshold crossed, challenge required",
                &[("principal", principal), ("source", source)],
            );
        }

        Ok(())
    }

    /// Reset the principal's failure record after a successful authentication
    ///
    /// The record is removed, not zeroed: a later failure starts a fresh
    /// window.
    pub fn record_success(&self, principal: &str) -> Result<()> {
        let mut failures = self
            .failures
            .write()
            .map_err(|_| storage_error!("Failure record write error"))?;

        failures.remove(&FailureKey::Principal(principal.to_string()));
        Ok(())
    }

    /// Whether the next attempt for this principal/source must answer a
    /// challenge; true once either key crossed the threshold in-window
    pub fn should_challenge(&self, principal: &str, source: &str) -> Result<bool> {
        let now = CryptoUtils::now();
        let failures = self
            .failures
            .read()
            .map_err(|_| storage_error!("Failure record read error"))?;

        let count_in_window = |key: &FailureKey| -> u32 {
            failures
                .get(key)
                .map(|record| {
                    record
                        .iter()
                        .filter(|&&ts| now.saturating_sub(ts) < self.config.window_seconds)
                        .count() as u32
                })
                .unwrap_or(0)
        };

        let principal_count = count_in_window(&FailureKey::Principal(principal.to_string()));
        let source_count = count_in_window(&FailureKey::Source(source.to_string()));

        Ok(principal_count >= self.config.failure_threshold
            || source_count >= self.config.failure_threshold)
    }

    /// Produce a cheap human check; deters scripted credential stuffing,
    /// not dedicated solvers
    pub fn issue_challenge(&self) -> Result<ChallengePayload> {
        {
            let challenges = self
                .challenges
                .read()
                .map_err(|_| storage_error!("Challenge store read error"))?;
            if challenges.len() >= MAX_PENDING_CHALLENGES {
                self.events.log(
                    EventCategory::Anomaly,
                    Severity::High,
                    "challenge store exhausted",
                    &[("pending", &challenges.len().to_string())],
                );
                return Err(crate::Error::RateLimited);
            }
        }

        let mut rng = rand::thread_rng();
        let a: u32 = rng.gen_range(2..20);
        let b: u32 = rng.gen_range(2..20);

        let now = CryptoUtils::now();
        let challenge = Challenge {
            challenge_id: Uuid::new_v4(),
            kind: ChallengeKind::Arithmetic,
            question: format!("What is {a} + {b}?"),
            expected_answer: (a + b).to_string(),
            issued_at: now,
            expires_at: now + self.config.challenge_ttl_seconds,
        };

        let payload = ChallengePayload {
            challenge_id: challenge.challenge_id,
            question: challenge.question.clone(),
        };

        let mut challenges = self
            .challenges
            .write()
            .map_err(|_| storage_error!("Challenge store write error"))?;
        challenges.insert(challenge.challenge_id, challenge);

        Ok(payload)
    }

    /// Verify an answer against the stored challenge; single use
    ///
    /// Returns false for an unknown, expired, or wrong answer. The caller
    /// counts a failed challenge as an additional authentication failure.
    pub fn verify_challenge(&self, challenge_id: &Uuid, supplied: &str) -> Result<bool> {
        let now = CryptoUtils::now();
        let mut challenges = self
            .challenges
            .write()
            .map_err(|_| storage_error!("Challenge store write error"))?;

        let Some(challenge) = challenges.remove(challenge_id) else {
            return Ok(false);
        };

        if now > challenge.expires_at {
            return Ok(false);
        }

        Ok(CryptoUtils::constant_time_eq(
            challenge.expected_answer.as_bytes(),
            supplied.trim().as_bytes(),
        ))
    }

    /// Sweep aged-out failure windows and expired challenges
    pub fn cleanup_expired(&self) -> Result<u32> {
        let now = CryptoUtils::now();
        let mut removed = 0;

        {
            let mut failures = self
                .failures
                .write()
                .map_err(|_| storage_error!("Failure record write error"))?;

            failures.retain(|_, record| {
                Self::expire_window(record, now, self.config.window_seconds);
                if record.is_empty() {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        {
            let mut challenges = self
                .challenges
                .write()
                .map_err(|_| storage_error!("Challenge store write error"))?;

            let initial = challenges.len();
            challenges.retain(|_, challenge| now <= challenge.expires_at);
            removed += (initial - challenges.len()) as u32;
        }

        Ok(removed)
    }

    /// Get operational statistics
    pub fn gate_stats(&self) -> Result<GateStats> {
        let failures = self
            .failures
            .read()
            .map_err(|_| storage_error!("Failure record read error"))?;
        let challenges = self
            .challenges
            .read()
            .map_err(|_| storage_error!("Challenge store read error"))?;

        let tracked_principals = failures
            .keys()
            .filter(|k| matches!(k, FailureKey::Principal(_)))
            .count();
        let tracked_sources = failures
            .keys()
            .filter(|k| matches!(k, FailureKey::Source(_)))
            .count();

        Ok(GateStats {
            tracked_principals,
            tracked_sources,
            pending_challenges: challenges.len(),
        })
    }

    fn expire_window(record: &mut VecDeque<u64>, now: u64, window_seconds: u64) {
        while let Some(&oldest) = record.front() {
            if now.saturating_sub(oldest) >= window_seconds {
                record.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_failures(&self, principal: &str, age_seconds: u64) {
        let mut failures = self.failures.write().unwrap();
        if let Some(record) = failures.get_mut(&FailureKey::Principal(principal.to_string())) {
            for ts in record.iter_mut() {
                *ts = ts.saturating_sub(age_seconds);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn expected_answer(&self, challenge_id: &Uuid) -> Option<String> {
        let challenges = self.challenges.read().unwrap();
        challenges
            .get(challenge_id)
            .map(|c| c.expected_answer.clone())
    }
}
