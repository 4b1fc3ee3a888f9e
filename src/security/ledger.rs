//! Tamper-evident, hash-chained audit ledger for vote submissions
//!
//! Every successful vote produces exactly one immutable entry whose hash is
//! a keyed Blake3 digest over the entry's fields plus the previous entry's
//! hash, anchored at a fixed genesis constant. A retroactive edit to any
//! historical entry breaks the chain and is detected by recomputation; the
//! ledger reports tampering, it never repairs it.
//!
//! The vote critical section is one transaction: the already-voted check,
//! the category tally increment, the per-voter cast mark, and the entry
//! append all execute under a single lock. There is no partial variant —
//! a tally change without an entry, or an entry without a tally change,
//! cannot be produced through this interface.

use crate::security::event_log::{EventCategory, SecurityEventLog, Severity};
use crate::security::{CryptoUtils, Hash};
use crate::{Result, conflict_error, integrity_error, storage_error};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Fixed anchor for the first entry's previous-hash field
pub const GENESIS_HASH: Hash = [0u8; 32];

/// Category of a cast vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteCategory {
    Language,
    Team,
    Both,
}

impl VoteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Team => "team",
            Self::Both => "both",
        }
    }

    pub fn all() -> [VoteCategory; 3] {
        [Self::Language, Self::Team, Self::Both]
    }
}

/// One immutable audit entry
///
/// Never mutated after creation except the flagged-for-review bit,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing, starting at 1
    pub sequence: u64,
    pub voter: String,
    pub category: VoteCategory,
    pub payload_digest: Hash,
    pub previous_hash: Hash,
    pub entry_hash: Hash,
    pub timestamp: u64,
    pub flagged: bool,
}

/// Kinds of chain integrity violations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntegrityViolationKind {
    /// Recomputed entry hash diverges from the stored value
    EntryHashMismatch,
    /// Stored previous-hash does not equal the prior entry's stored hash
    ChainLinkBroken,
}

/// A detected integrity violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub sequence: u64,
    pub kind: IntegrityViolationKind,
}

/// Result of a chain verification pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub violations: Vec<IntegrityViolation>,
    pub audited_count: usize,
    pub verified_at: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Point-in-time capture of the counters the chain is reconciled against;
/// transient, recomputed on demand, never authoritative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
    pub tallies: HashMap<String, u64>,
    pub voters_marked_cast: usize,
    pub captured_at: u64,
}

/// One divergence discovered during reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationFinding {
    pub category: Option<String>,
    pub description: String,
}

/// Result of comparing audit entry counts against live tally counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub snapshot: ReconciliationSnapshot,
    pub findings: Vec<ReconciliationFinding>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Read-only aggregation over a reporting period for operator review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrailReport {
    pub period_start_iso: String,
    pub period_end_iso: String,
    pub total_submissions: u64,
    pub unique_voters: usize,
    pub flagged_submissions: u64,
    pub per_category: HashMap<String, u64>,
}

/// Operational counts for the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_entries: u64,
    pub flagged_entries: u64,
    pub voters_marked_cast: usize,
}

/// Shared transactional state: entries, tally counters, and per-voter cast
/// status live behind one lock so the vote critical section is atomic
struct LedgerState {
    entries: Vec<AuditEntry>,
    tallies: HashMap<VoteCategory, u64>,
    voted: HashMap<String, u64>,
}

/// Append-only audit ledger; the only writer to the tally counters it
/// reconciles against
pub struct AuditLedger {
    chain_key: [u8; 32],
    state: Mutex<LedgerState>,
    events: Arc<SecurityEventLog>,
}

impl AuditLedger {
    /// Create a new ledger with the given chain key
    pub fn new(chain_key: [u8; 32], events: Arc<SecurityEventLog>) -> Self {
        Self {
            chain_key,
            state: Mutex::new(LedgerState {
                entries: Vec::new(),
                tallies: HashMap::new(),
                voted: HashMap::new(),
            }),
            events,
        }
    }

    /// Create for testing with a random chain key and private event log
    pub fn for_testing() -> Self {
        let config = crate::TrustConfig::for_testing();
        let chain_key = config.chain_key_bytes().expect("testing chain key");
        Self::new(
            chain_key,
            Arc::new(SecurityEventLog::new(config.event_log)),
        )
    }

    fn compute_entry_hash(
        &self,
        voter: &str,
        category: VoteCategory,
        payload_digest: &Hash,
        timestamp: u64,
        previous_hash: &Hash,
    ) -> Hash {
        // voter ∥ category ∥ digest(payload) ∥ timestamp ∥ previous hash,
        // length-prefixed so field boundaries cannot be shifted
        let mut data = Vec::with_capacity(voter.len() + 128);
        data.extend_from_slice(&(voter.len() as u64).to_le_bytes());
        data.extend_from_slice(voter.as_bytes());
        data.extend_from_slice(category.as_str().as_bytes());
        data.extend_from_slice(payload_digest);
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(previous_hash);
        CryptoUtils::keyed_hash(&self.chain_key, &data)
    }

    /// Record a vote submission — the only path by which a vote is marked cast
    ///
    /// Atomically checks the voter's cast status, increments the category
    /// tally, marks the voter, and appends the chained entry. Two concurrent
    /// submissions from the same voter produce exactly one entry and one
    /// tally increment; the loser gets `Conflict`.
    pub fn record_vote_submission(
        &self,
        voter: &str,
        category: VoteCategory,
        payload: &[u8],
    ) -> Result<u64> {
        if voter.is_empty() {
            return Err(crate::Error::invalid_input("Voter identity is empty"));
        }

        let sequence = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| storage_error!("Ledger lock error"))?;

            if state.voted.contains_key(voter) {
                drop(state);
                self.events.log(
                    EventCategory::Voting,
                    Severity::Medium,
                    "duplicate vote submission rejected",
                    &[("voter", voter)],
                );
                return Err(conflict_error!("Voter has already cast a ballot"));
            }

            // The chain head must verify before it is extended; appending on
            // top of a tampered entry would mask the tampering
            if let Some(last) = state.entries.last() {
                let recomputed = self.compute_entry_hash(
                    &last.voter,
                    last.category,
                    &last.payload_digest,
                    last.timestamp,
                    &last.previous_hash,
                );
                if !CryptoUtils::constant_time_eq(&last.entry_hash, &recomputed) {
                    let sequence = last.sequence;
                    drop(state);
                    self.events.log(
                        EventCategory::Anomaly,
                        Severity::High,
                        "audit chain head failed verification on append",
                        &[("sequence", &sequence.to_string())],
                    );
                    return Err(integrity_error!(
                        "Audit chain head at sequence {} failed verification",
                        sequence
                    ));
                }
            }

            let sequence = state.entries.len() as u64 + 1;
            let previous_hash = state
                .entries
                .last()
                .map(|e| e.entry_hash)
                .unwrap_or(GENESIS_HASH);
            let payload_digest = CryptoUtils::hash(payload);
            let timestamp = CryptoUtils::now();
            let entry_hash =
                self.compute_entry_hash(voter, category, &payload_digest, timestamp, &previous_hash);

            // The combined tally-and-mark primitive: no partial variant exists
            *state.tallies.entry(category).or_insert(0) += 1;
            state.voted.insert(voter.to_string(), sequence);
            state.entries.push(AuditEntry {
                sequence,
                voter: voter.to_string(),
                category,
                payload_digest,
                previous_hash,
                entry_hash,
                timestamp,
                flagged: false,
            });

            sequence
        };

        self.events.log(
            EventCategory::Voting,
            Severity::Info,
            "vote recorded",
            &[
                ("voter", voter),
                ("category", category.as_str()),
                ("sequence", &sequence.to_string()),
            ],
        );

        tracing::info!(
            "🗳️ Vote recorded: voter={}, category={}, seq={}",
            voter,
            category.as_str(),
            sequence
        );

        Ok(sequence)
    }

    /// Whether a voter has already cast a ballot
    pub fn has_voted(&self, voter: &str) -> Result<bool> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;
        Ok(state.voted.contains_key(voter))
    }

    /// Recompute the hash chain over a sequence range (inclusive) and report
    /// every index whose recomputed hash diverges from the stored value
    ///
    /// Detection only: this never repairs.
    pub fn verify_integrity(&self, range: std::ops::RangeInclusive<u64>) -> Result<IntegrityReport> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;

        let mut report = IntegrityReport {
            violations: Vec::new(),
            audited_count: 0,
            verified_at: CryptoUtils::now(),
        };

        for entry in &state.entries {
            if !range.contains(&entry.sequence) {
                continue;
            }
            report.audited_count += 1;

            // Entry i's previous-hash must equal entry i-1's stored hash
            // (genesis for the first entry)
            let expected_previous = if entry.sequence == 1 {
                GENESIS_HASH
            } else {
                match state.entries.get(entry.sequence as usize - 2) {
                    Some(prior) => prior.entry_hash,
                    None => GENESIS_HASH,
                }
            };

            if !CryptoUtils::constant_time_eq(&entry.previous_hash, &expected_previous) {
                report.violations.push(IntegrityViolation {
                    sequence: entry.sequence,
                    kind: IntegrityViolationKind::ChainLinkBroken,
                });
            }

            let recomputed = self.compute_entry_hash(
                &entry.voter,
                entry.category,
                &entry.payload_digest,
                entry.timestamp,
                &expected_previous,
            );

            if !CryptoUtils::constant_time_eq(&entry.entry_hash, &recomputed) {
                report.violations.push(IntegrityViolation {
                    sequence: entry.sequence,
                    kind: IntegrityViolationKind::EntryHashMismatch,
                });
            }
        }

        drop(state);

        if !report.is_clean() {
            self.events.log(
                EventCategory::Anomaly,
                Severity::High,
                "audit chain integrity violation detected",
                &[("violations", &report.violations.len().to_string())],
            );
        }

        Ok(report)
    }

    /// Verify the entire chain
    pub fn verify_all(&self) -> Result<IntegrityReport> {
        let last = {
            let state = self
                .state
                .lock()
                .map_err(|_| storage_error!("Ledger lock error"))?;
            state.entries.len() as u64
        };
        self.verify_integrity(1..=last.max(1))
    }

    /// Compare non-flagged entry counts per category against the live tally
    /// counters and per-voter cast flags
    ///
    /// Divergence is reported as a suspicious-activity finding, never
    /// silently corrected.
    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;

        let snapshot = ReconciliationSnapshot {
            tallies: state
                .tallies
                .iter()
                .map(|(category, count)| (category.as_str().to_string(), *count))
                .collect(),
            voters_marked_cast: state.voted.len(),
            captured_at: CryptoUtils::now(),
        };

        let mut findings = Vec::new();

        // Per-category: non-flagged entries vs tally counter
        let mut entry_counts: HashMap<VoteCategory, u64> = HashMap::new();
        for entry in state.entries.iter().filter(|e| !e.flagged) {
            *entry_counts.entry(entry.category).or_insert(0) += 1;
        }

        for category in VoteCategory::all() {
            let from_entries = entry_counts.get(&category).copied().unwrap_or(0);
            let from_tally = state.tallies.get(&category).copied().unwrap_or(0);
            if from_entries != from_tally {
                findings.push(ReconciliationFinding {
                    category: Some(category.as_str().to_string()),
                    description: format!(
                        "tally counter is {from_tally} but {from_entries} audit entries exist"
                    ),
                });
            }
        }

        // Per-voter: every entry's voter must be marked cast, and every
        // marked voter must have an entry
        let entry_voters: HashSet<&str> =
            state.entries.iter().map(|e| e.voter.as_str()).collect();

        for voter in entry_voters.iter() {
            if !state.voted.contains_key(*voter) {
                findings.push(ReconciliationFinding {
                    category: None,
                    description: format!("audit entry exists for {voter} but cast flag is unset"),
                });
            }
        }
        for voter in state.voted.keys() {
            if !entry_voters.contains(voter.as_str()) {
                findings.push(ReconciliationFinding {
                    category: None,
                    description: format!("cast flag set for {voter} but no audit entry exists"),
                });
            }
        }

        drop(state);

        if !findings.is_empty() {
            self.events.log(
                EventCategory::Anomaly,
                Severity::High,
                "reconciliation divergence detected",
                &[("findings", &findings.len().to_string())],
            );
        }

        Ok(ReconciliationReport { snapshot, findings })
    }

    /// Read-only aggregation over `[period_start, period_end]` for operator
    /// review
    pub fn generate_audit_trail(
        &self,
        period_start: u64,
        period_end: u64,
    ) -> Result<AuditTrailReport> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;

        let in_period = state
            .entries
            .iter()
            .filter(|e| e.timestamp >= period_start && e.timestamp <= period_end);

        let mut total_submissions = 0u64;
        let mut flagged_submissions = 0u64;
        let mut voters = HashSet::new();
        let mut per_category: HashMap<String, u64> = HashMap::new();

        for entry in in_period {
            total_submissions += 1;
            if entry.flagged {
                flagged_submissions += 1;
            }
            voters.insert(entry.voter.as_str());
            *per_category
                .entry(entry.category.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(AuditTrailReport {
            period_start_iso: CryptoUtils::timestamp_iso(period_start),
            period_end_iso: CryptoUtils::timestamp_iso(period_end),
            total_submissions,
            unique_voters: voters.len(),
            flagged_submissions,
            per_category,
        })
    }

    /// Flag an entry for operator review — the only permitted mutation
    pub fn flag_for_review(&self, sequence: u64) -> Result<()> {
        let voter = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| storage_error!("Ledger lock error"))?;

            let entry = state
                .entries
                .get_mut(sequence.checked_sub(1).unwrap_or(u64::MAX) as usize)
                .ok_or_else(|| {
                    crate::Error::invalid_input(format!("No audit entry with sequence {sequence}"))
                })?;

            entry.flagged = true;
            entry.voter.clone()
        };

        self.events.log(
            EventCategory::Admin,
            Severity::Medium,
            "audit entry flagged for review",
            &[("sequence", &sequence.to_string()), ("voter", &voter)],
        );

        Ok(())
    }

    /// Fetch a copy of one entry
    pub fn entry(&self, sequence: u64) -> Result<Option<AuditEntry>> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;
        Ok(state
            .entries
            .get(sequence.checked_sub(1).unwrap_or(u64::MAX) as usize)
            .cloned())
    }

    /// Get operational statistics
    pub fn ledger_stats(&self) -> Result<LedgerStats> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;

        Ok(LedgerStats {
            total_entries: state.entries.len() as u64,
            flagged_entries: state.entries.iter().filter(|e| e.flagged).count() as u64,
            voters_marked_cast: state.voted.len(),
        })
    }

    /// Live tally counter for a category
    pub fn tally(&self, category: VoteCategory) -> Result<u64> {
        let state = self
            .state
            .lock()
            .map_err(|_| storage_error!("Ledger lock error"))?;
        Ok(state.tallies.get(&category).copied().unwrap_or(0))
    }

    #[cfg(test)]
    pub(crate) fn tamper_payload_digest(&self, sequence: u64, digest: Hash) {
        let mut state = self.state.lock().unwrap();
        state.entries[sequence as usize - 1].payload_digest = digest;
    }

    #[cfg(test)]
    pub(crate) fn tamper_previous_hash(&self, sequence: u64, previous_hash: Hash) {
        let mut state = self.state.lock().unwrap();
        state.entries[sequence as usize - 1].previous_hash = previous_hash;
    }

    #[cfg(test)]
    pub(crate) fn tamper_tally(&self, category: VoteCategory, count: u64) {
        let mut state = self.state.lock().unwrap();
        state.tallies.insert(category, count);
    }
}
