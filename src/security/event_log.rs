//! Structured, append-only security event log
//!
//! Every component of the trust layer writes here; nothing on the critical
//! path reads back from it. Logging is fire-and-forget: a logging failure
//! must never abort the security operation it is describing, so `log` has
//! no error return. Events are emitted through `tracing` as the durable
//! sink and retained in a bounded in-memory ring for the read accessors.
//!
//! Raw secrets (passwords, full session identifiers, full tokens) are never
//! stored; callers pass truncated representations via [`SecurityEventLog::redact`].

use crate::config::EventLogConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use uuid::Uuid;

/// High-level category of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Authentication,
    Voting,
    Admin,
    Anomaly,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Voting => "voting",
            Self::Admin => "admin",
            Self::Anomaly => "anomaly",
        }
    }
}

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Medium,
    High,
}

/// One recorded security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEventRecord {
    pub event_id: Uuid,
    pub category: EventCategory,
    pub severity: Severity,
    pub message: String,
    pub context: HashMap<String, String>,
    pub timestamp: u64,
}

/// Append-only security event log with bounded in-memory retention
pub struct SecurityEventLog {
    config: EventLogConfig,
    events: RwLock<VecDeque<SecurityEventRecord>>,
}

impl SecurityEventLog {
    /// Create a new event log
    pub fn new(config: EventLogConfig) -> Self {
        Self {
            config,
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Create for testing
    pub fn for_testing() -> Self {
        Self::new(EventLogConfig {
            max_recent_events: 1000,
        })
    }

    /// Truncate an opaque value for safe inclusion in event context
    ///
    /// Keeps an 8-character prefix, enough to correlate events without
    /// reconstructing the credential.
    pub fn redact(value: &str) -> String {
        // Char-wise truncation: the input may be an adversarial cookie with
        // multi-byte characters straddling any byte offset
        if value.chars().count() <= 8 {
            value.to_string()
        } else {
            let prefix: String = value.chars().take(8).collect();
            format!("{prefix}…")
        }
    }

    /// Record a security event; never raises to the caller
    pub fn log(
        &self,
        category: EventCategory,
        severity: Severity,
        message: &str,
        context: &[(&str, &str)],
    ) {
        let record = SecurityEventRecord {
            event_id: Uuid::new_v4(),
            category,
            severity,
            message: message.to_string(),
            context: context
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: crate::security::CryptoUtils::now(),
        };

        // Durable sink first; the in-memory ring is best-effort
        match severity {
            Severity::Info => tracing::info!(
                category = category.as_str(),
                event_id = %record.event_id,
                context = ?record.context,
                "{message}"
            ),
            Severity::Medium => tracing::warn!(
                category = category.as_str(),
                event_id = %record.event_id,
                context = ?record.context,
                "{message}"
            ),
            Severity::High => tracing::error!(
                category = category.as_str(),
                event_id = %record.event_id,
                context = ?record.context,
                "{message}"
            ),
        }

        let Ok(mut events) = self.events.write() else {
            // A poisoned ring must not abort the operation being described
            return;
        };

        events.push_back(record);
        while events.len() > self.config.max_recent_events {
            events.pop_front();
        }
    }

    /// Most recent events, newest last
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEventRecord> {
        let Ok(events) = self.events.read() else {
            return Vec::new();
        };

        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Per-category event counts for the operational dashboard
    pub fn counts_by_category(&self) -> HashMap<EventCategory, usize> {
        let Ok(events) = self.events.read() else {
            return HashMap::new();
        };

        let mut counts = HashMap::new();
        for event in events.iter() {
            *counts.entry(event.category).or_insert(0) += 1;
        }
        counts
    }

    /// Events at or above a severity, newest last
    pub fn events_at_severity(&self, minimum: Severity) -> Vec<SecurityEventRecord> {
        let Ok(events) = self.events.read() else {
            return Vec::new();
        };

        events
            .iter()
            .filter(|e| e.severity >= minimum)
            .cloned()
            .collect()
    }
}
