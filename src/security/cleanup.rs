//! Background cleanup for expired security state
//!
//! Sessions past their tombstone retention, consumed or expired CSRF
//! tokens, stale failure windows, and dead challenges all accumulate
//! unless swept. The service runs the sweeps on a fixed interval until
//! the stop signal fires.

use crate::security::brute_force::BruteForceGate;
use crate::security::csrf::CsrfGuard;
use crate::security::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;

/// Counters from a single cleanup sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub sessions_removed: u32,
    pub csrf_tokens_removed: u32,
    pub gate_records_removed: u32,
}

impl CleanupStats {
    pub fn total(&self) -> u32 {
        self.sessions_removed + self.csrf_tokens_removed + self.gate_records_removed
    }
}

/// Background service sweeping expired state from all stores
pub struct CleanupService {
    sessions: Arc<SessionStore>,
    csrf: Arc<CsrfGuard>,
    gate: Arc<BruteForceGate>,
    stop_signal: tokio::sync::mpsc::Receiver<()>,
    cleanup_interval: Duration,
}

impl CleanupService {
    pub fn new(
        sessions: Arc<SessionStore>,
        csrf: Arc<CsrfGuard>,
        gate: Arc<BruteForceGate>,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            sessions,
            csrf,
            gate,
            stop_signal,
            cleanup_interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Run one sweep across every store
    ///
    /// A failed sweep of one store does not prevent the others from running.
    pub fn sweep(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();

        match self.sessions.cleanup_expired() {
            Ok(removed) => stats.sessions_removed = removed,
            Err(e) => tracing::error!("❌ Session cleanup failed: {}", e),
        }

        match self.csrf.cleanup_expired() {
            Ok(removed) => stats.csrf_tokens_removed = removed,
            Err(e) => tracing::error!("❌ CSRF token cleanup failed: {}", e),
        }

        match self.gate.cleanup_expired() {
            Ok(removed) => stats.gate_records_removed = removed,
            Err(e) => tracing::error!("❌ Brute-force record cleanup failed: {}", e),
        }

        if stats.total() > 0 {
            tracing::debug!(
                "🧹 Cleanup sweep: {} sessions, {} csrf tokens, {} gate records",
                stats.sessions_removed,
                stats.csrf_tokens_removed,
                stats.gate_records_removed
            );
        }

        stats
    }

    /// Run until the stop signal fires
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.cleanup_interval);

        tracing::info!(
            "🧹 Security cleanup service started (interval: {:?})",
            self.cleanup_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep();
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Security cleanup service stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Security cleanup service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustConfig;
    use crate::security::event_log::SecurityEventLog;

    fn build_stores() -> (Arc<SessionStore>, Arc<CsrfGuard>, Arc<BruteForceGate>) {
        let config = TrustConfig::for_testing();
        let events = Arc::new(SecurityEventLog::new(config.event_log));
        (
            Arc::new(SessionStore::new(config.session, Arc::clone(&events))),
            Arc::new(CsrfGuard::new(config.csrf, Arc::clone(&events))),
            Arc::new(BruteForceGate::new(config.brute_force, events)),
        )
    }

    #[test]
    fn test_sweep_removes_expired_state() {
        let (sessions, csrf, gate) = build_stores();
        let (_stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
        let service = CleanupService::new(
            Arc::clone(&sessions),
            Arc::clone(&csrf),
            Arc::clone(&gate),
            stop_rx,
            1,
        );

        let handle = sessions.start("alice").unwrap();
        let token = csrf.issue(handle.id()).unwrap();
        csrf.force_expire(&token);

        let stats = service.sweep();
        assert_eq!(stats.csrf_tokens_removed, 1);
        assert_eq!(stats.sessions_removed, 0);

        // Live session untouched
        assert!(matches!(
            sessions.validate(&handle).unwrap(),
            crate::security::SessionValidation::Valid { .. }
        ));
    }

    #[tokio::test]
    async fn test_service_stops_on_signal() {
        let (sessions, csrf, gate) = build_stores();
        let (stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
        let service = CleanupService::new(sessions, csrf, gate, stop_rx, 3600);

        let task = tokio::spawn(service.run());
        stop_tx.send(()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("service should stop promptly")
            .unwrap();
    }
}
