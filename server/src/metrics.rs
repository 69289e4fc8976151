// Session counters exposed on /metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionMetrics {
    active_sessions: AtomicU64,
    total_sessions: AtomicU64,
    requests_received: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
}

/// Keeps a session counted as active until dropped
#[derive(Debug)]
pub struct ActiveSessionGuard<'a> {
    metrics: &'a SessionMetrics,
}

impl Drop for ActiveSessionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub total_sessions: u64,
    pub requests_received: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
}

impl SessionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_opened(&self) -> ActiveSessionGuard<'_> {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        ActiveSessionGuard { metrics: self }
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_active_sessions() {
        let metrics = SessionMetrics::default();
        {
            let _a = metrics.session_opened();
            let _b = metrics.session_opened();
            assert_eq!(metrics.active_sessions(), 2);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.total_sessions, 2);
    }

    #[test]
    fn test_request_counters() {
        let metrics = SessionMetrics::default();
        metrics.request_received();
        metrics.request_received();
        metrics.request_completed();
        metrics.request_failed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_received, 2);
        assert_eq!(snapshot.requests_completed, 1);
        assert_eq!(snapshot.requests_failed, 1);
    }
}
