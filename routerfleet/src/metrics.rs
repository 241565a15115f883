//! In-process transport counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for device API traffic.
///
/// Shared through an `Arc` by every client that should report into it.
/// Timeouts are counted separately from other errors; a timeout also counts
/// as an error.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    connections_active: AtomicU64,
    requests_total: AtomicU64,
    timeouts_total: AtomicU64,
    errors_total: AtomicU64,
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_active: u64,
    pub requests_total: u64,
    pub timeouts_total: u64,
    pub errors_total: u64,
}

impl TransportMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a request and return a guard that ends it.
    pub fn start(&self) -> RequestGuard<'_> {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            metrics: self,
            finished: false,
        }
    }

    fn connection_finished(&self) {
        // Saturating decrement; never goes below zero.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    fn request_completed(&self, success: bool, timed_out: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts_total.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            timeouts_total: self.timeouts_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

/// Tracks one in-flight request.
///
/// Dropping the guard without calling [`finish`](Self::finish) records the
/// request as failed, which covers cancelled calls.
#[derive(Debug)]
pub struct RequestGuard<'a> {
    metrics: &'a TransportMetrics,
    finished: bool,
}

impl RequestGuard<'_> {
    /// Record the request outcome.
    pub fn finish(mut self, success: bool, timed_out: bool) {
        self.finished = true;
        self.metrics.connection_finished();
        self.metrics.request_completed(success, timed_out);
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.connection_finished();
            self.metrics.request_completed(false, false);
        }
    }
}
