//! Query pipeline metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

/// Registry of pipeline counters
///
/// Shared through an `Arc` by every context of one client. Request charge
/// is stored in thousandths so it can live in an atomic integer.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    /// Queries started
    queries_started: AtomicU64,
    /// Queries that drained all pages
    queries_completed: AtomicU64,
    /// Queries terminated by an error
    queries_failed: AtomicU64,
    /// Requests sent to the service
    requests_issued: AtomicU64,
    /// Pages handed to callers
    pages_emitted: AtomicU64,
    /// Rows handed to callers
    rows_emitted: AtomicU64,
    /// Producers replaced after a split
    splits_handled: AtomicU64,
    /// Optimistic executions that fell back to a partitioned pipeline
    fallbacks: AtomicU64,
    /// Emitted request charge, in thousandths
    request_charge_milli: AtomicU64,
}

impl QueryMetrics {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment queries started
    pub fn increment_queries_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment queries completed
    pub fn increment_queries_completed(&self) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment queries failed
    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment requests issued
    pub fn increment_requests(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one emitted page
    pub fn record_page(&self, rows: usize, request_charge: f64) {
        self.pages_emitted.fetch_add(1, Ordering::Relaxed);
        self.rows_emitted.fetch_add(rows as u64, Ordering::Relaxed);
        let milli = (request_charge * 1000.0).round().max(0.0) as u64;
        self.request_charge_milli.fetch_add(milli, Ordering::Relaxed);
    }

    /// Increment splits handled
    pub fn increment_splits(&self) {
        self.splits_handled.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cross-partition fallbacks
    pub fn increment_fallbacks(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        let snapshot = self.snapshot();
        serde_json::json!({
            "queries_started": snapshot.queries_started,
            "queries_completed": snapshot.queries_completed,
            "queries_failed": snapshot.queries_failed,
            "requests_issued": snapshot.requests_issued,
            "pages_emitted": snapshot.pages_emitted,
            "rows_emitted": snapshot.rows_emitted,
            "splits_handled": snapshot.splits_handled,
            "fallbacks": snapshot.fallbacks,
            "request_charge": snapshot.request_charge(),
        })
        .to_string()
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_started: self.queries_started.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            pages_emitted: self.pages_emitted.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            splits_handled: self.splits_handled.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            request_charge_milli: self.request_charge_milli.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries_started: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub requests_issued: u64,
    pub pages_emitted: u64,
    pub rows_emitted: u64,
    pub splits_handled: u64,
    pub fallbacks: u64,
    pub request_charge_milli: u64,
}

impl MetricsSnapshot {
    /// Emitted request charge in service units
    pub fn request_charge(&self) -> f64 {
        self.request_charge_milli as f64 / 1000.0
    }
}
