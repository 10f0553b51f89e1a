//! Telemetry seam.
//!
//! The core never talks to a metrics backend directly; it emits named
//! counters and timings through [`MetricsSink`]. Callers wire a real exporter
//! behind the trait; tests and embedders that don't care use [`NoopMetrics`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

// Counter names emitted by the core.
pub const QUERIES_TOTAL: &str = "proxy.queries.total";
pub const QUERIES_BLACKLISTED: &str = "proxy.queries.blacklisted";
pub const QUERIES_PANICKED: &str = "proxy.queries.panicked";
pub const SHUTDOWN_REFUSED: &str = "proxy.session.refused_after_shutdown";
pub const TX_PARTIAL: &str = "proxy.tx.partial";
pub const DISPATCH_RETRIES: &str = "proxy.dispatch.replica_retries";
pub const QUERY_LATENCY_US: &str = "proxy.query.latency_us";

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str, delta: u64);
    fn record_timing(&self, name: &'static str, micros: u64);
}

/// Sink that drops everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _delta: u64) {}
    fn record_timing(&self, _name: &'static str, _micros: u64) {}
}

/// In-process sink with atomic counters; good enough for tests and for
/// scraping via an admin surface.
#[derive(Default)]
pub struct AtomicMetrics {
    counters: DashMap<&'static str, AtomicU64>,
    timings: DashMap<&'static str, (AtomicU64, AtomicU64)>, // (count, total_us)
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &'static str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// (sample count, mean micros) for a timing series.
    pub fn timing(&self, name: &'static str) -> (u64, u64) {
        self.timings
            .get(name)
            .map(|t| {
                let n = t.0.load(Ordering::Relaxed);
                let total = t.1.load(Ordering::Relaxed);
                (n, if n == 0 { 0 } else { total / n })
            })
            .unwrap_or((0, 0))
    }
}

impl MetricsSink for AtomicMetrics {
    fn incr_counter(&self, name: &'static str, delta: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    fn record_timing(&self, name: &'static str, micros: u64) {
        let entry = self
            .timings
            .entry(name)
            .or_insert_with(|| (AtomicU64::new(0), AtomicU64::new(0)));
        entry.0.fetch_add(1, Ordering::Relaxed);
        entry.1.fetch_add(micros, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = AtomicMetrics::new();
        m.incr_counter(QUERIES_TOTAL, 1);
        m.incr_counter(QUERIES_TOTAL, 2);
        assert_eq!(m.counter(QUERIES_TOTAL), 3);
        assert_eq!(m.counter(QUERIES_BLACKLISTED), 0);
    }

    #[test]
    fn timings_report_mean() {
        let m = AtomicMetrics::new();
        m.record_timing(QUERY_LATENCY_US, 100);
        m.record_timing(QUERY_LATENCY_US, 300);
        assert_eq!(m.timing(QUERY_LATENCY_US), (2, 200));
    }
}
