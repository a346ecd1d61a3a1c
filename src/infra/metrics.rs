//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Confidence histogram upper bounds: ≤10, ≤20, ... ≤100
pub const CONFIDENCE_BUCKET_BOUNDS: [u64; 10] = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
pub const CONFIDENCE_NUM_BUCKETS: usize = 10;

#[inline]
fn confidence_bucket_index(confidence: u8) -> usize {
    CONFIDENCE_BUCKET_BOUNDS
        .partition_point(|&bound| bound < u64::from(confidence))
        .min(CONFIDENCE_NUM_BUCKETS - 1)
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Submissions received, including ones that failed validation
    submissions_total: AtomicU64,
    /// Submissions since last report (reset on report)
    submissions_since_report: AtomicU64,
    /// Accepted because the score reached the auto threshold
    accepted_auto_total: AtomicU64,
    /// Accepted because the caller confirmed manually
    accepted_manual_total: AtomicU64,
    /// Rejected inside the borderline band
    rejected_borderline_total: AtomicU64,
    /// Rejected below the borderline band
    rejected_low_total: AtomicU64,
    validation_errors_total: AtomicU64,
    /// Accepted events that left the roster unchanged (double entry/exit, replays)
    occupancy_noops_total: AtomicU64,
    /// Current number of subjects inside (gauge)
    occupancy: AtomicU64,
    /// Scored submissions, bucketed by total confidence
    confidence_buckets: [AtomicU64; CONFIDENCE_NUM_BUCKETS],
    confidence_sum: AtomicU64,
    events_persisted_total: AtomicU64,
    persist_retries_total: AtomicU64,
    /// Events given up on after all retries
    persist_failures_total: AtomicU64,
    /// Events whose send waited for channel capacity
    persist_deferred_total: AtomicU64,
    /// Events that never reached the persistence worker
    persist_dropped_total: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            submissions_total: AtomicU64::new(0),
            submissions_since_report: AtomicU64::new(0),
            accepted_auto_total: AtomicU64::new(0),
            accepted_manual_total: AtomicU64::new(0),
            rejected_borderline_total: AtomicU64::new(0),
            rejected_low_total: AtomicU64::new(0),
            validation_errors_total: AtomicU64::new(0),
            occupancy_noops_total: AtomicU64::new(0),
            occupancy: AtomicU64::new(0),
            confidence_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            confidence_sum: AtomicU64::new(0),
            events_persisted_total: AtomicU64::new(0),
            persist_retries_total: AtomicU64::new(0),
            persist_failures_total: AtomicU64::new(0),
            persist_deferred_total: AtomicU64::new(0),
            persist_dropped_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_submission(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
        self.submissions_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_validation_error(&self) {
        self.validation_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the total confidence of a scored submission
    #[inline]
    pub fn record_confidence(&self, confidence: u8) {
        self.confidence_buckets[confidence_bucket_index(confidence)]
            .fetch_add(1, Ordering::Relaxed);
        self.confidence_sum.fetch_add(u64::from(confidence), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_accepted(&self, manual: bool) {
        if manual {
            self.accepted_manual_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.accepted_auto_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_rejected(&self, borderline: bool) {
        if borderline {
            self.rejected_borderline_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_low_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_occupancy_noop(&self) {
        self.occupancy_noops_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_occupancy(&self, count: usize) {
        self.occupancy.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persisted(&self) {
        self.events_persisted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_retry(&self) {
        self.persist_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_failure(&self) {
        self.persist_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_deferred(&self) {
        self.persist_deferred_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_dropped(&self) {
        self.persist_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn occupancy(&self) -> u64 {
        self.occupancy.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters
    ///
    /// Monotonic counters are read as-is; only the per-interval submission
    /// counter is swapped back to zero.
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let interval_submissions = self.submissions_since_report.swap(0, Ordering::Relaxed);
        let submissions_per_sec =
            if elapsed_secs > 0.0 { interval_submissions as f64 / elapsed_secs } else { 0.0 };

        let mut confidence_buckets = [0u64; CONFIDENCE_NUM_BUCKETS];
        for (i, bucket) in self.confidence_buckets.iter().enumerate() {
            confidence_buckets[i] = bucket.load(Ordering::Relaxed);
        }
        let scored: u64 = confidence_buckets.iter().sum();
        let confidence_sum = self.confidence_sum.load(Ordering::Relaxed);

        MetricsSummary {
            submissions_total: self.submissions_total.load(Ordering::Relaxed),
            submissions_per_sec,
            accepted_auto_total: self.accepted_auto_total.load(Ordering::Relaxed),
            accepted_manual_total: self.accepted_manual_total.load(Ordering::Relaxed),
            rejected_borderline_total: self.rejected_borderline_total.load(Ordering::Relaxed),
            rejected_low_total: self.rejected_low_total.load(Ordering::Relaxed),
            validation_errors_total: self.validation_errors_total.load(Ordering::Relaxed),
            occupancy_noops_total: self.occupancy_noops_total.load(Ordering::Relaxed),
            occupancy: self.occupancy.load(Ordering::Relaxed),
            confidence_buckets,
            confidence_sum,
            confidence_avg: if scored > 0 { confidence_sum / scored } else { 0 },
            events_persisted_total: self.events_persisted_total.load(Ordering::Relaxed),
            persist_retries_total: self.persist_retries_total.load(Ordering::Relaxed),
            persist_failures_total: self.persist_failures_total.load(Ordering::Relaxed),
            persist_deferred_total: self.persist_deferred_total.load(Ordering::Relaxed),
            persist_dropped_total: self.persist_dropped_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the collector
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub submissions_total: u64,
    pub submissions_per_sec: f64,
    pub accepted_auto_total: u64,
    pub accepted_manual_total: u64,
    pub rejected_borderline_total: u64,
    pub rejected_low_total: u64,
    pub validation_errors_total: u64,
    pub occupancy_noops_total: u64,
    pub occupancy: u64,
    pub confidence_buckets: [u64; CONFIDENCE_NUM_BUCKETS],
    pub confidence_sum: u64,
    pub confidence_avg: u64,
    pub events_persisted_total: u64,
    pub persist_retries_total: u64,
    pub persist_failures_total: u64,
    pub persist_deferred_total: u64,
    pub persist_dropped_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            submissions = %self.submissions_total,
            submissions_per_sec = %format!("{:.2}", self.submissions_per_sec),
            accepted_auto = %self.accepted_auto_total,
            accepted_manual = %self.accepted_manual_total,
            rejected_borderline = %self.rejected_borderline_total,
            rejected_low = %self.rejected_low_total,
            validation_errors = %self.validation_errors_total,
            occupancy = %self.occupancy,
            confidence_avg = %self.confidence_avg,
            persisted = %self.events_persisted_total,
            persist_failures = %self.persist_failures_total,
            persist_deferred = %self.persist_deferred_total,
            persist_dropped = %self.persist_dropped_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bucket_index() {
        assert_eq!(confidence_bucket_index(0), 0);
        assert_eq!(confidence_bucket_index(10), 0);
        assert_eq!(confidence_bucket_index(11), 1);
        assert_eq!(confidence_bucket_index(79), 7);
        assert_eq!(confidence_bucket_index(80), 7);
        assert_eq!(confidence_bucket_index(100), 9);
    }

    #[test]
    fn test_report_counts() {
        let metrics = Metrics::new();
        metrics.record_submission();
        metrics.record_submission();
        metrics.record_submission();
        metrics.record_confidence(100);
        metrics.record_confidence(60);
        metrics.record_accepted(false);
        metrics.record_rejected(true);
        metrics.record_validation_error();
        metrics.set_occupancy(4);

        let summary = metrics.report();
        assert_eq!(summary.submissions_total, 3);
        assert_eq!(summary.accepted_auto_total, 1);
        assert_eq!(summary.accepted_manual_total, 0);
        assert_eq!(summary.rejected_borderline_total, 1);
        assert_eq!(summary.validation_errors_total, 1);
        assert_eq!(summary.occupancy, 4);
        assert_eq!(summary.confidence_buckets[9], 1);
        assert_eq!(summary.confidence_buckets[5], 1);
        assert_eq!(summary.confidence_avg, 80);
    }

    #[test]
    fn test_report_resets_interval_only() {
        let metrics = Metrics::new();
        metrics.record_submission();
        let _ = metrics.report();
        metrics.record_submission();
        let summary = metrics.report();
        assert_eq!(summary.submissions_total, 2);
    }
}
