//! High-level recording interface for pool metrics.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with methods named
//! after pool events. Every method is a no-op until `init_metrics()` has
//! run, so the pool can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    ABANDONED_TOTAL, ATTEMPTS_TOTAL, ATTEMPT_DURATION, BUSY_WORKERS, CANCELLATIONS_TOTAL,
    QUEUE_DEPTH, RETRIES_TOTAL, SPAWN_FAILURES_TOTAL, WORKERS,
};

/// Metrics collector for pool operational metrics.
///
/// # Example
///
/// ```ignore
/// use taskpool::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_attempt(true, Duration::from_millis(120));
/// collector.update_pool(3, 8, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one finished attempt.
    pub fn record_attempt(&self, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };

        if let Some(attempts_total) = ATTEMPTS_TOTAL.get() {
            attempts_total.with_label_values(&[outcome]).inc();
        }

        if let Some(attempt_duration) = ATTEMPT_DURATION.get() {
            attempt_duration.observe(duration.as_secs_f64());
        }

        tracing::trace!(
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Recorded attempt metric"
        );
    }

    /// Record a failed attempt that was re-queued.
    pub fn record_retry(&self) {
        if let Some(retries) = RETRIES_TOTAL.get() {
            retries.inc();
        }
    }

    /// Record a caller cancellation.
    pub fn record_cancellation(&self) {
        if let Some(cancellations) = CANCELLATIONS_TOTAL.get() {
            cancellations.inc();
        }
    }

    /// Record tasks dropped without a terminal result.
    pub fn record_abandoned(&self, count: usize) {
        if let Some(abandoned) = ABANDONED_TOTAL.get() {
            abandoned.inc_by(count as f64);
        }
    }

    /// Record a worker that could not be spawned.
    pub fn record_spawn_failure(&self) {
        if let Some(failures) = SPAWN_FAILURES_TOTAL.get() {
            failures.inc();
        }
    }

    /// Update the pool gauges.
    ///
    /// # Arguments
    ///
    /// * `queued` - Tasks waiting for a worker
    /// * `workers` - Live workers
    /// * `busy` - Workers currently running a task
    pub fn update_pool(&self, queued: usize, workers: usize, busy: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.set(queued as f64);
        }

        if let Some(gauge) = WORKERS.get() {
            gauge.set(workers as f64);
        }

        if let Some(gauge) = BUSY_WORKERS.get() {
            gauge.set(busy as f64);
        }

        tracing::trace!(queued, workers, busy, "Updated pool gauges");
    }
}
