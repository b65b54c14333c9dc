//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by taskpool and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all taskpool metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total attempts executed, labeled by outcome (success/failure).
pub static ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Attempt duration in seconds.
pub static ATTEMPT_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Total failed attempts that were re-queued.
pub static RETRIES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total tasks cancelled by callers.
pub static CANCELLATIONS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total tasks dropped without a terminal result.
pub static ABANDONED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total worker spawns that failed.
pub static SPAWN_FAILURES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Number of tasks waiting for a worker.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Number of live workers.
pub static WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently running a task.
pub static BUSY_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling it again is harmless: the first set of
/// metrics stays installed.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Attempt metrics
    let attempts_total = CounterVec::new(
        Opts::new("taskpool_attempts_total", "Total task attempts executed"),
        &["outcome"],
    )?;

    let attempt_duration = Histogram::with_opts(
        HistogramOpts::new(
            "taskpool_attempt_duration_seconds",
            "Task attempt duration in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )?;

    let retries_total = Counter::new(
        "taskpool_retries_total",
        "Total failed attempts re-queued for retry",
    )?;

    let cancellations_total =
        Counter::new("taskpool_cancellations_total", "Total tasks cancelled")?;

    let abandoned_total = Counter::new(
        "taskpool_abandoned_total",
        "Total tasks dropped without a terminal result",
    )?;

    let spawn_failures_total = Counter::new(
        "taskpool_spawn_failures_total",
        "Total worker spawn failures",
    )?;

    // Pool gauges
    let queue_depth = Gauge::new("taskpool_queue_depth", "Number of tasks waiting for a worker")?;
    let workers = Gauge::new("taskpool_workers", "Number of live workers")?;
    let busy_workers = Gauge::new(
        "taskpool_busy_workers",
        "Number of workers currently running a task",
    )?;

    registry.register(Box::new(attempts_total.clone()))?;
    registry.register(Box::new(attempt_duration.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;
    registry.register(Box::new(cancellations_total.clone()))?;
    registry.register(Box::new(abandoned_total.clone()))?;
    registry.register(Box::new(spawn_failures_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(workers.clone()))?;
    registry.register(Box::new(busy_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = ATTEMPTS_TOTAL.set(attempts_total);
    let _ = ATTEMPT_DURATION.set(attempt_duration);
    let _ = RETRIES_TOTAL.set(retries_total);
    let _ = CANCELLATIONS_TOTAL.set(cancellations_total);
    let _ = ABANDONED_TOTAL.set(abandoned_total);
    let _ = SPAWN_FAILURES_TOTAL.set(spawn_failures_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = WORKERS.set(workers);
    let _ = BUSY_WORKERS.set(busy_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// text is a single comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_init_metrics_twice_is_harmless() {
        let _ = init_metrics();
        let _ = init_metrics();
        assert!(REGISTRY.get().is_some());
        assert!(ATTEMPTS_TOTAL.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(counter) = RETRIES_TOTAL.get() {
            counter.inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("taskpool_retries_total"));
    }
}
