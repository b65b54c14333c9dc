//! Metrics module for Prometheus-based monitoring.
//!
//! Counters and gauges for task attempts, retries, cancellations and pool
//! size. Recording is always safe; nothing is collected until
//! `init_metrics()` is called.
//!
//! # Example
//!
//! ```ignore
//! use taskpool::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run the pool ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};
