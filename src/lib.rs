//! taskpool: in-process worker pool with priority scheduling and retries.
//!
//! Callers submit tasks (a payload, its arguments, a priority and a retry
//! budget) and receive a task id. A manager dispatches queued tasks to
//! isolated workers, grows the pool when the queue outgrows it, retries
//! failed attempts, and streams each attempt's result to subscribers.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod scheduler;

pub use config::{ConfigError, PoolConfig};
pub use scheduler::{
    payload_fn, Payload, PoolError, PoolStats, Task, TaskId, TaskResult, WorkerId, WorkerPool,
    WorkerStatus,
};
