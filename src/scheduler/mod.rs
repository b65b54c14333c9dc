//! In-process worker pool with priority scheduling and retries.
//!
//! This module provides the task execution infrastructure:
//!
//! - **WorkerPool**: Manager actor plus a cloneable handle for submitting,
//!   observing and cancelling tasks
//! - **PriorityQueue**: Pending tasks, highest priority first, FIFO on ties
//! - **ResultBroker**: Per-task fan-out of attempt results
//! - **Worker**: Isolated execution context that runs one task at a time
//!
//! # Architecture
//!
//! ```text
//!      submit / cancel / shutdown        results_of / status
//!               │                               ▲
//!        ┌──────▼───────┐               ┌───────┴──────┐
//!        │  WorkerPool  │               │ ResultBroker │
//!        │   (handle)   │               │  (per task)  │
//!        └──────┬───────┘               └───────▲──────┘
//!               │ commands                      │ publish
//!        ┌──────▼───────────────────────────────┴──────┐
//!        │        manager actor (PoolState)            │
//!        │   PriorityQueue · workers · retry policy    │
//!        └──────┬───────────────────▲──────────────────┘
//!               │ assign            │ ready / completed / exited
//!    ┌──────────┼───────────────────┼──────────┐
//!    ▼          ▼                   │          ▼
//! ┌─────────┐ ┌─────────┐      ┌─────────┐
//! │ Worker 0│ │ Worker 1│ ...  │ Worker N│
//! └─────────┘ └─────────┘      └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use taskpool::config::PoolConfig;
//! use taskpool::scheduler::{payload_fn, WorkerPool};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_max_workers(8))?;
//!
//! let double = payload_fn("double", |args| async move {
//!     Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
//! });
//! let id = pool.submit(double, vec![json!(21)], 5);
//!
//! let mut results = pool.results_of(&id);
//! while let Some(result) = results.next().await {
//!     println!("attempt {}: {:?}", result.attempt, result.value);
//! }
//!
//! pool.shutdown();
//! pool.wait_stopped().await;
//! ```
//!
//! # Reliability Features
//!
//! - **Retries**: Failed attempts are re-queued until the retry budget runs out
//! - **Isolation**: A failing or panicking task only affects its own result
//! - **Cancellation**: Killing a worker never delivers a late result
//! - **Draining shutdown**: Busy workers finish and publish before teardown

pub mod broker;
pub mod queue;
pub mod resources;
pub mod task;
pub mod worker;
pub mod worker_pool;

// Re-export main types for convenience
pub use broker::{ResultBroker, ResultStream};
pub use queue::{PriorityQueue, QueueError};
pub use resources::MemorySampler;
pub use task::{
    payload_fn, FnPayload, Payload, Task, TaskId, TaskResult, WorkerId, WorkerStatus,
    DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY,
};
pub use worker::{Assignment, Worker};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
