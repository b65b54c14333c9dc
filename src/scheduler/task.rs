//! Task definitions for the scheduler.
//!
//! This module defines the core data types that flow through the pool:
//!
//! - `Payload`: the opaque invocable unit a task runs
//! - `Task`: a unit of work with priority, retry budget and identity
//! - `TaskResult`: the outcome of one execution attempt
//! - `WorkerStatus`: a read-only view of one worker

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of retries granted to a task after its first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default priority for tasks (0 is normal priority).
pub const DEFAULT_PRIORITY: i32 = 0;

/// Opaque task identifier, generated at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh, unique identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque worker identity, stable for the worker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Builds the identity of the `seq`-th worker spawned by a pool.
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("worker-{}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The invocable unit carried by a task.
///
/// The engine treats a payload as opaque: it is handed its ordered argument
/// list and either produces a value or fails. Failures (including panics)
/// are captured per attempt and never escape the worker.
///
/// `invoke` runs on the async runtime. Cancelling a task drops the future
/// at its next `.await`, so long CPU-bound or blocking sections should be
/// wrapped in `tokio::task::spawn_blocking` or broken up with
/// `tokio::task::yield_now`; otherwise they delay cancellation and stall
/// other tasks sharing the runtime thread.
#[async_trait]
pub trait Payload: Send + Sync {
    /// Runs the payload once with the given arguments.
    async fn invoke(&self, args: Vec<Value>) -> anyhow::Result<Value>;

    /// Short name used in log output.
    fn name(&self) -> &str {
        "task"
    }
}

/// Adapter turning an async closure into a [`Payload`].
pub struct FnPayload<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F, Fut> Payload for FnPayload<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn invoke(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.func)(args).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps an async closure as a shareable payload.
///
/// ```rust,ignore
/// let add = payload_fn("add", |args| async move {
///     let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
///     Ok(serde_json::json!(sum))
/// });
/// ```
pub fn payload_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn Payload>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnPayload {
        name: name.into(),
        func,
    })
}

/// A unit of work owned by the pool manager while queued.
///
/// The descriptor (`id`, `payload`, `args`, `priority`, `max_retries`) never
/// changes after submission; `retry_count` and `start_time` are updated by
/// the manager as the task moves through dispatch and retries.
#[derive(Clone)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// What to run.
    pub payload: Arc<dyn Payload>,
    /// Ordered arguments handed to the payload.
    pub args: Vec<Value>,
    /// Higher values are dispatched first.
    pub priority: i32,
    /// Retries granted after the first attempt.
    pub max_retries: u32,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// When the current attempt was dispatched.
    pub start_time: Option<DateTime<Utc>>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a task with a fresh id, default priority and default retries.
    pub fn new(payload: Arc<dyn Payload>, args: Vec<Value>) -> Self {
        Self {
            id: TaskId::generate(),
            payload,
            args,
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count: 0,
            start_time: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the priority. Negative priorities are valid.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns whether a failed attempt may be retried.
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns the number of retries left.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// 1-based number of the attempt that runs next (or is running).
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("payload", &self.payload.name())
            .field("args", &self.args)
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("retry_count", &self.retry_count)
            .field("start_time", &self.start_time)
            .finish()
    }
}

/// Outcome of one execution attempt.
///
/// Exactly one of `value` and `error` is set. A retried task produces one
/// result per attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// ID of the task that was executed.
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Success payload.
    pub value: Option<Value>,
    /// Failure description.
    pub error: Option<String>,
    /// Wall-clock time of the attempt.
    #[serde(rename = "duration_ms", with = "duration_millis")]
    pub duration: Duration,
    /// Resident memory in bytes sampled at completion, if available.
    pub memory_usage: Option<u64>,
    /// Worker that ran the attempt.
    pub worker_id: WorkerId,
    /// When the worker started the attempt.
    pub started_at: DateTime<Utc>,
    /// When the worker finished the attempt.
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Creates a successful attempt result.
    pub fn success(
        task_id: TaskId,
        attempt: u32,
        worker_id: WorkerId,
        value: Value,
        started_at: DateTime<Utc>,
        duration: Duration,
        memory_usage: Option<u64>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            value: Some(value),
            error: None,
            duration,
            memory_usage,
            worker_id,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Creates a failed attempt result.
    pub fn failure(
        task_id: TaskId,
        attempt: u32,
        worker_id: WorkerId,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        memory_usage: Option<u64>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            value: None,
            error: Some(error.into()),
            duration,
            memory_usage,
            worker_id,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Returns whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Read-only view of one live worker.
///
/// `current_task_id` is set iff the worker is busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub is_idle: bool,
    pub current_task_id: Option<TaskId>,
    pub task_start_time: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn idle(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            is_idle: true,
            current_task_id: None,
            task_start_time: None,
        }
    }

    pub fn busy(worker_id: WorkerId, task_id: TaskId, started: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            is_idle: false,
            current_task_id: Some(task_id),
            task_start_time: Some(started),
        }
    }
}
