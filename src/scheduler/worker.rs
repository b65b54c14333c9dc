//! A single isolated execution context.
//!
//! Each worker is its own tokio task. It owns a private inbox for
//! assignments and talks to the pool manager only through the event
//! channel: it announces itself with `Ready` once its inbox exists, sends
//! exactly one `Completed` per assignment, and sends `Exited` if its loop
//! ends for any reason other than being killed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::resources::MemorySampler;
use super::task::{Payload, Task, TaskId, TaskResult, WorkerId};
use super::worker_pool::PoolError;

/// What a worker receives for one attempt. The worker keeps nothing of it
/// once the attempt's result has been sent.
pub struct Assignment {
    pub task_id: TaskId,
    pub attempt: u32,
    pub payload: Arc<dyn Payload>,
    pub args: Vec<Value>,
}

impl Assignment {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            attempt: task.attempt(),
            payload: Arc::clone(&task.payload),
            args: task.args.clone(),
        }
    }
}

/// Messages from workers to the pool manager.
pub(crate) enum WorkerEvent {
    /// Handshake finished; the worker accepts assignments on `inbox`.
    Ready {
        worker_id: WorkerId,
        inbox: mpsc::Sender<Assignment>,
    },
    /// One attempt finished.
    Completed {
        worker_id: WorkerId,
        result: TaskResult,
    },
    /// The worker loop is gone.
    Exited { worker_id: WorkerId, reason: String },
}

/// Manager-side handle to a worker task.
pub struct Worker {
    id: WorkerId,
    handle: JoinHandle<()>,
    inbox: Option<mpsc::Sender<Assignment>>,
}

impl Worker {
    /// Starts a new worker task on the ambient tokio runtime.
    ///
    /// The worker is not usable until its `Ready` event arrives and
    /// [`Worker::connect`] has been called with the announced inbox.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::SpawnFailed` when there is no runtime to run on.
    pub(crate) fn spawn(
        id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
        sampler: Option<Arc<MemorySampler>>,
    ) -> Result<Self, PoolError> {
        let runtime = Handle::try_current().map_err(|e| PoolError::SpawnFailed {
            worker_id: id.to_string(),
            reason: e.to_string(),
        })?;

        let worker_id = id.clone();
        let handle = runtime.spawn(async move {
            let reason = match AssertUnwindSafe(run(worker_id.clone(), events.clone(), sampler))
                .catch_unwind()
                .await
            {
                Ok(()) => "inbox closed".to_string(),
                Err(panic) => format!("worker panicked: {}", panic_message(&*panic)),
            };
            let _ = events.send(WorkerEvent::Exited { worker_id, reason });
        });

        Ok(Self {
            id,
            handle,
            inbox: None,
        })
    }

    /// Completes the handshake with the inbox the worker announced.
    pub(crate) fn connect(&mut self, inbox: mpsc::Sender<Assignment>) {
        self.inbox = Some(inbox);
    }

    /// Returns whether the worker finished its handshake and is still
    /// reachable.
    pub fn is_connected(&self) -> bool {
        self.inbox.as_ref().is_some_and(|inbox| !inbox.is_closed())
    }

    /// Hands an attempt to the worker.
    ///
    /// The caller must only assign to idle, connected workers. If the
    /// worker cannot take it, the assignment is handed back.
    pub(crate) fn assign(&self, assignment: Assignment) -> Result<(), Assignment> {
        match &self.inbox {
            Some(inbox) => inbox.try_send(assignment).map_err(|e| match e {
                mpsc::error::TrySendError::Full(a) | mpsc::error::TrySendError::Closed(a) => a,
            }),
            None => Err(assignment),
        }
    }

    /// Tears the worker down. Whatever it was running reports nothing.
    ///
    /// Cancellation is cooperative at the await level: the payload future
    /// is dropped the next time it yields. A payload that spins on CPU or
    /// blocks its thread keeps running until it reaches an `.await`, and on
    /// a current-thread runtime it holds up the pool manager until then.
    /// Such payloads should move their work onto
    /// `tokio::task::spawn_blocking` (which is not interrupted by `kill`)
    /// or yield regularly.
    pub fn kill(self) {
        trace!(worker_id = %self.id, "Killing worker");
        self.handle.abort();
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }
}

/// Worker loop: handshake, then one result per assignment.
async fn run(
    id: WorkerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
    sampler: Option<Arc<MemorySampler>>,
) {
    let (inbox, mut assignments) = mpsc::channel(1);
    if events
        .send(WorkerEvent::Ready {
            worker_id: id.clone(),
            inbox,
        })
        .is_err()
    {
        return;
    }

    debug!(worker_id = %id, "Worker ready");

    while let Some(assignment) = assignments.recv().await {
        let result = execute(&id, assignment, sampler.as_deref()).await;
        let completed = WorkerEvent::Completed {
            worker_id: id.clone(),
            result,
        };
        if events.send(completed).is_err() {
            break;
        }
    }
}

/// Runs one attempt and captures its outcome. Errors and panics raised by
/// the payload become the result's `error`; they never escape.
pub(crate) async fn execute(
    worker_id: &WorkerId,
    assignment: Assignment,
    sampler: Option<&MemorySampler>,
) -> TaskResult {
    let Assignment {
        task_id,
        attempt,
        payload,
        args,
    } = assignment;

    debug!(
        worker_id = %worker_id,
        task_id = %task_id,
        payload = payload.name(),
        attempt,
        "Running task"
    );

    let started_at = Utc::now();
    let clock = Instant::now();
    let outcome = AssertUnwindSafe(payload.invoke(args)).catch_unwind().await;
    let duration = clock.elapsed();
    let memory_usage = sampler.and_then(MemorySampler::sample);
    let worker_id = worker_id.clone();

    match outcome {
        Ok(Ok(value)) => TaskResult::success(
            task_id,
            attempt,
            worker_id,
            value,
            started_at,
            duration,
            memory_usage,
        ),
        Ok(Err(e)) => TaskResult::failure(
            task_id,
            attempt,
            worker_id,
            format!("{:#}", e),
            started_at,
            duration,
            memory_usage,
        ),
        Err(panic) => TaskResult::failure(
            task_id,
            attempt,
            worker_id,
            format!("task panicked: {}", panic_message(&*panic)),
            started_at,
            duration,
            memory_usage,
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::payload_fn;
    use std::time::Duration;

    fn assignment(payload: Arc<dyn Payload>, args: Vec<Value>) -> Assignment {
        Assignment {
            task_id: TaskId::generate(),
            attempt: 1,
            payload,
            args,
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("worker event should arrive")
            .expect("event channel should be open")
    }

    #[tokio::test]
    async fn test_execute_success() {
        let payload = payload_fn("double", |args| async move {
            let n = args[0].as_i64().unwrap_or_default();
            Ok(Value::from(n * 2))
        });
        let job = assignment(payload, vec![Value::from(21)]);
        let task_id = job.task_id.clone();

        let result = execute(&WorkerId::from_seq(0), job, None).await;

        assert_eq!(result.task_id, task_id);
        assert!(result.is_success());
        assert_eq!(result.value, Some(Value::from(42)));
        assert!(result.memory_usage.is_none());
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_execute_captures_error() {
        let payload = payload_fn("fails", |_| async {
            Err(anyhow::anyhow!("disk full").context("writing output"))
        });

        let result = execute(&WorkerId::from_seq(0), assignment(payload, vec![]), None).await;

        assert!(!result.is_success());
        assert!(result.value.is_none());
        let error = result.error.expect("error should be set");
        assert!(error.contains("writing output"));
        assert!(error.contains("disk full"));
    }

    #[tokio::test]
    async fn test_execute_captures_panic() {
        let payload = payload_fn("panics", |_| async {
            if true {
                panic!("index out of range");
            }
            Ok(Value::Null)
        });

        let result = execute(&WorkerId::from_seq(0), assignment(payload, vec![]), None).await;

        let error = result.error.expect("panic should be reported as error");
        assert!(error.contains("index out of range"));
    }

    #[tokio::test]
    async fn test_execute_samples_memory_when_enabled() {
        let sampler = MemorySampler::new();
        let payload = payload_fn("noop", |_| async { Ok(Value::Null) });

        let result = execute(
            &WorkerId::from_seq(0),
            assignment(payload, vec![]),
            Some(&sampler),
        )
        .await;

        assert_eq!(result.memory_usage.is_some(), sampler.sample().is_some());
    }

    #[test]
    fn test_spawn_without_runtime_fails() {
        let (events, _rx) = mpsc::unbounded_channel();

        let err = Worker::spawn(WorkerId::from_seq(3), events, None)
            .err()
            .expect("spawn outside a runtime must fail");

        assert!(err.to_string().contains("worker-3"));
    }

    #[tokio::test]
    async fn test_handshake_assign_and_exit() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId::from_seq(0), events, None).unwrap();
        assert!(!worker.is_connected());

        let WorkerEvent::Ready { worker_id, inbox } = next_event(&mut rx).await else {
            panic!("first event must be Ready");
        };
        assert_eq!(&worker_id, worker.id());
        worker.connect(inbox);
        assert!(worker.is_connected());

        let payload = payload_fn("echo", |args| async move { Ok(Value::Array(args)) });
        let job = assignment(payload, vec![Value::from("hi")]);
        let task_id = job.task_id.clone();
        assert!(worker.assign(job).is_ok());

        let WorkerEvent::Completed { result, .. } = next_event(&mut rx).await else {
            panic!("expected Completed");
        };
        assert_eq!(result.task_id, task_id);
        assert_eq!(result.value, Some(Value::Array(vec![Value::from("hi")])));

        // Dropping the only inbox sender ends the loop.
        worker.inbox = None;
        let WorkerEvent::Exited { reason, .. } = next_event(&mut rx).await else {
            panic!("expected Exited");
        };
        assert_eq!(reason, "inbox closed");
    }

    #[tokio::test]
    async fn test_assign_before_handshake_hands_back() {
        let (events, _rx) = mpsc::unbounded_channel();
        let worker = Worker::spawn(WorkerId::from_seq(0), events, None).unwrap();
        let payload = payload_fn("noop", |_| async { Ok(Value::Null) });

        let returned = worker.assign(assignment(payload, vec![]));
        assert!(returned.is_err());
        worker.kill();
    }

    #[tokio::test]
    async fn test_kill_reports_nothing() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId::from_seq(0), events, None).unwrap();

        let WorkerEvent::Ready { inbox, .. } = next_event(&mut rx).await else {
            panic!("first event must be Ready");
        };
        worker.connect(inbox);

        let payload = payload_fn("forever", |_| async {
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        });
        assert!(worker.assign(assignment(payload, vec![])).is_ok());
        tokio::task::yield_now().await;
        worker.kill();

        // Every sender died with the aborted task: no Completed, no Exited.
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("channel should close after abort");
        assert!(next.is_none());
    }
}
