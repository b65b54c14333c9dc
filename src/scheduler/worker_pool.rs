//! Worker pool manager.
//!
//! The manager is a single actor task that owns the priority queue, the
//! worker map and every scheduling decision. `WorkerPool` is a cheap,
//! cloneable handle that talks to the actor over a command channel; workers
//! talk to it over an event channel. Because the actor handles one message
//! at a time, no state is shared with workers and no locking is needed
//! around the queue or the worker map.
//!
//! # Features
//!
//! - Priority dispatch with FIFO tie-breaking
//! - Retry on failure until the task's budget is exhausted
//! - Growth by one worker whenever the queue outgrows the pool, up to a cap
//! - Non-graceful cancellation that kills the worker running the task
//! - Draining shutdown that tears workers down as they go idle
//! - Status snapshots, a polling status stream and pool statistics

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, PoolConfig};
use crate::metrics::MetricsCollector;

use super::broker::{ResultBroker, ResultStream};
use super::queue::PriorityQueue;
use super::resources::MemorySampler;
use super::task::{Payload, Task, TaskId, TaskResult, WorkerId, WorkerStatus};
use super::worker::{Assignment, Worker, WorkerEvent};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration was rejected.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The pool was created outside a tokio runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// A worker task could not be started.
    #[error("Failed to spawn {worker_id}: {reason}")]
    SpawnFailed { worker_id: String, reason: String },

    /// A task with this id is already queued or running.
    #[error("Task {0} is already submitted")]
    DuplicateTask(TaskId),
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live workers.
    pub workers: usize,
    /// Workers currently running a task.
    pub busy_workers: usize,
    /// Tasks waiting for a worker.
    pub queued_tasks: usize,
    /// Tasks that finished with a successful attempt.
    pub tasks_completed: u64,
    /// Tasks whose last attempt failed with no retries left.
    pub tasks_failed: u64,
    /// Failed attempts that were re-queued.
    pub retries: u64,
    /// Tasks removed by `cancel`.
    pub tasks_cancelled: u64,
    /// Tasks dropped without a terminal result (shutdown, worker crash).
    pub tasks_abandoned: u64,
    /// Workers that failed to start.
    pub spawn_failures: u64,
    /// Mean wall-clock time of all attempts so far.
    pub average_attempt_ms: u64,
}

impl PoolStats {
    /// Returns the total number of tasks that reached a verdict.
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Running totals kept by the actor.
#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    retries: u64,
    cancelled: u64,
    abandoned: u64,
    spawn_failures: u64,
    attempts: u64,
    attempt_ms: u64,
}

impl Counters {
    fn record_attempt(&mut self, duration: Duration) {
        self.attempts += 1;
        self.attempt_ms += duration.as_millis() as u64;
    }

    fn to_stats(&self, workers: usize, busy_workers: usize, queued_tasks: usize) -> PoolStats {
        let average_attempt_ms = if self.attempts > 0 {
            self.attempt_ms / self.attempts
        } else {
            0
        };

        PoolStats {
            workers,
            busy_workers,
            queued_tasks,
            tasks_completed: self.completed,
            tasks_failed: self.failed,
            retries: self.retries,
            tasks_cancelled: self.cancelled,
            tasks_abandoned: self.abandoned,
            spawn_failures: self.spawn_failures,
            average_attempt_ms,
        }
    }
}

/// What the actor publishes after every message it handles.
#[derive(Debug, Clone, Default)]
struct PoolView {
    workers: Vec<WorkerStatus>,
    stats: PoolStats,
    stopped: bool,
}

enum Command {
    Submit(Task),
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// A live worker and the task it is running, if any.
struct WorkerSlot {
    worker: Worker,
    running: Option<Task>,
}

impl WorkerSlot {
    fn is_idle(&self) -> bool {
        self.running.is_none()
    }

    fn status(&self, worker_id: &WorkerId) -> WorkerStatus {
        match &self.running {
            Some(task) => WorkerStatus::busy(
                worker_id.clone(),
                task.id.clone(),
                task.start_time.unwrap_or_else(Utc::now),
            ),
            None => WorkerStatus::idle(worker_id.clone()),
        }
    }
}

/// Handle to a running pool.
///
/// Cloning is cheap; all clones drive the same pool. When the last handle
/// is dropped the pool shuts down as if `shutdown()` had been called.
#[derive(Clone)]
pub struct WorkerPool {
    config: PoolConfig,
    commands: mpsc::UnboundedSender<Command>,
    broker: Arc<ResultBroker>,
    view: watch::Receiver<PoolView>,
}

impl WorkerPool {
    /// Starts a pool and its initial workers on the ambient tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a rejected configuration and
    /// `PoolError::NoRuntime` when called outside a tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| PoolError::NoRuntime(e.to_string()))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(PoolView::default());
        let broker = Arc::new(ResultBroker::new());
        let sampler = config
            .sample_memory
            .then(|| Arc::new(MemorySampler::new()));

        let state = PoolState {
            config: config.clone(),
            queue: PriorityQueue::new(),
            workers: BTreeMap::new(),
            spawning: HashMap::new(),
            broker: Arc::clone(&broker),
            events: events_tx,
            sampler,
            view: view_tx,
            metrics: MetricsCollector::new(),
            counters: Counters::default(),
            next_worker_seq: 0,
            draining: false,
        };
        runtime.spawn(state.run(commands_rx, events_rx));

        Ok(Self {
            config,
            commands: commands_tx,
            broker,
            view: view_rx,
        })
    }

    /// Submits a task with the configured default retry budget.
    ///
    /// Never blocks; the returned id can be used with `results_of` and
    /// `cancel` straight away.
    pub fn submit(&self, payload: Arc<dyn Payload>, args: Vec<Value>, priority: i32) -> TaskId {
        self.submit_with_retries(payload, args, priority, self.config.default_max_retries)
    }

    /// Submits a task with an explicit retry budget.
    pub fn submit_with_retries(
        &self,
        payload: Arc<dyn Payload>,
        args: Vec<Value>,
        priority: i32,
        max_retries: u32,
    ) -> TaskId {
        let task = Task::new(payload, args)
            .with_priority(priority)
            .with_max_retries(max_retries);
        // A freshly generated id cannot collide with a live task.
        self.broker.claim(&task.id);
        self.send_submission(task)
    }

    /// Submits a prebuilt task.
    ///
    /// The id stays reserved from submission until the task reaches a
    /// terminal state; submitting the same id again (for instance a clone
    /// of the task) in that window is rejected and the live task is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DuplicateTask` if the id is queued or running.
    pub fn submit_task(&self, task: Task) -> Result<TaskId, PoolError> {
        if !self.broker.claim(&task.id) {
            warn!(task_id = %task.id, "Task id already in use, submission rejected");
            return Err(PoolError::DuplicateTask(task.id));
        }
        Ok(self.send_submission(task))
    }

    /// Sends an already claimed task to the manager.
    fn send_submission(&self, task: Task) -> TaskId {
        let task_id = task.id.clone();

        if self.commands.send(Command::Submit(task)).is_err() {
            warn!(task_id = %task_id, "Pool has stopped, task rejected");
            self.broker.close(&task_id);
        }

        task_id
    }

    /// Subscribes to the results of a task, one item per attempt.
    ///
    /// The stream ends once the task reaches a terminal state. For an
    /// unknown or already finished id it never yields anything.
    ///
    /// Results published before the call are not replayed. To observe every
    /// attempt, build the [`Task`], subscribe to its id, then `submit_task`.
    pub fn results_of(&self, task_id: &TaskId) -> ResultStream {
        self.broker.subscribe(task_id)
    }

    /// Returns a copy of every live worker's status.
    pub fn status_snapshot(&self) -> Vec<WorkerStatus> {
        self.view.borrow().workers.clone()
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.view.borrow().stats.clone()
    }

    /// Returns the number of tasks waiting for a worker.
    pub fn queued_tasks(&self) -> usize {
        self.view.borrow().stats.queued_tasks
    }

    /// Returns whether the pool still has workers or has not been shut down.
    pub fn is_running(&self) -> bool {
        !self.view.borrow().stopped
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Status snapshots at the configured interval.
    pub fn status_stream(&self) -> impl Stream<Item = Vec<WorkerStatus>> + Send + 'static {
        self.status_stream_every(self.config.status_interval)
    }

    /// Status snapshots every `every`, starting immediately.
    ///
    /// The stream ends after yielding the first snapshot taken once the
    /// pool has stopped (which is always empty).
    pub fn status_stream_every(
        &self,
        every: Duration,
    ) -> impl Stream<Item = Vec<WorkerStatus>> + Send + 'static {
        let view = self.view.clone();
        let every = every.max(Duration::from_millis(1));

        async_stream::stream! {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let (workers, stopped) = {
                    let current = view.borrow();
                    (current.workers.clone(), current.stopped)
                };
                let manager_gone = view.has_changed().is_err();

                yield workers;

                if stopped || manager_gone {
                    break;
                }
            }
        }
    }

    /// Cancels a task.
    ///
    /// A running task has its worker killed (no replacement is spawned by
    /// this call); a queued task is removed. Returns `false` when the id is
    /// unknown or already finished.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let (reply, answer) = oneshot::channel();
        let command = Command::Cancel {
            task_id: task_id.clone(),
            reply,
        };

        if self.commands.send(command).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Starts draining the pool. Safe to call any number of times.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("Shutdown requested on a pool that already stopped");
        }
    }

    /// Waits until every worker has been torn down.
    pub async fn wait_stopped(&self) {
        let mut view = self.view.clone();
        let _ = view.wait_for(|current| current.stopped).await;
    }
}

/// State owned by the manager actor.
struct PoolState {
    config: PoolConfig,
    queue: PriorityQueue,
    workers: BTreeMap<WorkerId, WorkerSlot>,
    /// Spawned workers still completing their handshake.
    spawning: HashMap<WorkerId, Worker>,
    broker: Arc<ResultBroker>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    sampler: Option<Arc<MemorySampler>>,
    view: watch::Sender<PoolView>,
    metrics: MetricsCollector,
    counters: Counters,
    next_worker_seq: u64,
    draining: bool,
}

impl PoolState {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        info!(
            initial_workers = self.config.initial_worker_count,
            max_workers = self.config.max_worker_count,
            "Worker pool started"
        );

        for _ in 0..self.config.initial_worker_count {
            self.spawn_worker();
        }
        self.publish_view();

        let mut commands_open = true;
        while !self.is_finished() {
            tokio::select! {
                biased;

                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All pool handles dropped, shutting down");
                        commands_open = false;
                        self.begin_shutdown();
                    }
                },
                else => break,
            }
            self.publish_view();
        }

        self.publish_view();
        info!(
            completed = self.counters.completed,
            failed = self.counters.failed,
            "Worker pool stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(task) => self.enqueue(task),
            Command::Cancel { task_id, reply } => {
                let cancelled = self.cancel(&task_id);
                self.publish_view();
                let _ = reply.send(cancelled);
            }
            Command::Shutdown => self.begin_shutdown(),
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { worker_id, inbox } => self.on_ready(worker_id, inbox),
            WorkerEvent::Completed { worker_id, result } => self.on_completed(worker_id, result),
            WorkerEvent::Exited { worker_id, reason } => self.on_exited(worker_id, reason),
        }
    }

    fn enqueue(&mut self, task: Task) {
        let task_id = task.id.clone();

        if self.draining {
            warn!(task_id = %task_id, "Pool is shutting down, task rejected");
            self.broker.close(&task_id);
            return;
        }

        let priority = task.priority;
        if let Err(e) = self.queue.push(task) {
            warn!(error = %e, "Task not queued");
            return;
        }

        debug!(
            task_id = %task_id,
            priority,
            queued = self.queue.len(),
            "Task queued"
        );

        self.dispatch();
        self.maybe_grow();
    }

    fn on_ready(&mut self, worker_id: WorkerId, inbox: mpsc::Sender<Assignment>) {
        let Some(mut worker) = self.spawning.remove(&worker_id) else {
            debug!(worker_id = %worker_id, "Ignoring handshake from removed worker");
            return;
        };

        if self.draining {
            worker.kill();
            return;
        }

        worker.connect(inbox);
        self.workers.insert(
            worker_id.clone(),
            WorkerSlot {
                worker,
                running: None,
            },
        );
        info!(worker_id = %worker_id, workers = self.workers.len(), "Worker joined pool");

        self.dispatch();
        self.maybe_grow();
    }

    fn on_completed(&mut self, worker_id: WorkerId, result: TaskResult) {
        let Some(slot) = self.workers.get_mut(&worker_id) else {
            debug!(
                worker_id = %worker_id,
                task_id = %result.task_id,
                "Dropping result from removed worker"
            );
            return;
        };

        let task = match slot.running.take() {
            Some(task) if task.id == result.task_id => task,
            other => {
                slot.running = other;
                warn!(
                    worker_id = %worker_id,
                    task_id = %result.task_id,
                    "Worker reported a result for a task it was not running"
                );
                return;
            }
        };

        self.metrics
            .record_attempt(result.is_success(), result.duration);
        self.counters.record_attempt(result.duration);
        self.settle(task, result);

        if self.draining {
            self.teardown(&worker_id);
        }

        self.dispatch();
        self.maybe_grow();
    }

    fn on_exited(&mut self, worker_id: WorkerId, reason: String) {
        if self.spawning.remove(&worker_id).is_some() {
            error!(worker_id = %worker_id, reason = %reason, "Worker exited before handshake");
            self.counters.spawn_failures += 1;
            self.metrics.record_spawn_failure();
            return;
        }

        let Some(slot) = self.workers.remove(&worker_id) else {
            return;
        };

        warn!(worker_id = %worker_id, reason = %reason, "Worker exited unexpectedly");
        if let Some(task) = slot.running {
            warn!(task_id = %task.id, "Abandoning task of exited worker");
            self.broker.close(&task.id);
            self.counters.abandoned += 1;
            self.metrics.record_abandoned(1);
        }

        self.dispatch();
        self.maybe_grow();
    }

    /// Applies the retry policy to a finished attempt and publishes it.
    fn settle(&mut self, mut task: Task, result: TaskResult) {
        let task_id = task.id.clone();

        if result.is_success() {
            info!(
                task_id = %task_id,
                attempt = result.attempt,
                duration_ms = result.duration.as_millis() as u64,
                "Task completed successfully"
            );
            self.counters.completed += 1;
            self.broker.publish(result);
            self.broker.close(&task_id);
            return;
        }

        if task.should_retry() && !self.draining {
            task.retry_count += 1;
            task.start_time = None;
            warn!(
                task_id = %task_id,
                attempt = result.attempt,
                remaining_retries = task.remaining_retries(),
                error = ?result.error,
                "Task attempt failed, requeueing for retry"
            );

            match self.queue.push(task) {
                Ok(()) => {
                    self.counters.retries += 1;
                    self.metrics.record_retry();
                    self.broker.publish(result);
                    return;
                }
                Err(e) => error!(error = %e, "Failed to requeue task"),
            }
        } else {
            error!(
                task_id = %task_id,
                attempts = result.attempt,
                error = ?result.error,
                "Task failed permanently"
            );
        }

        self.counters.failed += 1;
        self.broker.publish(result);
        self.broker.close(&task_id);
    }

    /// Assigns queued tasks to idle workers, highest priority first.
    fn dispatch(&mut self) {
        if self.draining {
            return;
        }

        while !self.queue.is_empty() {
            let Some(worker_id) = self
                .workers
                .iter()
                .find(|(_, slot)| slot.is_idle() && slot.worker.is_connected())
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            let Some(slot) = self.workers.get_mut(&worker_id) else {
                break;
            };
            let Some(mut task) = self.queue.pop_highest() else {
                break;
            };

            task.start_time = Some(Utc::now());
            match slot.worker.assign(Assignment::for_task(&task)) {
                Ok(()) => {
                    debug!(
                        worker_id = %worker_id,
                        task_id = %task.id,
                        priority = task.priority,
                        attempt = task.attempt(),
                        "Task dispatched"
                    );
                    slot.running = Some(task);
                }
                Err(_) => {
                    warn!(worker_id = %worker_id, "Worker unreachable, removing it from the pool");
                    task.start_time = None;
                    self.teardown(&worker_id);
                    if let Err(e) = self.queue.push(task) {
                        error!(error = %e, "Failed to requeue undelivered task");
                    }
                }
            }
        }
    }

    /// Adds one worker when the queue is longer than the pool.
    fn maybe_grow(&mut self) {
        if self.draining {
            return;
        }

        let current = self.workers.len() + self.spawning.len();
        if self.queue.len() > current && current < self.config.max_worker_count {
            debug!(
                queued = self.queue.len(),
                workers = current,
                "Queue outgrew pool, adding a worker"
            );
            self.spawn_worker();
        }
    }

    fn spawn_worker(&mut self) {
        let worker_id = WorkerId::from_seq(self.next_worker_seq);
        self.next_worker_seq += 1;

        match Worker::spawn(worker_id.clone(), self.events.clone(), self.sampler.clone()) {
            Ok(worker) => {
                debug!(worker_id = %worker_id, "Worker spawning");
                self.spawning.insert(worker_id, worker);
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn worker");
                self.counters.spawn_failures += 1;
                self.metrics.record_spawn_failure();
            }
        }
    }

    /// Kills the worker running `task_id`, or drops it from the queue.
    fn cancel(&mut self, task_id: &TaskId) -> bool {
        let running_on = self
            .workers
            .iter()
            .find(|(_, slot)| slot.running.as_ref().is_some_and(|task| &task.id == task_id))
            .map(|(id, _)| id.clone());

        let cancelled = if let Some(worker_id) = running_on {
            self.teardown(&worker_id);
            info!(task_id = %task_id, worker_id = %worker_id, "Cancelled running task, worker killed");
            true
        } else if self.queue.remove(task_id).is_some() {
            info!(task_id = %task_id, "Cancelled queued task");
            true
        } else {
            debug!(task_id = %task_id, "Cancel for unknown or finished task");
            false
        };

        if cancelled {
            self.broker.close(task_id);
            self.counters.cancelled += 1;
            self.metrics.record_cancellation();
        }
        cancelled
    }

    fn begin_shutdown(&mut self) {
        if self.draining {
            debug!("Shutdown already in progress");
            return;
        }
        self.draining = true;

        let abandoned = self.queue.drain();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Abandoning queued tasks on shutdown");
            for task in &abandoned {
                self.broker.close(&task.id);
            }
            self.counters.abandoned += abandoned.len() as u64;
            self.metrics.record_abandoned(abandoned.len());
        }

        for (_, worker) in self.spawning.drain() {
            worker.kill();
        }

        let idle: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, slot)| slot.is_idle())
            .map(|(id, _)| id.clone())
            .collect();
        for worker_id in &idle {
            self.teardown(worker_id);
        }

        info!(busy_workers = self.workers.len(), "Worker pool draining");
    }

    /// Removes a worker from the live set and kills it. A no-op for workers
    /// that are already gone.
    fn teardown(&mut self, worker_id: &WorkerId) {
        if let Some(slot) = self.workers.remove(worker_id) {
            debug!(worker_id = %worker_id, "Tearing down worker");
            slot.worker.kill();
        }
    }

    fn is_finished(&self) -> bool {
        self.draining && self.workers.is_empty() && self.spawning.is_empty()
    }

    fn publish_view(&self) {
        let workers: Vec<WorkerStatus> = self
            .workers
            .iter()
            .map(|(id, slot)| slot.status(id))
            .collect();
        let busy = workers.iter().filter(|status| !status.is_idle).count();

        self.metrics
            .update_pool(self.queue.len(), workers.len(), busy);

        let stats = self
            .counters
            .to_stats(workers.len(), busy, self.queue.len());
        self.view.send_replace(PoolView {
            workers,
            stats,
            stopped: self.is_finished(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::payload_fn;
    use futures::StreamExt;

    fn quiet_config() -> PoolConfig {
        PoolConfig::default()
            .with_initial_workers(1)
            .with_max_workers(2)
            .with_status_interval(Duration::from_millis(10))
            .with_memory_sampling(false)
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.workers, 0);
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.tasks_completed, 0);
        assert_eq!(stats.total_processed(), 0);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            tasks_completed: 80,
            tasks_failed: 20,
            ..Default::default()
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_average_duration() {
        let mut counters = Counters::default();
        counters.record_attempt(Duration::from_millis(10));
        counters.record_attempt(Duration::from_millis(20));
        counters.record_attempt(Duration::from_millis(30));
        counters.completed = 2;
        counters.failed = 1;

        let stats = counters.to_stats(3, 1, 4);
        assert_eq!(stats.average_attempt_ms, 20);
        assert_eq!(stats.workers, 3);
        assert_eq!(stats.busy_workers, 1);
        assert_eq!(stats.queued_tasks, 4);
        assert_eq!(stats.total_processed(), 3);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::NoRuntime("no reactor".to_string());
        assert!(err.to_string().contains("no reactor"));

        let err = PoolError::SpawnFailed {
            worker_id: "worker-7".to_string(),
            reason: "limit reached".to_string(),
        };
        assert!(err.to_string().contains("worker-7"));
        assert!(err.to_string().contains("limit reached"));

        let err = PoolError::DuplicateTask(TaskId::from("task-9"));
        assert!(err.to_string().contains("task-9"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = PoolConfig::default().with_initial_workers(5).with_max_workers(2);
        let err = WorkerPool::new(config).err().expect("config must be rejected");
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let err = WorkerPool::new(quiet_config())
            .err()
            .expect("no runtime is available");
        assert!(matches!(err, PoolError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn test_submit_runs_task_and_closes_stream() {
        let pool = WorkerPool::new(quiet_config()).unwrap();
        let payload = payload_fn("greet", |args| async move {
            let name = args[0].as_str().unwrap_or("nobody").to_string();
            Ok(Value::from(format!("hello {}", name)))
        });

        let id = pool.submit(payload, vec![Value::from("pool")], 0);
        let results: Vec<TaskResult> = tokio::time::timeout(
            Duration::from_secs(5),
            pool.results_of(&id).collect::<Vec<_>>(),
        )
        .await
        .expect("stream should end after the terminal result");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, Some(Value::from("hello pool")));
        assert_eq!(pool.stats().tasks_completed, 1);

        pool.shutdown();
        tokio::time::timeout(Duration::from_secs(5), pool.wait_stopped())
            .await
            .expect("pool should stop");
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_pool() {
        let pool = WorkerPool::new(quiet_config()).unwrap();
        let stream = pool.status_stream();
        drop(pool);

        let snapshots: Vec<Vec<WorkerStatus>> =
            tokio::time::timeout(Duration::from_secs(5), stream.collect())
                .await
                .expect("status stream should end once the pool stops");
        assert!(snapshots.last().is_some_and(|last| last.is_empty()));
    }
}
