//! Per-task publish/subscribe of attempt results.
//!
//! Each task id maps to a channel entry holding one unbounded sender per
//! subscriber. Entries are created lazily by a subscription or by the pool
//! claiming the id at submission. Every attempt publishes one `TaskResult`
//! to all current subscribers; nobody misses an attempt for reading slowly.
//! Once the task reaches a terminal state the pool closes the entry, which
//! drops the senders: subscribers drain what they were sent and then end.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::task::{TaskId, TaskResult};

/// Sequence of results for one task, one item per attempt.
pub type ResultStream = Pin<Box<dyn Stream<Item = TaskResult> + Send>>;

#[derive(Default)]
struct Channel {
    subscribers: Vec<mpsc::UnboundedSender<TaskResult>>,
    /// Set while a submitted task owns this id.
    claimed: bool,
}

/// Registry of per-task result channels.
#[derive(Default)]
pub struct ResultBroker {
    channels: Mutex<HashMap<TaskId, Channel>>,
}

impl ResultBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `task_id` as owned by a live task.
    ///
    /// Returns `false` if the id is already claimed; the claim is released
    /// by [`ResultBroker::close`].
    pub fn claim(&self, task_id: &TaskId) -> bool {
        let mut channels = self.channels.lock();
        let channel = channels.entry(task_id.clone()).or_default();
        if channel.claimed {
            return false;
        }
        channel.claimed = true;
        true
    }

    /// Returns whether a live task owns `task_id`.
    pub fn is_claimed(&self, task_id: &TaskId) -> bool {
        self.channels
            .lock()
            .get(task_id)
            .is_some_and(|channel| channel.claimed)
    }

    /// Subscribes to every result published for `task_id` from now on.
    pub fn subscribe(&self, task_id: &TaskId) -> ResultStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(task_id.clone())
            .or_default()
            .subscribers
            .push(sender);

        Box::pin(UnboundedReceiverStream::new(receiver))
    }

    /// Delivers a result to all current subscribers of its task, pruning
    /// subscribers that have gone away.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, result: TaskResult) -> usize {
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(&result.task_id) else {
            debug!(task_id = %result.task_id, "Result published for a closed task");
            return 0;
        };

        channel
            .subscribers
            .retain(|subscriber| subscriber.send(result.clone()).is_ok());

        let delivered = channel.subscribers.len();
        if delivered == 0 {
            debug!(task_id = %result.task_id, "Result published with no subscribers");
        }
        delivered
    }

    /// Disposes a task's channel and releases its claim. Subscribers
    /// receive what was already sent and then see the end of the stream.
    pub fn close(&self, task_id: &TaskId) -> bool {
        self.channels.lock().remove(task_id).is_some()
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::WorkerId;
    use chrono::Utc;
    use futures::StreamExt;
    use serde_json::Value;
    use std::time::Duration;

    fn result_for(task_id: &TaskId, attempt: u32) -> TaskResult {
        TaskResult::success(
            task_id.clone(),
            attempt,
            WorkerId::from_seq(0),
            Value::from(attempt),
            Utc::now(),
            Duration::from_millis(1),
            None,
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();

        let mut first = broker.subscribe(&id);
        let mut second = broker.subscribe(&id);

        assert_eq!(broker.publish(result_for(&id, 1)), 2);

        assert_eq!(first.next().await.unwrap().attempt, 1);
        assert_eq!(second.next().await.unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_later_results() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();
        let _early = broker.subscribe(&id);

        broker.publish(result_for(&id, 1));
        let late = broker.subscribe(&id);
        broker.publish(result_for(&id, 2));
        broker.close(&id);

        let seen: Vec<u32> = late.map(|r| r.attempt).collect().await;
        assert_eq!(seen, vec![2]);
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_sent_results() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();
        let stream = broker.subscribe(&id);

        broker.publish(result_for(&id, 1));
        broker.publish(result_for(&id, 2));
        assert!(broker.close(&id));
        assert!(!broker.close(&id));

        let seen: Vec<u32> = stream.map(|r| r.attempt).collect().await;
        assert_eq!(seen, vec![1, 2]);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_slow_subscriber_receives_every_attempt() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();
        let stream = broker.subscribe(&id);

        for attempt in 1..=500 {
            assert_eq!(broker.publish(result_for(&id, attempt)), 1);
        }
        broker.close(&id);

        let seen: Vec<u32> = stream.map(|r| r.attempt).collect().await;
        assert_eq!(seen, (1..=500).collect::<Vec<_>>());
    }

    #[test]
    fn test_publish_to_unknown_task_is_dropped() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();

        assert_eq!(broker.publish(result_for(&id, 1)), 0);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();
        let kept = broker.subscribe(&id);
        drop(broker.subscribe(&id));

        assert_eq!(broker.publish(result_for(&id, 1)), 1);
        broker.close(&id);

        let seen: Vec<TaskResult> = kept.collect().await;
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_claim_is_exclusive_until_close() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();

        assert!(!broker.is_claimed(&id));
        assert!(broker.claim(&id));
        assert!(broker.is_claimed(&id));
        assert!(!broker.claim(&id));

        broker.close(&id);
        assert!(!broker.is_claimed(&id));
        assert!(broker.claim(&id));
    }

    #[tokio::test]
    async fn test_claim_keeps_existing_subscribers() {
        let broker = ResultBroker::new();
        let id = TaskId::generate();
        let stream = broker.subscribe(&id);

        assert!(broker.claim(&id));
        broker.publish(result_for(&id, 1));
        broker.close(&id);

        let seen: Vec<u32> = stream.map(|r| r.attempt).collect().await;
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_channels_are_isolated_per_task() {
        let broker = ResultBroker::new();
        let a = TaskId::generate();
        let b = TaskId::generate();
        let stream_a = broker.subscribe(&a);
        let _stream_b = broker.subscribe(&b);

        broker.publish(result_for(&b, 1));
        broker.publish(result_for(&a, 7));
        broker.close(&a);

        let seen: Vec<TaskResult> = stream_a.collect().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].task_id, a);
        assert_eq!(seen[0].attempt, 7);
    }
}
