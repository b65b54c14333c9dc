//! In-memory priority queue of pending tasks.
//!
//! Tasks are ordered by priority (higher first); ties are broken by
//! insertion order so that equal-priority tasks are served first-in,
//! first-out. The queue refuses to hold the same task id twice.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use thiserror::Error;

use super::task::{Task, TaskId};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The task is already queued.
    #[error("Task {0} is already queued")]
    Duplicate(TaskId),
}

/// Heap entry: priority first, then the reverse of insertion order.
struct Entry {
    priority: i32,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-priority queue with FIFO tie-breaking.
#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    ids: HashSet<TaskId>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task in O(log n).
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Duplicate` if a task with the same id is queued.
    pub fn push(&mut self, task: Task) -> Result<(), QueueError> {
        if !self.ids.insert(task.id.clone()) {
            return Err(QueueError::Duplicate(task.id));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: task.priority,
            seq,
            task,
        });
        Ok(())
    }

    /// Removes and returns the highest-priority task, oldest first among equals.
    pub fn pop_highest(&mut self) -> Option<Task> {
        let entry = self.heap.pop()?;
        self.ids.remove(&entry.task.id);
        Some(entry.task)
    }

    /// Returns the task that `pop_highest` would return, without removing it.
    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|entry| &entry.task)
    }

    /// Removes a queued task by id. O(n); relative order of the rest is kept.
    pub fn remove(&mut self, task_id: &TaskId) -> Option<Task> {
        if !self.ids.remove(task_id) {
            return None;
        }

        let (removed, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|entry| &entry.task.id == task_id);
        self.heap = BinaryHeap::from(kept);

        removed.into_iter().next().map(|entry| entry.task)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.ids.contains(task_id)
    }

    /// Iterates over queued tasks in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.heap.iter().map(|entry| &entry.task)
    }

    /// Removes every queued task, highest priority first.
    pub fn drain(&mut self) -> Vec<Task> {
        self.ids.clear();
        std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.task)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
