//! Pending task queue
//!
//! Higher weight first, FIFO among tasks of equal weight.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::models::{Task, TaskId};
use crate::report::ReportNode;

/// A task waiting for a worker, with its attempt history
#[derive(Clone, Debug)]
pub struct QueuedTask {
    pub task: Task,
    /// Zero-based attempt number
    pub attempt: u32,
    /// Reports of earlier attempts
    pub previous: Vec<ReportNode>,
    seq: u64,
}

impl QueuedTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            attempt: 0,
            previous: Vec::new(),
            seq: 0,
        }
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .weight
            .cmp(&other.task.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.requeue(QueuedTask::new(task));
    }

    /// Put an entry back, behind everything of the same weight
    pub fn requeue(&mut self, mut entry: QueuedTask) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.heap.iter().any(|entry| &entry.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every entry in pop order
    pub fn drain(&mut self) -> Vec<QueuedTask> {
        let mut entries = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            entries.push(entry);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(queue: &mut TaskQueue) -> Vec<String> {
        queue.drain().into_iter().map(|e| e.task.target).collect()
    }

    #[test]
    fn test_weight_then_fifo() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("a"));
        queue.push(Task::new("b").with_weight(5));
        queue.push(Task::new("c"));
        queue.push(Task::new("d").with_weight(5));
        queue.push(Task::new("e").with_weight(-1));
        assert_eq!(queue.len(), 5);
        assert_eq!(targets(&mut queue), vec!["b", "d", "a", "c", "e"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_behind_equal_weight() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("a"));
        queue.push(Task::new("b"));
        let mut first = queue.pop().unwrap();
        assert_eq!(first.task.target, "a");
        first.attempt += 1;
        queue.requeue(first);
        let order: Vec<(String, u32)> = queue
            .drain()
            .into_iter()
            .map(|e| (e.task.target, e.attempt))
            .collect();
        assert_eq!(order, vec![("b".to_string(), 0), ("a".to_string(), 1)]);
    }

    #[test]
    fn test_contains() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("a").with_id("t1"));
        assert!(queue.contains(&TaskId::new("t1")));
        assert!(!queue.contains(&TaskId::new("t2")));
    }
}
