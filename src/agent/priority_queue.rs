//! A small priority wheel for the pooled compilation agent.
//!
//! Grounded on `original_source/src/microjit/thread_pool.h`'s
//! `ThreadPool::Priority` enum (`SYSTEM=0, HIGH=1, MEDIUM=2, LOW=3`, lower
//! numeric value dispatched first) and `priority_queue.h`'s binary-heap
//! job queue; `std::collections::BinaryHeap` already is Rust's idiomatic
//! priority queue, so this module only supplies the ordering and a
//! monotonic sequence number for FIFO-within-a-priority fairness.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Compilation urgency, lowest value dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    System = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

struct Entry<T> {
    priority: Priority,
    sequence: u64,
    job: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; a lower `Priority` discriminant (more
        // urgent) must compare greater, and within the same priority an
        // earlier sequence number must compare greater, so both orderings
        // are reversed here.
        other.priority.cmp(&self.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// FIFO-within-priority job queue for [`crate::agent::pooled::PooledAgent`].
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        PriorityQueue { heap: BinaryHeap::new() }
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, job: T) {
        let sequence = NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.push(Entry { priority, sequence, job });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.job)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_pops_first() {
        let mut q = PriorityQueue::new();
        q.push(Priority::Low, "low");
        q.push(Priority::System, "system");
        q.push(Priority::Medium, "medium");
        assert_eq!(q.pop(), Some("system"));
        assert_eq!(q.pop(), Some("medium"));
        assert_eq!(q.pop(), Some("low"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn same_priority_is_fifo() {
        let mut q = PriorityQueue::new();
        q.push(Priority::High, 1);
        q.push(Priority::High, 2);
        q.push(Priority::High, 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }
}
