//! Bounded queue of items that become ready after a delay.
//!
//! Ready items pop in deadline order; items sharing a deadline pop in
//! arrival order. The queue owns its items, so clearing it drops every
//! pending item.
//!
//! A popped item keeps its slot reserved until it is either requeued or
//! released, so new items can never crowd out one that is being handled.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Rejection returned when the queue is at capacity.
///
/// Carries the rejected item back to the caller.
#[derive(Error)]
#[error("delay queue full (capacity {capacity})")]
pub struct QueueFull<T> {
    pub capacity: usize,
    pub item: T,
}

impl<T> std::fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

struct Entry<T> {
    deadline: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Deadline ordered queue with a fixed capacity.
pub struct DelayQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    capacity: usize,
    reserved: usize,
    next_seq: u64,
}

impl<T> DelayQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            reserved: 0,
            next_seq: 0,
        }
    }

    /// Schedule `item` to become ready `delay` from now.
    pub fn push(&mut self, delay: Duration, item: T) -> Result<(), QueueFull<T>> {
        self.push_at(Instant::now() + delay, item)
    }

    /// Schedule `item` to become ready at `deadline`.
    pub fn push_at(&mut self, deadline: Instant, item: T) -> Result<(), QueueFull<T>> {
        if self.heap.len() + self.reserved >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
                item,
            });
        }
        self.insert(deadline, item);
        Ok(())
    }

    /// Put a popped item back, `delay` from now, into its reserved slot.
    pub fn requeue(&mut self, delay: Duration, item: T) {
        self.reserved = self.reserved.saturating_sub(1);
        self.insert(Instant::now() + delay, item);
    }

    /// Give up the slot reserved by a popped item that is finished.
    pub fn release(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    fn insert(&mut self, deadline: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            item,
        }));
    }

    /// Deadline of the earliest pending item.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Remove the earliest item if its deadline is at or before `now`.
    ///
    /// The item's slot stays reserved until [`DelayQueue::requeue`] or
    /// [`DelayQueue::release`].
    pub fn pop_ready(&mut self, now: Instant) -> Option<T> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.deadline <= now => {
                self.reserved += 1;
                self.heap.pop().map(|Reverse(entry)| entry.item)
            }
            _ => None,
        }
    }

    /// Drop every pending item, returning how many were dropped.
    ///
    /// Reserved slots are given up too; a later `requeue` still succeeds.
    pub fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        self.reserved = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_pops_in_deadline_order() {
        let mut queue = DelayQueue::new(8);
        let now = Instant::now();
        queue.push_at(now + Duration::from_millis(30), "c").unwrap();
        queue.push_at(now + Duration::from_millis(10), "a").unwrap();
        queue.push_at(now + Duration::from_millis(20), "b").unwrap();

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(queue.pop_ready(now), None);

        let later = now + Duration::from_millis(30);
        assert_eq!(queue.pop_ready(later), Some("a"));
        assert_eq!(queue.pop_ready(later), Some("b"));
        assert_eq!(queue.pop_ready(later), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_popped_item_keeps_its_slot() {
        let mut queue = DelayQueue::new(2);
        let now = Instant::now();
        queue.push_at(now, "running").unwrap();
        assert_eq!(queue.pop_ready(now), Some("running"));

        // One free slot while "running" is being handled.
        queue.push(Duration::from_secs(1), "new").unwrap();
        let err = queue.push(Duration::from_secs(1), "overflow").unwrap_err();
        assert_eq!(err.item, "overflow");

        queue.requeue(Duration::from_secs(1), "running");
        assert_eq!(queue.len(), 2);
        assert!(queue.push(Duration::from_secs(1), "still full").is_err());
    }

    #[test]
    fn test_release_frees_slot() {
        let mut queue = DelayQueue::new(1);
        let now = Instant::now();
        queue.push_at(now, 1).unwrap();
        assert_eq!(queue.pop_ready(now), Some(1));
        assert!(queue.push_at(now, 2).is_err());

        queue.release();
        assert!(queue.push_at(now, 2).is_ok());
    }

    #[test]
    fn test_same_deadline_is_fifo() {
        let mut queue = DelayQueue::new(8);
        let at = Instant::now();
        for i in 0..5 {
            queue.push_at(at, i).unwrap();
        }
        let popped: Vec<_> = std::iter::from_fn(|| queue.pop_ready(at)).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_when_full() {
        let mut queue = DelayQueue::new(2);
        queue.push(Duration::ZERO, 1).unwrap();
        queue.push(Duration::ZERO, 2).unwrap();

        let err = queue.push(Duration::ZERO, 3).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(err.item, 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_clear_drops_items() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut queue = DelayQueue::new(8);
        for _ in 0..3 {
            assert!(queue
                .push(Duration::from_secs(60), Tracked(drops.clone()))
                .is_ok());
        }

        assert_eq!(queue.clear(), 3);
        assert_eq!(drops.load(AtomicOrdering::SeqCst), 3);
        assert!(queue.next_deadline().is_none());
    }
}
