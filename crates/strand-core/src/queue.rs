//! Per-partition priority queue of [`Activity`] values.
//!
//! [`ActivityQueue`] is a binary min-heap keyed by
//! `(delivery_time, priority, seq)`. The queue assigns `seq` from a
//! monotonic counter on every insert, so activities with equal time and
//! priority pop in arrival order. Identical insert sequences therefore
//! replay identically.
//!
//! A queue belongs to exactly one partition and is never shared between
//! threads; no locking is involved.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::activity::Activity;
use crate::error::QueueError;
use crate::id::SimTime;

/// Heap entry with the ordering reversed so that `BinaryHeap` (a max-heap)
/// yields the smallest key first.
struct Entry<P>(Activity<P>);

impl<P> PartialEq for Entry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl<P> Eq for Entry<P> {}

impl<P> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.key().cmp(&self.0.key())
    }
}

/// Priority queue ordering activities by `(time, priority, insertion order)`.
pub struct ActivityQueue<P> {
    heap: BinaryHeap<Entry<P>>,
    next_seq: u64,
}

impl<P> ActivityQueue<P> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Create an empty queue with room for `capacity` activities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Insert an activity. O(log n).
    ///
    /// Overwrites the activity's sequence number with the next value of
    /// this queue's arrival counter.
    pub fn insert(&mut self, mut activity: Activity<P>) {
        activity.set_seq(self.next_seq);
        self.next_seq += 1;
        self.heap.push(Entry(activity));
    }

    /// Remove and return the minimum activity.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] if the queue holds nothing. Callers
    /// driving a run loop treat this as a logic error.
    pub fn pop(&mut self) -> Result<Activity<P>, QueueError> {
        self.heap.pop().map(|e| e.0).ok_or(QueueError::Empty)
    }

    /// Borrow the minimum activity without removing it.
    pub fn peek(&self) -> Option<&Activity<P>> {
        self.heap.peek().map(|e| &e.0)
    }

    /// Delivery time of the minimum activity, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.peek().map(Activity::delivery_time)
    }

    /// Number of queued activities.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Iterate over queued activities in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Activity<P>> {
        self.heap.iter().map(|e| &e.0)
    }

    /// Total number of inserts over the queue's lifetime.
    pub fn total_inserted(&self) -> u64 {
        self.next_seq
    }
}

impl<P> Default for ActivityQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for ActivityQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityQueue")
            .field("len", &self.heap.len())
            .field("next_time", &self.peek_time())
            .field("total_inserted", &self.next_seq)
            .finish()
    }
}
