//! The [`Activity`] ordering unit and well-known scheduling priorities.

use crate::id::SimTime;

/// Scheduling priority. Lower values run first among equal delivery times.
pub type Priority = i32;

/// Well-known priorities for the activity kinds the engine schedules.
///
/// Among activities due at the same simulated time, a stop action runs
/// before the thread sync point, the sync point runs before clocks, and
/// clocks run before ordinary events.
pub mod priority {
    use super::Priority;

    /// Stop actions end a partition before anything else at that instant.
    pub const STOP_ACTION: Priority = 1;
    /// Thread synchronization points.
    pub const THREAD_SYNC: Priority = 20;
    /// Rank synchronization points.
    pub const SYNC: Priority = 25;
    /// Clock firings.
    pub const CLOCK: Priority = 40;
    /// Ordinary link events.
    pub const EVENT: Priority = 50;
    /// One-shot callbacks.
    pub const ONE_SHOT: Priority = 80;
    /// Events that must observe every other event at their instant.
    pub const FINAL_EVENT: Priority = 98;
    /// Simulation exit.
    pub const EXIT: Priority = 99;
}

/// Anything schedulable at a simulated time with a priority.
///
/// Activities are ordered by the composite key
/// `(delivery_time, priority, seq)`, where `seq` is the insertion
/// sequence number assigned by the [`ActivityQueue`](crate::ActivityQueue)
/// that currently holds the activity. The payload never takes part in
/// ordering.
///
/// # Examples
///
/// ```
/// use strand_core::{priority, Activity};
///
/// let a = Activity::new(100, priority::EVENT, "ping");
/// assert_eq!(a.delivery_time(), 100);
/// assert_eq!(a.priority(), priority::EVENT);
/// assert_eq!(*a.payload(), "ping");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Activity<P> {
    delivery_time: SimTime,
    priority: Priority,
    seq: u64,
    payload: P,
}

impl<P> Activity<P> {
    /// Create an activity due at `delivery_time` with the given priority.
    ///
    /// The insertion sequence number is zero until a queue assigns one.
    pub fn new(delivery_time: SimTime, priority: Priority, payload: P) -> Self {
        Self {
            delivery_time,
            priority,
            seq: 0,
            payload,
        }
    }

    /// Simulated time at which the activity is due.
    pub fn delivery_time(&self) -> SimTime {
        self.delivery_time
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Insertion sequence number assigned by the holding queue.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The full ordering key `(delivery_time, priority, seq)`.
    pub fn key(&self) -> (SimTime, Priority, u64) {
        (self.delivery_time, self.priority, self.seq)
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Consume the activity, returning its payload.
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Re-stamp the delivery time when an activity is handed to another
    /// partition at a sync point.
    pub fn with_delivery_time(mut self, delivery_time: SimTime) -> Self {
        self.delivery_time = delivery_time;
        self
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_orders_time_then_priority() {
        let early = Activity::new(5, priority::EVENT, ());
        let late = Activity::new(6, priority::STOP_ACTION, ());
        let clock = Activity::new(5, priority::CLOCK, ());
        assert!(early.key() < late.key());
        assert!(clock.key() < early.key());
    }

    #[test]
    fn priorities_follow_documented_order() {
        assert!(priority::STOP_ACTION < priority::THREAD_SYNC);
        assert!(priority::THREAD_SYNC < priority::CLOCK);
        assert!(priority::CLOCK < priority::EVENT);
        assert!(priority::EVENT < priority::EXIT);
    }

    #[test]
    fn restamp_keeps_priority_and_payload() {
        let a = Activity::new(10, priority::EVENT, 42u32).with_delivery_time(13);
        assert_eq!(a.delivery_time(), 13);
        assert_eq!(a.priority(), priority::EVENT);
        assert_eq!(a.into_payload(), 42);
    }
}
