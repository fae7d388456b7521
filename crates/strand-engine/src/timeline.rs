//! A partition's activity queue together with its current time.
//!
//! [`Timeline`] is the per-partition time source: it owns the
//! [`ActivityQueue`], records the delivery time and priority of the
//! activity currently executing, and never moves backwards.

use strand_core::{
    Activity, ActivityQueue, Priority, QueueError, SimTime, TimeSource, MAX_SIM_TIME,
};

use crate::event::{Action, SimActivity};

/// Activity queue plus "now" for one partition.
#[derive(Debug, Default)]
pub struct Timeline {
    queue: ActivityQueue<Action>,
    now: SimTime,
    current_priority: Priority,
}

impl Timeline {
    /// An empty timeline at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` at `time` with `priority`.
    pub fn insert(&mut self, time: SimTime, priority: Priority, action: Action) {
        debug_assert!(
            time >= self.now,
            "activity scheduled in the past: {time} < {}",
            self.now
        );
        self.queue.insert(Activity::new(time, priority, action));
    }

    /// Schedule an already-built activity, keeping its time and priority.
    pub fn insert_activity(&mut self, activity: SimActivity) {
        debug_assert!(activity.delivery_time() >= self.now);
        self.queue.insert(activity);
    }

    /// Pop the next activity and advance "now" to its delivery time.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] if nothing is scheduled.
    pub fn advance(&mut self) -> Result<SimActivity, QueueError> {
        let activity = self.queue.pop()?;
        debug_assert!(activity.delivery_time() >= self.now);
        self.now = activity.delivery_time();
        self.current_priority = activity.priority();
        Ok(activity)
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Delivery time of the earliest pending activity, or
    /// [`MAX_SIM_TIME`] if none.
    pub fn next_activity_time(&self) -> SimTime {
        self.queue.peek_time().unwrap_or(MAX_SIM_TIME)
    }

    /// Number of pending activities.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending activities whose action satisfies `pred`.
    /// O(n); diagnostics and tests only.
    pub fn count_pending(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.queue.iter().filter(|a| pred(a.payload())).count()
    }
}

impl TimeSource for Timeline {
    fn current_sim_time(&self) -> SimTime {
        self.now
    }

    fn current_priority(&self) -> Priority {
        self.current_priority
    }
}
