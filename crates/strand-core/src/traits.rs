//! Core abstraction traits: the time source and the event payload
//! capability.

use std::any::Any;
use std::fmt;

use crate::activity::Priority;
use crate::id::SimTime;

/// Read access to a partition's notion of "now".
///
/// Implemented by the engine's per-partition timeline. Clocks consult it
/// when deciding where to insert themselves relative to the activity
/// currently executing.
pub trait TimeSource {
    /// The simulated time of the activity currently executing.
    fn current_sim_time(&self) -> SimTime;

    /// The priority of the activity currently executing.
    fn current_priority(&self) -> Priority;
}

/// The minimal capability an event payload needs to cross partitions.
///
/// Payloads move between threads by value, so they must be `Send` and
/// `'static`. Blanket-implemented for every `Any + Send + Debug` type.
pub trait EventPayload: Any + Send + fmt::Debug {
    /// Approximate size in bytes, used for exchange-volume accounting.
    fn data_size(&self) -> usize;

    /// Upcast for downcasting by reference.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send + fmt::Debug> EventPayload for T {
    fn data_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
