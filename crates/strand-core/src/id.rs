//! Simulated-time aliases and strongly-typed identifiers.

use std::fmt;

/// Simulated time, in engine base units (see [`TimeLord`](crate::TimeLord)).
pub type SimTime = u64;

/// Clock cycle counter.
pub type Cycle = u64;

/// Sentinel meaning "no activity pending" / "never".
pub const MAX_SIM_TIME: SimTime = SimTime::MAX;

/// Identifies one simulation partition (one thread).
///
/// Partitions are numbered `0..n` in the order the topology declares
/// them. `PartitionId(0)` has no special role at run time; shared state
/// is built before any partition starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// The partition index as a `usize`, for slot lookups.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies one link end within its owning partition.
///
/// Link ids are dense and assigned in registration order, so
/// `LinkId(n)` is the n-th link end added to that partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl LinkId {
    /// The link index as a `usize`, for slot lookups.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LinkId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a periodic handler registered on a clock.
///
/// Allocated from a per-partition monotonic counter and never reused
/// within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for HandlerId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies a clock within a partition.
///
/// One clock exists per distinct period; ids are dense and stable for
/// the whole run because dormant clocks are kept, not removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(pub u32);

impl ClockId {
    /// The clock index as a `usize`, for slot lookups.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClockId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_their_value() {
        assert_eq!(PartitionId(3).to_string(), "3");
        assert_eq!(LinkId(7).to_string(), "7");
        assert_eq!(HandlerId(11).to_string(), "11");
        assert_eq!(ClockId(0).to_string(), "0");
    }

    #[test]
    fn ids_order_by_value() {
        assert!(PartitionId(0) < PartitionId(1));
        assert!(LinkId(2) > LinkId(1));
        assert_eq!(PartitionId::from(4).index(), 4);
        assert_eq!(LinkId::from(9).index(), 9);
    }
}
