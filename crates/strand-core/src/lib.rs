//! Core types and traits for the Strand parallel simulation core.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the Strand workspace:
//! simulated-time types, identifiers, the [`Activity`] ordering unit,
//! the per-partition [`ActivityQueue`], time conversion, error types,
//! and core traits.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod activity;
pub mod error;
pub mod id;
pub mod queue;
pub mod time;
pub mod traits;

pub use activity::{priority, Activity, Priority};
pub use error::{QueueError, TimeError};
pub use id::{ClockId, Cycle, HandlerId, LinkId, PartitionId, SimTime, MAX_SIM_TIME};
pub use queue::ActivityQueue;
pub use time::{TimeConverter, TimeLord};
pub use traits::{EventPayload, TimeSource};
