//! Error types for the Strand core, organized by subsystem:
//! activity queue and time conversion.

use thiserror::Error;

/// Errors from [`ActivityQueue`](crate::ActivityQueue) operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// `pop()` was called on an empty queue. Always a logic error in the
    /// driving loop.
    #[error("pop from empty activity queue")]
    Empty,
}

/// Errors from parsing period and frequency strings.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The input is not `<number><unit>`.
    #[error("invalid time specification '{input}'")]
    InvalidFormat {
        /// The rejected input.
        input: String,
    },
    /// The unit suffix is not one of the supported time or frequency units.
    #[error("unknown time unit '{unit}'")]
    UnknownUnit {
        /// The unrecognised unit.
        unit: String,
    },
    /// The period is shorter than one timebase unit.
    #[error("'{input}' is finer than the timebase")]
    BelowTimebase {
        /// The rejected input.
        input: String,
    },
    /// A conversion factor of zero was requested.
    #[error("time conversion factor must be at least 1")]
    ZeroFactor,
}
