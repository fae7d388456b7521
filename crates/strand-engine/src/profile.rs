//! Sync epoch profilers.
//!
//! A [`SyncProfiler`] is notified at the start and end of every thread
//! sync epoch. [`SyncCountProfiler`] only counts epochs;
//! [`SyncTimeProfiler`] also accumulates the wall time spent inside them.
//!
//! Clock handlers are profiled by the clocks themselves and reported as
//! [`ClockHandlerProfile`] entries.

use std::fmt;
use std::time::{Duration, Instant};

use strand_core::{HandlerId, SimTime};

use crate::config::SyncProfileMode;

/// Observer of sync epochs.
pub trait SyncProfiler: Send {
    /// An epoch is starting.
    fn sync_start(&mut self);
    /// The epoch that last started has finished.
    fn sync_end(&mut self);
    /// Totals so far.
    fn summary(&self) -> SyncProfileSummary;
}

/// Build the profiler selected by `mode`, if any.
pub fn profiler_for(mode: SyncProfileMode) -> Option<Box<dyn SyncProfiler>> {
    match mode {
        SyncProfileMode::Off => None,
        SyncProfileMode::Count => Some(Box::new(SyncCountProfiler::default())),
        SyncProfileMode::Time => Some(Box::new(SyncTimeProfiler::default())),
    }
}

/// Totals reported by a [`SyncProfiler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncProfileSummary {
    /// Epochs observed.
    pub count: u64,
    /// Total time inside epochs, if the profiler measures time.
    pub total: Option<Duration>,
}

impl SyncProfileSummary {
    /// Mean time per epoch, if timed and at least one epoch ran.
    pub fn average(&self) -> Option<Duration> {
        let total = self.total?;
        let count = u32::try_from(self.count).ok().filter(|c| *c > 0)?;
        Some(total / count)
    }
}

impl fmt::Display for SyncProfileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncManager Count = {}", self.count)?;
        if let Some(total) = self.total {
            write!(
                f,
                "\nTotal SyncManager Time = {:.6}s\nAverage SyncManager Time = {}ns",
                total.as_secs_f64(),
                self.average().unwrap_or_default().as_nanos()
            )?;
        }
        Ok(())
    }
}

/// Counts sync epochs.
#[derive(Debug, Default)]
pub struct SyncCountProfiler {
    count: u64,
}

impl SyncProfiler for SyncCountProfiler {
    fn sync_start(&mut self) {
        self.count += 1;
    }

    fn sync_end(&mut self) {}

    fn summary(&self) -> SyncProfileSummary {
        SyncProfileSummary {
            count: self.count,
            total: None,
        }
    }
}

/// Counts sync epochs and times them with a monotonic clock.
#[derive(Debug, Default)]
pub struct SyncTimeProfiler {
    count: u64,
    total: Duration,
    started: Option<Instant>,
}

impl SyncProfiler for SyncTimeProfiler {
    fn sync_start(&mut self) {
        self.count += 1;
        self.started = Some(Instant::now());
    }

    fn sync_end(&mut self) {
        if let Some(start) = self.started.take() {
            self.total += start.elapsed();
        }
    }

    fn summary(&self) -> SyncProfileSummary {
        SyncProfileSummary {
            count: self.count,
            total: Some(self.total),
        }
    }
}

/// Call totals for one clock handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockHandlerProfile {
    /// Period factor of the handler's clock.
    pub factor: SimTime,
    /// The handler.
    pub handler: HandlerId,
    /// Times the handler was called.
    pub calls: u64,
    /// Wall time inside the handler, if timing was enabled.
    pub time: Option<Duration>,
}

impl fmt::Display for ClockHandlerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Clock Handler {} (period {}) Count = {}",
            self.handler, self.factor, self.calls
        )?;
        if let Some(time) = self.time {
            write!(f, ", Time = {}ns", time.as_nanos())?;
        }
        Ok(())
    }
}
