//! Reusable clock handler fixtures.
//!
//! - [`CountdownClock`]: records each firing and deregisters after N.
//! - [`cycle_log`]: a shared `(time, cycle)` log for clock assertions.

use std::sync::{Arc, Mutex};

use strand_core::{Cycle, SimTime};
use strand_engine::{ClockHandler, Context};

/// Shared list of `(time, cycle)` firings.
pub type CycleLog = Arc<Mutex<Vec<(SimTime, Cycle)>>>;

/// A fresh, empty [`CycleLog`].
pub fn cycle_log() -> CycleLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Clock handler that logs each firing and removes itself after
/// `remaining` firings. `None` never removes itself.
pub struct CountdownClock {
    pub remaining: Option<u32>,
    pub log: CycleLog,
}

impl CountdownClock {
    pub fn new(firings: u32, log: CycleLog) -> Self {
        Self {
            remaining: Some(firings),
            log,
        }
    }

    pub fn forever(log: CycleLog) -> Self {
        Self {
            remaining: None,
            log,
        }
    }
}

impl ClockHandler for CountdownClock {
    fn on_cycle(&mut self, cycle: Cycle, ctx: &mut Context<'_>) -> bool {
        if let Ok(mut log) = self.log.lock() {
            log.push((ctx.now(), cycle));
        }
        match self.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        }
    }
}
