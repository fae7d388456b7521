//! Simulation configuration, validation, and error types.
//!
//! [`SimConfig`] is the builder input for constructing a
//! [`Simulation`](crate::simulation::Simulation).
//! [`validate()`](SimConfig::validate) checks structural invariants at
//! startup; link-dependent checks (sync window against cross-partition
//! latencies) run in [`SimulationBuilder::build()`](crate::SimulationBuilder::build).

use strand_core::{priority, Priority, SimTime, TimeError, TimeLord};
use thiserror::Error;

use crate::link::LinkError;

// ── Topology ───────────────────────────────────────────────────────

/// Shape of the parallel run: how many partitions (threads) per rank and
/// how many ranks.
///
/// Only single-rank runs are supported; distributed transport is out of
/// scope for this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Number of partitions, one thread each. Default: 1.
    pub partitions: usize,
    /// Number of ranks. Must be 1. Default: 1.
    pub ranks: u32,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            partitions: 1,
            ranks: 1,
        }
    }
}

impl Topology {
    /// A single-rank topology with `partitions` threads.
    pub fn threads(partitions: usize) -> Self {
        Self {
            partitions,
            ranks: 1,
        }
    }

    /// Whether more than one rank participates.
    pub fn is_multi_rank(&self) -> bool {
        self.ranks > 1
    }
}

// ── ClockConfig ────────────────────────────────────────────────────

/// Where a clock lands when it is first scheduled mid-run at one of its
/// own period boundaries.
///
/// Both policies defer to the next whole period at time zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClockPolicy {
    /// Fire at the current instant when the activity now executing has a
    /// lower priority value than the clock (it would otherwise run before
    /// the clock at this instant anyway).
    #[default]
    SameInstant,
    /// Always defer to the next whole period.
    NextBoundary,
}

/// Per-handler clock profiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClockProfileMode {
    /// No profiling.
    #[default]
    Off,
    /// Count calls per handler.
    Count,
    /// Count calls and accumulate wall time per handler.
    Time,
}

/// Configuration shared by every clock in a partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    /// Priority clocks are scheduled with. Default: [`priority::CLOCK`].
    pub priority: Priority,
    /// Placement policy for mid-run creation. Default: [`ClockPolicy::SameInstant`].
    pub policy: ClockPolicy,
    /// Handler profiling. Default: off.
    pub profile: ClockProfileMode,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            priority: priority::CLOCK,
            policy: ClockPolicy::SameInstant,
            profile: ClockProfileMode::Off,
        }
    }
}

// ── SyncConfig ─────────────────────────────────────────────────────

/// Which sync-manager profiler to attach to each partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncProfileMode {
    /// No profiling.
    #[default]
    Off,
    /// Count sync epochs only.
    Count,
    /// Count epochs and accumulate wall time spent synchronizing.
    Time,
}

/// Configuration for the skip-ahead thread synchronization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum latency of any cross-partition link, which bounds how far
    /// a sync epoch may skip ahead. `None` derives it from the shortest
    /// cross-partition link latency at build time.
    pub max_period: Option<SimTime>,
    /// Sync profiling mode. Default: off.
    pub profile: SyncProfileMode,
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while validating configuration or building a
/// simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The topology declares zero partitions.
    #[error("topology must have at least one partition")]
    NoPartitions,
    /// More than one rank was requested.
    #[error("multi-rank runs are not supported (requested {ranks} ranks)")]
    MultiRankUnsupported {
        /// The requested rank count.
        ranks: u32,
    },
    /// The sync window is zero, which would never let time advance.
    #[error("max_period must be at least 1")]
    ZeroSyncWindow,
    /// A partition index outside the topology was referenced.
    #[error("partition {partition} out of range for {count} partitions")]
    PartitionOutOfRange {
        /// The referenced partition.
        partition: u32,
        /// Number of partitions in the topology.
        count: usize,
    },
    /// A cross-partition link is faster than the sync window allows.
    #[error("link '{link}' latency {latency} is below the sync window {window}")]
    LatencyBelowSyncWindow {
        /// Name of the offending link.
        link: String,
        /// Its latency.
        latency: SimTime,
        /// The configured sync window.
        window: SimTime,
    },
    /// A clock handle did not name a registered clock.
    #[error("no clock registered with period {factor}")]
    UnknownClock {
        /// Period factor of the missing clock.
        factor: SimTime,
    },
    /// Link wiring failed.
    #[error("link: {0}")]
    Link(#[from] LinkError),
    /// A period string did not parse.
    #[error("time: {0}")]
    Time(#[from] TimeError),
    /// The stop time is zero, so nothing would ever run.
    #[error("stop_at must be greater than zero")]
    StopAtZero,
}

// ── SimConfig ──────────────────────────────────────────────────────

/// Top-level configuration for a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimConfig {
    /// Partition layout.
    pub topology: Topology,
    /// Skip-ahead synchronization settings.
    pub sync: SyncConfig,
    /// Clock settings.
    pub clock: ClockConfig,
    /// Simulated time at which every partition stops. `None` runs until
    /// all queues drain.
    pub stop_at: Option<SimTime>,
    /// Duration of one simulated time unit, e.g. `"1ps"`. Used to parse
    /// clock period strings. `None` means one picosecond.
    pub timebase: Option<String>,
}

impl SimConfig {
    /// Default configuration with `partitions` threads.
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            topology: Topology::threads(partitions),
            ..Self::default()
        }
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topology.partitions == 0 {
            return Err(ConfigError::NoPartitions);
        }
        if self.topology.is_multi_rank() {
            return Err(ConfigError::MultiRankUnsupported {
                ranks: self.topology.ranks,
            });
        }
        if self.sync.max_period == Some(0) {
            return Err(ConfigError::ZeroSyncWindow);
        }
        if self.stop_at == Some(0) {
            return Err(ConfigError::StopAtZero);
        }
        self.time_lord()?;
        Ok(())
    }

    /// The time converter factory for this configuration's timebase.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Time`] if the timebase does not parse.
    pub fn time_lord(&self) -> Result<TimeLord, ConfigError> {
        Ok(match &self.timebase {
            Some(base) => TimeLord::new(base)?,
            None => TimeLord::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = SimConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.topology.partitions, 1);
        assert_eq!(cfg.clock.priority, priority::CLOCK);
        assert_eq!(cfg.clock.policy, ClockPolicy::SameInstant);
        assert_eq!(cfg.sync.profile, SyncProfileMode::Off);
        assert_eq!(cfg.clock.profile, ClockProfileMode::Off);
    }

    #[test]
    fn zero_partitions_rejected() {
        let cfg = SimConfig::with_partitions(0);
        assert_eq!(cfg.validate(), Err(ConfigError::NoPartitions));
    }

    #[test]
    fn multi_rank_rejected() {
        let mut cfg = SimConfig::with_partitions(2);
        cfg.topology.ranks = 2;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MultiRankUnsupported { ranks: 2 })
        );
    }

    #[test]
    fn zero_sync_window_rejected() {
        let mut cfg = SimConfig::with_partitions(2);
        cfg.sync.max_period = Some(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSyncWindow));
    }

    #[test]
    fn zero_stop_rejected() {
        let cfg = SimConfig {
            stop_at: Some(0),
            ..SimConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::StopAtZero));
    }

    #[test]
    fn timebase_is_checked() {
        let mut cfg = SimConfig::default();
        assert_eq!(cfg.time_lord().unwrap().converter("1ns").unwrap().factor(), 1000);

        cfg.timebase = Some("1ns".into());
        assert_eq!(cfg.time_lord().unwrap().converter("1us").unwrap().factor(), 1000);

        cfg.timebase = Some("fast".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Time(_))));
    }

    #[test]
    fn error_messages_name_the_problem() {
        let err = ConfigError::LatencyBelowSyncWindow {
            link: "A".into(),
            latency: 3,
            window: 10,
        };
        assert_eq!(
            err.to_string(),
            "link 'A' latency 3 is below the sync window 10"
        );
    }
}
