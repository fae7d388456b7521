//! Simulation assembly and the multi-threaded runner.
//!
//! [`SimulationBuilder`] collects links, clocks, and initial events per
//! partition, wires link ends through a [`LinkRegistry`], and checks the
//! sync window against every cross-partition latency.
//! [`Simulation::run`] moves each [`Partition`] onto its own named thread
//! and joins them. A failed partition aborts the others, so a run always
//! returns.
//!
//! # Example
//!
//! ```
//! use strand_core::{LinkId, PartitionId};
//! use strand_engine::{Context, Event, LinkError, SimConfig, SimulationBuilder};
//!
//! let mut cfg = SimConfig::with_partitions(2);
//! cfg.sync.max_period = Some(10);
//! let mut b = SimulationBuilder::new(cfg).unwrap();
//!
//! // Partition 0 forwards a kick across the "wire" link to partition 1.
//! b.add_output_link(PartitionId(0), "wire", 10).unwrap();
//! b.add_link(PartitionId(1), "wire", 10, |ev: Event, ctx: &mut Context<'_>| {
//!     assert_eq!(ctx.now(), 13);
//!     assert_eq!(ev.downcast_ref::<&str>(), Some(&"hello"));
//!     Ok::<(), LinkError>(())
//! })
//! .unwrap();
//! let kick = b
//!     .add_link(PartitionId(0), "kick", 0, |_: Event, ctx: &mut Context<'_>| {
//!         ctx.send(LinkId(0), 3, "hello")
//!     })
//!     .unwrap();
//! b.add_output_link(PartitionId(0), "kick", 0).unwrap();
//! b.schedule_event(kick, 0, ()).unwrap();
//!
//! let report = b.build().unwrap().run().unwrap();
//! assert_eq!(report.events_delivered(), 2);
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strand_core::{
    priority, EventPayload, PartitionId, Priority, SimTime, TimeConverter, MAX_SIM_TIME,
};
use tracing::{error, info, warn};

use crate::clock::{ClockHandle, ClockHandler, ClockSet};
use crate::config::{ConfigError, SimConfig};
use crate::context::EventHandler;
use crate::event::{Action, Event};
use crate::link::{Delivery, LinkEnd, LinkRegistry, LinkRoutes};
use crate::partition::{Partition, PartitionReport, RunError};
use crate::profile::profiler_for;
use crate::sync::{thread_syncs, SyncShared};
use crate::timeline::Timeline;
use crate::untimed::UntimedHandler;

// ── SimulationBuilder ──────────────────────────────────────────────

#[derive(Default)]
struct PartitionSetup {
    timeline: Timeline,
    handlers: Vec<Option<Box<dyn EventHandler>>>,
    clocks: ClockSet,
    untimed: Vec<Box<dyn UntimedHandler>>,
}

/// Assembles a [`Simulation`].
pub struct SimulationBuilder {
    config: SimConfig,
    routes: Vec<LinkRoutes>,
    setups: Vec<PartitionSetup>,
    registry: LinkRegistry,
}

impl SimulationBuilder {
    /// Start building from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`SimConfig::validate`] invariant.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let n = config.topology.partitions;
        let routes = (0..n).map(|i| LinkRoutes::new(PartitionId(i as u32))).collect();
        let setups = (0..n)
            .map(|_| PartitionSetup {
                clocks: ClockSet::new(config.clock.clone()),
                ..PartitionSetup::default()
            })
            .collect();
        Ok(Self {
            config,
            routes,
            setups,
            registry: LinkRegistry::new(),
        })
    }

    /// Number of partitions being built.
    pub fn partitions(&self) -> usize {
        self.setups.len()
    }

    fn check_partition(&self, partition: PartitionId) -> Result<usize, ConfigError> {
        let index = partition.index();
        if index < self.setups.len() {
            Ok(index)
        } else {
            Err(ConfigError::PartitionOutOfRange {
                partition: partition.0,
                count: self.setups.len(),
            })
        }
    }

    /// Add a link end named `name` in `partition`, with `handler`
    /// receiving events that arrive on it.
    ///
    /// The end is wired once another end registers the same name.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn add_link(
        &mut self,
        partition: PartitionId,
        name: &str,
        latency: SimTime,
        handler: impl EventHandler + 'static,
    ) -> Result<LinkEnd, ConfigError> {
        self.add_end(partition, name, latency, Some(Box::new(handler)))
    }

    /// Add a send-only link end. Events arriving on it abort the run with
    /// [`RunError::Unhandled`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn add_output_link(
        &mut self,
        partition: PartitionId,
        name: &str,
        latency: SimTime,
    ) -> Result<LinkEnd, ConfigError> {
        self.add_end(partition, name, latency, None)
    }

    fn add_end(
        &mut self,
        partition: PartitionId,
        name: &str,
        latency: SimTime,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<LinkEnd, ConfigError> {
        let index = self.check_partition(partition)?;
        let link = self.routes[index].push(name, latency);
        self.setups[index].handlers.push(handler);
        let end = LinkEnd::new(partition, link);
        self.registry.register_link(name, end, &mut self.routes)?;
        Ok(end)
    }

    /// Register a periodic handler on `partition`'s clock with `period`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn register_clock(
        &mut self,
        partition: PartitionId,
        period: TimeConverter,
        handler: impl ClockHandler + 'static,
    ) -> Result<ClockHandle, ConfigError> {
        let index = self.check_partition(partition)?;
        let setup = &mut self.setups[index];
        Ok(setup
            .clocks
            .register(period, Box::new(handler), &mut setup.timeline))
    }

    /// [`register_clock`](Self::register_clock) with a period string such
    /// as `"10ns"` or `"2GHz"`, parsed against the configured timebase.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Time`] if the period does not parse, or
    /// [`ConfigError::PartitionOutOfRange`].
    pub fn register_clock_str(
        &mut self,
        partition: PartitionId,
        period: &str,
        handler: impl ClockHandler + 'static,
    ) -> Result<ClockHandle, ConfigError> {
        let period = self.config.time_lord()?.converter(period)?;
        self.register_clock(partition, period, handler)
    }

    /// Remove a periodic handler. Returns whether its clock is now empty.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownClock`] or
    /// [`ConfigError::PartitionOutOfRange`].
    pub fn unregister_clock(
        &mut self,
        partition: PartitionId,
        handle: ClockHandle,
    ) -> Result<bool, ConfigError> {
        let index = self.check_partition(partition)?;
        self.setups[index].clocks.unregister(handle)
    }

    /// Add a participant in the untimed init and complete stages of
    /// `partition`. Once any partition has one, every partition runs
    /// both stages.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn add_untimed_handler(
        &mut self,
        partition: PartitionId,
        handler: impl UntimedHandler + 'static,
    ) -> Result<(), ConfigError> {
        let index = self.check_partition(partition)?;
        self.setups[index].untimed.push(Box::new(handler));
        Ok(())
    }

    /// Deliver `payload` to `end`'s own handler at time `at`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn schedule_event(
        &mut self,
        end: LinkEnd,
        at: SimTime,
        payload: impl EventPayload,
    ) -> Result<(), ConfigError> {
        self.schedule_event_with_priority(end, at, priority::EVENT, payload)
    }

    /// [`schedule_event`](Self::schedule_event) at an explicit priority,
    /// for events that must order against clocks or sync points at the
    /// same instant.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn schedule_event_with_priority(
        &mut self,
        end: LinkEnd,
        at: SimTime,
        priority: Priority,
        payload: impl EventPayload,
    ) -> Result<(), ConfigError> {
        let index = self.check_partition(end.partition)?;
        self.routes[index].get(end.link)?;
        self.setups[index].timeline.insert(
            at,
            priority,
            Action::Deliver(Event::new(end.link, Box::new(payload))),
        );
        Ok(())
    }

    /// Shortest latency over every cross-partition link end.
    fn min_cross_latency(&self) -> Option<(String, SimTime)> {
        self.routes
            .iter()
            .flat_map(|routes| routes.iter())
            .filter(|(_, r)| matches!(r.delivery(), Delivery::Remote(_)))
            .map(|(_, r)| (r.name().to_string(), r.latency()))
            .min_by_key(|(_, latency)| *latency)
    }

    /// Finalize wiring and produce a runnable [`Simulation`].
    ///
    /// The sync window is [`SyncConfig::max_period`](crate::SyncConfig)
    /// if set, otherwise the shortest cross-partition latency.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Link`] if any link end is unmatched,
    /// [`ConfigError::LatencyBelowSyncWindow`] if a cross-partition link
    /// is faster than the window, [`ConfigError::ZeroSyncWindow`] if the
    /// derived window is zero.
    pub fn build(self) -> Result<Simulation, ConfigError> {
        self.registry.finalize()?;

        let fastest = self.min_cross_latency();
        let max_period = match (self.config.sync.max_period, &fastest) {
            (Some(window), Some((name, latency))) if *latency < window => {
                return Err(ConfigError::LatencyBelowSyncWindow {
                    link: name.clone(),
                    latency: *latency,
                    window,
                });
            }
            (Some(window), _) => window,
            (None, Some((_, 0))) => return Err(ConfigError::ZeroSyncWindow),
            (None, Some((_, latency))) => *latency,
            (None, None) => MAX_SIM_TIME,
        };

        let n = self.setups.len();
        let synchronized = n > 1;
        if synchronized && fastest.is_none() {
            warn!("no cross-partition links; partitions will only sync to detect drain");
        }

        let profile = self.config.sync.profile;
        let syncs = thread_syncs(n, max_period, || profiler_for(profile));
        let shared = syncs.first().map(|s| Arc::clone(s.shared()));
        let stop_at = self.config.stop_at;
        let lifecycle = self.setups.iter().any(|s| !s.untimed.is_empty());

        let partitions = self
            .setups
            .into_iter()
            .zip(self.routes)
            .zip(syncs)
            .enumerate()
            .map(|(i, ((setup, routes), sync))| {
                Partition::new(
                    PartitionId(i as u32),
                    setup.timeline,
                    routes,
                    setup.handlers,
                    setup.clocks,
                    setup.untimed,
                    lifecycle,
                    sync,
                    synchronized,
                    stop_at,
                )
            })
            .collect();

        info!(
            partitions = n,
            max_period,
            links = self.registry.wired_count(),
            lifecycle,
            "simulation built"
        );
        Ok(Simulation {
            partitions,
            max_period,
            shared,
        })
    }
}

impl std::fmt::Debug for SimulationBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationBuilder")
            .field("config", &self.config)
            .field("partitions", &self.setups.len())
            .field("registry", &self.registry)
            .finish()
    }
}

// ── Simulation ─────────────────────────────────────────────────────

/// A fully wired simulation, ready to run.
#[derive(Debug)]
pub struct Simulation {
    partitions: Vec<Partition>,
    max_period: SimTime,
    shared: Option<Arc<SyncShared>>,
}

impl Simulation {
    /// Number of partitions.
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// The skip-ahead window in use.
    pub fn max_period(&self) -> SimTime {
        self.max_period
    }

    /// Run every partition on its own thread until they all stop.
    ///
    /// # Errors
    ///
    /// Returns the first partition error in partition order, a panic as
    /// [`RunError::PartitionPanicked`], or [`RunError::ThreadSpawn`].
    ///
    /// A partition that fails aborts the sync barriers, and every other
    /// partition stops at its next sync point with [`RunError::Aborted`].
    /// Those are only reported if no partition has a root cause to
    /// report.
    pub fn run(self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        info!(
            partitions = self.partitions.len(),
            max_period = self.max_period,
            "simulation starting"
        );

        let mut handles = Vec::with_capacity(self.partitions.len());
        let mut first_error = None;
        for partition in self.partitions {
            let id = partition.id();
            let spawned = thread::Builder::new()
                .name(format!("strand-partition-{id}"))
                .spawn(move || partition.run());
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(source) => {
                    error!(partition = %id, error = %source, "partition thread did not start");
                    if let Some(shared) = &self.shared {
                        shared.abort();
                    }
                    first_error = Some(RunError::ThreadSpawn {
                        partition: id,
                        source,
                    });
                    break;
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut first_abort = None;
        for (id, handle) in handles {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(RunError::PartitionPanicked { partition: id }),
            };
            match result {
                Ok(report) => reports.push(report),
                Err(e) if e.is_abort() => {
                    first_abort.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error.or(first_abort) {
            return Err(e);
        }

        let report = RunReport {
            partitions: reports,
            max_period: self.max_period,
            wall_time: started.elapsed(),
        };
        info!(
            final_time = report.final_time(),
            events = report.events_delivered(),
            wall_ms = report.wall_time.as_millis() as u64,
            "simulation finished"
        );
        Ok(report)
    }
}

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    /// One report per partition, in partition order.
    pub partitions: Vec<PartitionReport>,
    /// The skip-ahead window used.
    pub max_period: SimTime,
    /// Wall time from start to the last join.
    pub wall_time: Duration,
}

impl RunReport {
    /// Latest simulated time any partition reached.
    pub fn final_time(&self) -> SimTime {
        self.partitions
            .iter()
            .map(|p| p.metrics.final_time)
            .max()
            .unwrap_or(0)
    }

    /// Events delivered across all partitions.
    pub fn events_delivered(&self) -> u64 {
        self.partitions
            .iter()
            .map(|p| p.metrics.events_delivered)
            .sum()
    }

    /// Clock firings across all partitions.
    pub fn clock_fires(&self) -> u64 {
        self.partitions.iter().map(|p| p.metrics.clock_fires).sum()
    }

    /// Activities exchanged between partitions.
    pub fn activities_exchanged(&self) -> u64 {
        self.partitions
            .iter()
            .map(|p| p.metrics.activities_exchanged)
            .sum()
    }
}
