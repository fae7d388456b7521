//! Parallel discrete-event runtime for Strand.
//!
//! Each partition runs on its own thread, popping activities from its
//! [`Timeline`] in `(time, priority, arrival)` order. Events travel over
//! named links; sends to another partition are buffered and exchanged at
//! skip-ahead sync points ([`ThreadSync`]) so that no partition ever sees
//! an event from its own past. [`Clock`]s fire periodic handlers on top of
//! the same queue. Optional untimed init and complete stages
//! ([`UntimedHandler`]) run before and after the timed loop.
//!
//! Start with [`SimulationBuilder`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod barrier;
pub mod clock;
pub mod config;
pub mod context;
pub mod event;
pub mod link;
pub mod metrics;
pub mod partition;
pub mod profile;
pub mod simulation;
pub mod sync;
pub mod timeline;
pub mod untimed;

pub use barrier::{Barrier, BarrierAborted, SyncBarriers};
pub use clock::{Clock, ClockHandle, ClockHandler, ClockRequests, ClockSet};
pub use config::{
    ClockConfig, ClockPolicy, ClockProfileMode, ConfigError, SimConfig, SyncConfig,
    SyncProfileMode, Topology,
};
pub use context::{Context, EventHandler};
pub use event::{Action, Event, SimActivity};
pub use link::{
    Delivery, LinkEnd, LinkError, LinkQueue, LinkRegistry, LinkRoute, LinkRoutes, Registration,
};
pub use metrics::PartitionMetrics;
pub use partition::{Partition, PartitionReport, RunError, StopReason};
pub use profile::{
    profiler_for, ClockHandlerProfile, SyncCountProfiler, SyncProfileSummary, SyncProfiler,
    SyncTimeProfiler,
};
pub use simulation::{RunReport, Simulation, SimulationBuilder};
pub use sync::{
    thread_syncs, AbortGuard, ExchangeBatch, SyncError, SyncOutcome, SyncShared, ThreadSync,
    UntimedRound,
};
pub use timeline::Timeline;
pub use untimed::{Stage, UntimedContext, UntimedHandler, UntimedInbox};
