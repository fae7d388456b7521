//! Strand: the timing and synchronization core of a parallel
//! discrete-event simulator.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Strand sub-crates. For most users, adding `strand` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use strand::prelude::*;
//!
//! // Two partitions joined by a link with latency 10.
//! let mut config = SimConfig::with_partitions(2);
//! config.sync.max_period = Some(10);
//! let mut builder = SimulationBuilder::new(config).unwrap();
//!
//! let out = builder.add_output_link(PartitionId(0), "wire", 10).unwrap();
//! builder
//!     .add_link(PartitionId(1), "wire", 10, |ev: Event, ctx: &mut Context<'_>| {
//!         assert_eq!(ctx.now(), 12);
//!         assert_eq!(ev.downcast_ref::<u32>(), Some(&7));
//!         Ok::<(), LinkError>(())
//!     })
//!     .unwrap();
//!
//! // A clock on partition 0 sends once on its first tick, then deregisters.
//! builder
//!     .register_clock(
//!         PartitionId(0),
//!         TimeConverter::new(1).unwrap(),
//!         move |_cycle: Cycle, ctx: &mut Context<'_>| {
//!             ctx.send(out.link, 1, 7u32).is_ok()
//!         },
//!     )
//!     .unwrap();
//!
//! let report = builder.build().unwrap().run().unwrap();
//! assert_eq!(report.events_delivered(), 1);
//! assert_eq!(report.clock_fires(), 1);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `strand-core` | IDs, `Activity`, `ActivityQueue`, time conversion, core traits |
//! | [`engine`] | `strand-engine` | Clocks, links, barriers, skip-ahead sync, partition runtime |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`strand-core`).
///
/// Contains simulated-time types, [`types::Activity`],
/// [`types::ActivityQueue`], [`types::TimeLord`], and the
/// [`types::EventPayload`] and [`types::TimeSource`] traits.
pub use strand_core as types;

/// Partition runtime (`strand-engine`).
///
/// [`engine::SimulationBuilder`] wires links and clocks across partitions;
/// [`engine::Simulation::run`] runs one thread per partition.
pub use strand_engine as engine;

/// Common imports for typical Strand usage.
///
/// ```rust
/// use strand::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use strand_core::{
        priority, Cycle, EventPayload, LinkId, PartitionId, Priority, SimTime, TimeConverter,
        TimeLord, TimeSource, MAX_SIM_TIME,
    };

    // Errors
    pub use strand_core::{QueueError, TimeError};
    pub use strand_engine::{ConfigError, LinkError, RunError};

    // Engine
    pub use strand_engine::{
        ClockHandle, ClockHandler, ClockPolicy, ClockProfileMode, Context, Event, EventHandler,
        LinkEnd, RunReport, SimConfig, Simulation, SimulationBuilder, Stage, StopReason,
        SyncProfileMode, UntimedContext, UntimedHandler,
    };
}
