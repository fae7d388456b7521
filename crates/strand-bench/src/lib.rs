//! Benchmark profiles for the Strand simulation core.
//!
//! Provides pre-built [`Simulation`] profiles for benchmarks and examples:
//!
//! - [`ring_profile`]: events circulating around a ring of partitions
//! - [`clock_profile`]: one partition with many clocks of different periods

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strand_core::{Cycle, LinkId, PartitionId, SimTime, TimeConverter};
use strand_engine::{
    ConfigError, Context, Event, EventHandler, LinkError, SimConfig, Simulation, SimulationBuilder,
};

/// The ring's outgoing end is the first link on every partition.
const RING_OUT: LinkId = LinkId(0);

/// Payload circulating in [`ring_profile`].
#[derive(Clone, Copy, Debug)]
pub struct Token {
    /// Hops left before the token is dropped.
    pub hops_left: u32,
}

fn ring_hop(seed: u64, max_delay: SimTime) -> impl EventHandler + 'static {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    move |ev: Event, ctx: &mut Context<'_>| -> Result<(), LinkError> {
        let Some(token) = ev.downcast_ref::<Token>().copied() else {
            return Ok(());
        };
        if token.hops_left == 0 {
            return Ok(());
        }
        let delay = rng.next_u64() % (max_delay + 1);
        ctx.send(
            RING_OUT,
            delay,
            Token {
                hops_left: token.hops_left - 1,
            },
        )
    }
}

/// Build a ring of `partitions` partitions. Partition `i` sends to
/// `i + 1` over a link with latency `window`; each partition starts
/// `tokens` tokens that make `hops` hops each.
///
/// # Errors
///
/// Propagates any [`ConfigError`] from the builder.
pub fn ring_profile(
    partitions: usize,
    window: SimTime,
    tokens: u32,
    hops: u32,
    seed: u64,
) -> Result<Simulation, ConfigError> {
    let mut cfg = SimConfig::with_partitions(partitions);
    cfg.sync.max_period = Some(window);
    let mut b = SimulationBuilder::new(cfg)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    for i in 0..partitions {
        b.add_output_link(PartitionId(i as u32), &format!("ring-{i}"), window)?;
    }
    for i in 0..partitions {
        let to = PartitionId(((i + 1) % partitions) as u32);
        b.add_link(to, &format!("ring-{i}"), window, ring_hop(seed ^ i as u64, window))?;
    }
    for i in 0..partitions {
        let p = PartitionId(i as u32);
        let start = b.add_link(p, "start", 0, ring_hop(!seed ^ i as u64, window))?;
        b.add_output_link(p, "start", 0)?;
        for _ in 0..tokens {
            let at = rng.next_u64() % (window * 4);
            b.schedule_event(start, at, Token { hops_left: hops })?;
        }
    }
    b.build()
}

/// Build a single partition with `clocks` clocks of periods 1, 2, ...
/// that each stop after `cycles` firings.
///
/// # Errors
///
/// Propagates any [`ConfigError`] from the builder.
pub fn clock_profile(clocks: u64, cycles: Cycle) -> Result<Simulation, ConfigError> {
    let mut b = SimulationBuilder::new(SimConfig::default())?;
    for period in 1..=clocks {
        let factor = TimeConverter::new(period)?;
        b.register_clock(
            PartitionId(0),
            factor,
            move |cycle: Cycle, _: &mut Context<'_>| cycle >= cycles,
        )?;
    }
    b.build()
}
