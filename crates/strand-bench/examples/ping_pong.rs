//! Two partitions bouncing a counter across a link.
//!
//! Run with `RUST_LOG=debug` to see every sync epoch, or `RUST_LOG=trace`
//! for every dispatched activity.

use strand_core::{LinkId, PartitionId, SimTime};
use strand_engine::{
    Context, Event, LinkError, SimConfig, SimulationBuilder, SyncProfileMode,
};
use tracing_subscriber::EnvFilter;

const LATENCY: SimTime = 25;
const VOLLEYS: u32 = 20;

fn player(out: LinkId) -> impl FnMut(Event, &mut Context<'_>) -> Result<(), LinkError> + Send {
    move |ev: Event, ctx: &mut Context<'_>| {
        let Some(&count) = ev.downcast_ref::<u32>() else {
            return Ok(());
        };
        tracing::info!(partition = %ctx.partition(), time = ctx.now(), count, "hit");
        if count < VOLLEYS {
            ctx.send(out, count as SimTime % 5, count + 1)?;
        }
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let mut config = SimConfig::with_partitions(2);
    config.sync.profile = SyncProfileMode::Time;
    let mut b = SimulationBuilder::new(config).unwrap();

    // Link ids follow insertion order per partition: each side's
    // outgoing end is added first.
    b.add_output_link(PartitionId(0), "east", LATENCY).unwrap();
    b.add_output_link(PartitionId(1), "west", LATENCY).unwrap();
    let serve = b
        .add_link(PartitionId(0), "west", LATENCY, player(LinkId(0)))
        .unwrap();
    b.add_link(PartitionId(1), "east", LATENCY, player(LinkId(0)))
        .unwrap();
    b.schedule_event(serve, 0, 0u32).unwrap();

    let sim = b.build().unwrap();
    println!("max_period = {}", sim.max_period());
    let report = sim.run().unwrap();

    for p in &report.partitions {
        println!(
            "partition {}: stop={:?} time={} events={} epochs={} wait={:?}",
            p.partition,
            p.stop,
            p.metrics.final_time,
            p.metrics.events_delivered,
            p.metrics.sync_epochs,
            p.metrics.sync_wait,
        );
        if let Some(profile) = p.metrics.sync_profile {
            println!("{profile}");
        }
    }
    println!(
        "total: {} events, {} exchanged, wall {:?}",
        report.events_delivered(),
        report.activities_exchanged(),
        report.wall_time
    );
}
