//! Run lifecycle: failure propagation across partitions, clocks added by
//! handlers, the untimed init and complete stages, and clock profiling.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use strand_core::{priority, LinkId, PartitionId, Priority, TimeConverter};
use strand_engine::{
    ClockPolicy, ClockProfileMode, Context, Event, LinkEnd, LinkError, RunError, RunReport,
    SimConfig, Simulation, SimulationBuilder, Stage, StopReason, UntimedContext,
};
use strand_test_utils::fixtures::{cycle_log, CountdownClock, CycleLog};

const P0: PartitionId = PartitionId(0);
const P1: PartitionId = PartitionId(1);

fn two_partitions(window: u64) -> SimConfig {
    let mut cfg = SimConfig::with_partitions(2);
    cfg.sync.max_period = Some(window);
    cfg
}

fn ten() -> TimeConverter {
    TimeConverter::new(10).unwrap()
}

/// Run on a helper thread so a hang fails the test instead of stalling it.
fn run_with_deadline(sim: Simulation) -> Result<RunReport, RunError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(sim.run());
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("run did not return")
}

/// Two partitions joined by "A" (latency 10), plus a local "kick" pair on
/// P0 running `on_kick` at t=1.
fn failing_pair(
    on_kick: impl FnMut(Event, &mut Context<'_>) -> Result<(), LinkError> + Send + 'static,
) -> Simulation {
    let mut b = SimulationBuilder::new(two_partitions(10)).unwrap();
    b.add_output_link(P0, "A", 10).unwrap();
    b.add_link(P1, "A", 10, |_: Event, _: &mut Context<'_>| Ok::<(), LinkError>(()))
        .unwrap();
    let kick = b.add_link(P0, "kick", 0, on_kick).unwrap();
    b.add_output_link(P0, "kick", 0).unwrap();
    b.schedule_event(kick, 1, ()).unwrap();
    b.build().unwrap()
}

// ── Failure propagation ────────────────────────────────────────────

#[test]
fn handler_error_ends_multi_partition_run() {
    let sim = failing_pair(|_: Event, ctx: &mut Context<'_>| ctx.send(LinkId(99), 0, ()));

    match run_with_deadline(sim) {
        Err(RunError::Link(LinkError::UnknownLink { partition, link })) => {
            assert_eq!(partition, P0);
            assert_eq!(link, LinkId(99));
        }
        other => panic!("expected UnknownLink, got {other:?}"),
    }
}

#[test]
fn handler_panic_ends_multi_partition_run() {
    let sim = failing_pair(|_: Event, _: &mut Context<'_>| -> Result<(), LinkError> {
        panic!("handler blew up")
    });

    match run_with_deadline(sim) {
        Err(RunError::PartitionPanicked { partition }) => assert_eq!(partition, P0),
        other => panic!("expected PartitionPanicked, got {other:?}"),
    }
}

#[test]
fn untimed_send_error_ends_multi_partition_run() {
    let mut b = SimulationBuilder::new(two_partitions(10)).unwrap();
    b.add_output_link(P0, "A", 10).unwrap();
    b.add_output_link(P1, "A", 10).unwrap();
    b.add_untimed_handler(P0, |ctx: &mut UntimedContext<'_>| {
        ctx.send_untimed(LinkId(42), ())
    })
    .unwrap();

    match run_with_deadline(b.build().unwrap()) {
        Err(RunError::Link(LinkError::UnknownLink { partition, .. })) => {
            assert_eq!(partition, P0)
        }
        other => panic!("expected UnknownLink, got {other:?}"),
    }
}

// ── Clocks added by handlers ───────────────────────────────────────

/// A single partition where an event at t=20, dispatched at `at_priority`,
/// registers a two-shot period-10 clock.
fn clock_added_at_20(policy: ClockPolicy, at_priority: Priority) -> CycleLog {
    let mut cfg = SimConfig::default();
    cfg.clock.policy = policy;
    let log = cycle_log();
    let mut b = SimulationBuilder::new(cfg).unwrap();
    let sink = log.clone();
    let end = b
        .add_link(
            P0,
            "spawn",
            0,
            move |_: Event, ctx: &mut Context<'_>| -> Result<(), LinkError> {
                ctx.register_clock(ten(), CountdownClock::new(2, sink.clone()));
                Ok(())
            },
        )
        .unwrap();
    b.add_output_link(P0, "spawn", 0).unwrap();
    b.schedule_event_with_priority(end, 20, at_priority, ())
        .unwrap();

    let report = b.build().unwrap().run().unwrap();
    assert_eq!(report.partitions[0].stop, StopReason::Exhausted);
    log
}

#[test]
fn handler_added_clock_follows_placement_policy() {
    let cases = [
        (ClockPolicy::SameInstant, priority::THREAD_SYNC, vec![(20, 3), (30, 4)]),
        (ClockPolicy::SameInstant, priority::EVENT, vec![(30, 3), (40, 4)]),
        (ClockPolicy::NextBoundary, priority::THREAD_SYNC, vec![(30, 3), (40, 4)]),
        (ClockPolicy::NextBoundary, priority::EVENT, vec![(30, 3), (40, 4)]),
    ];
    for (policy, at_priority, expected) in cases {
        let log = clock_added_at_20(policy, at_priority);
        assert_eq!(
            *log.lock().unwrap(),
            expected,
            "{policy:?} at priority {at_priority}"
        );
    }
}

#[test]
fn emptied_clock_restarts_when_a_handler_returns() {
    let first = cycle_log();
    let second = cycle_log();
    let mut b = SimulationBuilder::new(SimConfig::default()).unwrap();
    let handle = b
        .register_clock(P0, ten(), CountdownClock::forever(first.clone()))
        .unwrap();

    let sink = second.clone();
    let end = b
        .add_link(
            P0,
            "ctl",
            0,
            move |ev: Event, ctx: &mut Context<'_>| -> Result<(), LinkError> {
                match ev.downcast_ref::<u8>() {
                    Some(0) => ctx.unregister_clock(handle),
                    _ => {
                        ctx.register_clock(ten(), CountdownClock::new(1, sink.clone()));
                    }
                }
                Ok(())
            },
        )
        .unwrap();
    b.add_output_link(P0, "ctl", 0).unwrap();
    b.schedule_event(end, 20, 0u8).unwrap();
    b.schedule_event(end, 45, 1u8).unwrap();

    let report = b.build().unwrap().run().unwrap();
    // The clock fires before the event at t=20, then goes dormant.
    assert_eq!(*first.lock().unwrap(), vec![(10, 1), (20, 2)]);
    assert_eq!(*second.lock().unwrap(), vec![(50, 5)]);
    assert_eq!(report.partitions[0].metrics.final_time, 50);
}

// ── Untimed stages ─────────────────────────────────────────────────

/// Links: "hs" between P0 and P1, "loop" within P0.
fn handshake() -> (SimulationBuilder, LinkEnd, LinkEnd, LinkEnd, LinkEnd) {
    let mut b = SimulationBuilder::new(SimConfig::with_partitions(2)).unwrap();
    let hs0 = b.add_output_link(P0, "hs", 10).unwrap();
    let hs1 = b.add_output_link(P1, "hs", 10).unwrap();
    let loop_a = b.add_output_link(P0, "loop", 0).unwrap();
    let loop_b = b.add_output_link(P0, "loop", 0).unwrap();
    (b, hs0, hs1, loop_a, loop_b)
}

#[test]
fn untimed_handshake_runs_until_quiet() {
    let (mut b, hs0, hs1, loop_a, loop_b) = handshake();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    b.add_untimed_handler(P0, move |ctx: &mut UntimedContext<'_>| -> Result<(), LinkError> {
        if ctx.stage() != Stage::Init {
            return Ok(());
        }
        if ctx.phase() == 0 {
            ctx.send_untimed(hs0.link, 7u32)?;
            ctx.send_untimed(loop_a.link, 100u32)?;
        }
        for link in [hs0.link, loop_b.link] {
            while let Some(ev) = ctx.recv_untimed(link) {
                let value = *ev.downcast_ref::<u32>().unwrap();
                log.lock().unwrap().push((ctx.phase(), value));
            }
        }
        Ok(())
    })
    .unwrap();

    b.add_untimed_handler(P1, move |ctx: &mut UntimedContext<'_>| -> Result<(), LinkError> {
        match ctx.stage() {
            Stage::Init => {
                if let Some(ev) = ctx.recv_untimed(hs1.link) {
                    let value = *ev.downcast_ref::<u32>().unwrap();
                    ctx.send_untimed(hs1.link, value + 1)?;
                }
            }
            Stage::Complete if ctx.phase() == 0 => ctx.send_untimed(hs1.link, "bye")?,
            Stage::Complete => {}
        }
        Ok(())
    })
    .unwrap();

    let report = run_with_deadline(b.build().unwrap()).unwrap();

    // Local sends surface one phase later; the reply one phase after that.
    assert_eq!(*seen.lock().unwrap(), vec![(1, 100), (2, 8)]);

    let (m0, m1) = (&report.partitions[0].metrics, &report.partitions[1].metrics);
    // Three init rounds, two complete rounds, on every partition.
    assert_eq!(m0.untimed_rounds, 5);
    assert_eq!(m1.untimed_rounds, 5);
    assert_eq!(m0.untimed_received, 3);
    assert_eq!(m1.untimed_received, 1);
    // Nobody reads the farewell.
    assert_eq!(m0.untimed_dropped, 1);
    assert_eq!(m1.untimed_dropped, 0);
    // Untimed traffic never touches the timed exchange.
    assert_eq!(report.activities_exchanged(), 0);
    assert_eq!(report.partitions[0].stop, StopReason::Drained);
}

#[test]
fn untimed_send_on_unknown_link_fails_single_partition() {
    let mut b = SimulationBuilder::new(SimConfig::default()).unwrap();
    b.add_output_link(P0, "x", 1).unwrap();
    b.add_output_link(P0, "x", 1).unwrap();
    b.add_untimed_handler(P0, |ctx: &mut UntimedContext<'_>| {
        ctx.send_untimed(LinkId(7), 1u8)
    })
    .unwrap();
    assert!(matches!(
        b.build().unwrap().run(),
        Err(RunError::Link(LinkError::UnknownLink { .. }))
    ));
}

#[test]
fn runs_without_untimed_handlers_skip_the_stages() {
    let mut b = SimulationBuilder::new(SimConfig::default()).unwrap();
    b.register_clock(P0, ten(), CountdownClock::new(1, cycle_log()))
        .unwrap();
    let report = b.build().unwrap().run().unwrap();
    assert_eq!(report.partitions[0].metrics.untimed_rounds, 0);
}

// ── Clock profiling ────────────────────────────────────────────────

#[test]
fn clock_profile_lands_in_partition_metrics() {
    let mut cfg = SimConfig::default();
    cfg.clock.profile = ClockProfileMode::Time;
    let mut b = SimulationBuilder::new(cfg).unwrap();
    b.register_clock(P0, ten(), CountdownClock::new(3, cycle_log()))
        .unwrap();
    b.register_clock(P0, TimeConverter::new(25).unwrap(), CountdownClock::new(1, cycle_log()))
        .unwrap();

    let report = b.build().unwrap().run().unwrap();
    let profile = &report.partitions[0].metrics.clock_profile;
    assert_eq!(profile.len(), 2);
    assert_eq!((profile[0].factor, profile[0].calls), (10, 3));
    assert_eq!((profile[1].factor, profile[1].calls), (25, 1));
    assert!(profile.iter().all(|p| p.time.is_some()));
}

#[test]
fn clock_profile_is_empty_by_default() {
    let mut b = SimulationBuilder::new(SimConfig::default()).unwrap();
    b.register_clock(P0, ten(), CountdownClock::new(2, cycle_log()))
        .unwrap();
    let report = b.build().unwrap().run().unwrap();
    assert!(report.partitions[0].metrics.clock_profile.is_empty());
}
