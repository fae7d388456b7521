//! Recurring clocks layered on the activity queue.
//!
//! A [`Clock`] is a recurring activity: every period it increments its
//! cycle counter, calls each registered [`ClockHandler`] in registration
//! order, and reschedules itself one period later. Handlers return `true`
//! to be removed. A clock whose handlers are all gone stops rescheduling
//! and goes dormant until another handler registers.
//!
//! [`ClockSet`] keeps one clock per distinct period for a partition.
//! Handlers registered or removed while the partition runs go through
//! [`ClockRequests`] and are applied as soon as the dispatching handler
//! returns, at the same time and priority.
//!
//! With [`ClockProfileMode`] enabled each handler also counts its calls
//! and, in `Time` mode, the wall time spent in them.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use smallvec::SmallVec;
use strand_core::{ClockId, Cycle, HandlerId, Priority, SimTime, TimeConverter, TimeSource};
use tracing::{trace, warn};

use crate::config::{ClockConfig, ClockPolicy, ClockProfileMode, ConfigError};
use crate::context::Context;
use crate::event::Action;
use crate::profile::ClockHandlerProfile;
use crate::timeline::Timeline;

/// A periodic callback.
///
/// Implemented for any `FnMut(Cycle, &mut Context) -> bool` closure that
/// is `Send`.
pub trait ClockHandler: Send {
    /// Called once per clock cycle. Return `true` to deregister.
    fn on_cycle(&mut self, cycle: Cycle, ctx: &mut Context<'_>) -> bool;
}

impl<F> ClockHandler for F
where
    F: FnMut(Cycle, &mut Context<'_>) -> bool + Send,
{
    fn on_cycle(&mut self, cycle: Cycle, ctx: &mut Context<'_>) -> bool {
        self(cycle, ctx)
    }
}

// ── Clock ──────────────────────────────────────────────────────────

struct Registered {
    id: HandlerId,
    handler: Box<dyn ClockHandler>,
    calls: u64,
    time: Duration,
}

/// One recurring clock with a fixed period.
pub struct Clock {
    id: ClockId,
    period: TimeConverter,
    priority: Priority,
    policy: ClockPolicy,
    profile: ClockProfileMode,
    current_cycle: Cycle,
    handlers: SmallVec<[Registered; 4]>,
    retired: Vec<ClockHandlerProfile>,
    scheduled: bool,
}

impl Clock {
    /// A dormant clock with no handlers.
    pub fn new(id: ClockId, period: TimeConverter, config: &ClockConfig) -> Self {
        Self {
            id,
            period,
            priority: config.priority,
            policy: config.policy,
            profile: config.profile,
            current_cycle: 0,
            handlers: SmallVec::new(),
            retired: Vec::new(),
            scheduled: false,
        }
    }

    /// Append a handler, scheduling the clock if it is not already queued.
    pub fn register_handler(
        &mut self,
        id: HandlerId,
        handler: Box<dyn ClockHandler>,
        timeline: &mut Timeline,
    ) {
        self.handlers.push(Registered {
            id,
            handler,
            calls: 0,
            time: Duration::ZERO,
        });
        if !self.scheduled {
            self.schedule(timeline);
        }
    }

    /// Remove a handler. Returns whether no handlers remain.
    ///
    /// The clock stays queued until its next firing, at which point it
    /// notices it is empty and drops out.
    pub fn unregister_handler(&mut self, id: HandlerId) -> bool {
        if let Some(i) = self.handlers.iter().position(|r| r.id == id) {
            let gone = self.handlers.remove(i);
            self.retire(gone);
        }
        self.handlers.is_empty()
    }

    fn retire(&mut self, gone: Registered) {
        if self.profile != ClockProfileMode::Off {
            let entry = self.handler_profile(&gone);
            self.retired.push(entry);
        }
    }

    fn handler_profile(&self, r: &Registered) -> ClockHandlerProfile {
        ClockHandlerProfile {
            factor: self.period.factor(),
            handler: r.id,
            calls: r.calls,
            time: (self.profile == ClockProfileMode::Time).then_some(r.time),
        }
    }

    fn schedule(&mut self, timeline: &mut Timeline) {
        let now = timeline.now();
        let factor = self.period.factor();
        self.current_cycle = now / factor;
        let mut next = self.current_cycle * factor + factor;

        if self.policy == ClockPolicy::SameInstant
            && timeline.current_priority() < self.priority
            && now != 0
            && now % factor == 0
        {
            next = now;
        }

        trace!(clock = %self.id, factor, next, "clock scheduled");
        timeline.insert(next, self.priority, Action::Clock(self.id));
        self.scheduled = true;
    }

    /// Fire one cycle.
    pub fn execute(&mut self, ctx: &mut Context<'_>) {
        if self.handlers.is_empty() {
            self.scheduled = false;
            return;
        }

        self.current_cycle += 1;
        let cycle = self.current_cycle;
        let mut i = 0;
        while i < self.handlers.len() {
            let entry = &mut self.handlers[i];
            let done = match self.profile {
                ClockProfileMode::Off => entry.handler.on_cycle(cycle, ctx),
                ClockProfileMode::Count => {
                    entry.calls += 1;
                    entry.handler.on_cycle(cycle, ctx)
                }
                ClockProfileMode::Time => {
                    let start = Instant::now();
                    let done = entry.handler.on_cycle(cycle, ctx);
                    entry.time += start.elapsed();
                    entry.calls += 1;
                    done
                }
            };
            if done {
                let gone = self.handlers.remove(i);
                self.retire(gone);
            } else {
                i += 1;
            }
        }

        if self.handlers.is_empty() {
            self.scheduled = false;
        } else {
            let next = ctx.now().saturating_add(self.period.factor());
            ctx.timeline().insert(next, self.priority, Action::Clock(self.id));
        }
    }

    /// Cycle the next firing will carry.
    pub fn next_cycle(&self) -> Cycle {
        self.current_cycle + 1
    }

    /// Cycle of the most recent firing.
    pub fn current_cycle(&self) -> Cycle {
        self.current_cycle
    }

    /// Period of this clock.
    pub fn period(&self) -> TimeConverter {
        self.period
    }

    /// Whether the clock is queued.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Per-handler call counts and times, live and removed, in
    /// registration order. Empty when profiling is off.
    pub fn profile(&self) -> Vec<ClockHandlerProfile> {
        if self.profile == ClockProfileMode::Off {
            return Vec::new();
        }
        let mut all = self.retired.clone();
        all.extend(self.handlers.iter().map(|r| self.handler_profile(r)));
        all.sort_by_key(|p| p.handler);
        all
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("id", &self.id)
            .field("factor", &self.period.factor())
            .field("priority", &self.priority)
            .field("current_cycle", &self.current_cycle)
            .field("handlers", &self.handlers.len())
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

// ── ClockSet ───────────────────────────────────────────────────────

/// Identifies one registered clock handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClockHandle {
    /// Period factor of the clock.
    pub factor: SimTime,
    /// The handler.
    pub handler: HandlerId,
}

enum ClockRequest {
    Register {
        handle: ClockHandle,
        period: TimeConverter,
        handler: Box<dyn ClockHandler>,
    },
    Unregister(ClockHandle),
}

/// Clock registrations and removals requested by handlers mid-run.
///
/// Handles are allocated immediately so the caller can keep them; the
/// requests themselves wait for [`ClockSet::apply`].
#[derive(Default)]
pub struct ClockRequests {
    next_handler: u64,
    queued: Vec<ClockRequest>,
}

impl ClockRequests {
    /// Queue a new handler on the clock with `period`.
    pub fn register(
        &mut self,
        period: TimeConverter,
        handler: Box<dyn ClockHandler>,
    ) -> ClockHandle {
        let handle = ClockHandle {
            factor: period.factor(),
            handler: HandlerId(self.next_handler),
        };
        self.next_handler += 1;
        self.queued.push(ClockRequest::Register {
            handle,
            period,
            handler,
        });
        handle
    }

    /// Queue removal of a handler.
    pub fn unregister(&mut self, handle: ClockHandle) {
        self.queued.push(ClockRequest::Unregister(handle));
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queued.len()
    }
}

impl std::fmt::Debug for ClockRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockRequests")
            .field("next_handler", &self.next_handler)
            .field("queued", &self.queued.len())
            .finish()
    }
}

/// A partition's clocks, one per distinct period.
///
/// Clocks are never removed, so a [`ClockId`] (its index here) stays
/// valid for the life of the partition.
#[derive(Debug, Default)]
pub struct ClockSet {
    clocks: IndexMap<SimTime, Clock>,
    config: ClockConfig,
    next_handler: u64,
    fired: u64,
}

impl ClockSet {
    /// An empty set using `config` for every clock it creates.
    pub fn new(config: ClockConfig) -> Self {
        Self {
            clocks: IndexMap::new(),
            config,
            next_handler: 0,
            fired: 0,
        }
    }

    /// Register `handler` on the clock with `period`, creating the clock
    /// on first use.
    pub fn register(
        &mut self,
        period: TimeConverter,
        handler: Box<dyn ClockHandler>,
        timeline: &mut Timeline,
    ) -> ClockHandle {
        let id = HandlerId(self.next_handler);
        self.attach(id, period, handler, timeline);
        ClockHandle {
            factor: period.factor(),
            handler: id,
        }
    }

    fn attach(
        &mut self,
        id: HandlerId,
        period: TimeConverter,
        handler: Box<dyn ClockHandler>,
        timeline: &mut Timeline,
    ) {
        self.next_handler = self.next_handler.max(id.0 + 1);
        let next_id = ClockId(self.clocks.len() as u32);
        let config = &self.config;
        let clock = self
            .clocks
            .entry(period.factor())
            .or_insert_with(|| Clock::new(next_id, period, config));
        clock.register_handler(id, handler, timeline);
    }

    /// An empty request queue whose handles continue this set's
    /// numbering. Once the partition runs, all registration goes through
    /// it.
    pub fn requests(&self) -> ClockRequests {
        ClockRequests {
            next_handler: self.next_handler,
            queued: Vec::new(),
        }
    }

    /// Apply every queued request in order against the current time of
    /// `timeline`. Removals naming an unknown clock are logged and
    /// skipped.
    pub fn apply(&mut self, requests: &mut ClockRequests, timeline: &mut Timeline) {
        for request in std::mem::take(&mut requests.queued) {
            match request {
                ClockRequest::Register {
                    handle,
                    period,
                    handler,
                } => {
                    trace!(factor = handle.factor, handler = %handle.handler, "clock handler added");
                    self.attach(handle.handler, period, handler, timeline);
                }
                ClockRequest::Unregister(handle) => {
                    if let Err(e) = self.unregister(handle) {
                        warn!(error = %e, "clock removal ignored");
                    }
                }
            }
        }
    }

    /// Remove a handler. Returns whether its clock has no handlers left.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownClock`] if no clock has the handle's
    /// period.
    pub fn unregister(&mut self, handle: ClockHandle) -> Result<bool, ConfigError> {
        self.clocks
            .get_mut(&handle.factor)
            .map(|clock| clock.unregister_handler(handle.handler))
            .ok_or(ConfigError::UnknownClock {
                factor: handle.factor,
            })
    }

    /// Fire the clock with `id`. Unknown ids are ignored.
    pub fn execute(&mut self, id: ClockId, ctx: &mut Context<'_>) {
        if let Some((_, clock)) = self.clocks.get_index_mut(id.index()) {
            clock.execute(ctx);
            self.fired += 1;
        }
    }

    /// The clock with period `factor`.
    pub fn get(&self, factor: SimTime) -> Option<&Clock> {
        self.clocks.get(&factor)
    }

    /// Number of clocks ever created.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Whether no clock was ever created.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Total clock firings dispatched.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Per-handler profile across every clock, by handler id. Empty when
    /// profiling is off.
    pub fn profile(&self) -> Vec<ClockHandlerProfile> {
        let mut all: Vec<_> = self.clocks.values().flat_map(Clock::profile).collect();
        all.sort_by_key(|p| p.handler);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkQueue, LinkRoutes};
    use std::sync::{Arc, Mutex};
    use strand_core::{priority, PartitionId};

    fn conv(factor: SimTime) -> TimeConverter {
        TimeConverter::new(factor).unwrap()
    }

    fn clock_count(tl: &Timeline) -> usize {
        tl.count_pending(|a| matches!(a, Action::Clock(_)))
    }

    /// Pop and dispatch clock activities up to and including `until`.
    fn run_until(set: &mut ClockSet, tl: &mut Timeline, until: SimTime) {
        let routes = LinkRoutes::new(PartitionId(0));
        let mut outbound: Vec<LinkQueue> = Vec::new();
        let mut requests = set.requests();
        while tl.next_activity_time() <= until {
            let activity = tl.advance().unwrap();
            if let Action::Clock(id) = activity.into_payload() {
                let mut ctx = Context::new(PartitionId(0), tl, &routes, &mut outbound, &mut requests);
                set.execute(id, &mut ctx);
            }
            set.apply(&mut requests, tl);
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<(SimTime, Cycle)>>>, Box<dyn ClockHandler>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let handler = move |cycle: Cycle, ctx: &mut Context<'_>| {
            sink.lock().unwrap().push((ctx.now(), cycle));
            false
        };
        (log, Box::new(handler))
    }

    #[test]
    fn fires_every_period_with_increasing_cycles() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let (log, h) = recorder();
        set.register(conv(10), h, &mut tl);

        run_until(&mut set, &mut tl, 40);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(10, 1), (20, 2), (30, 3), (40, 4)]
        );
        assert_eq!(set.get(10).unwrap().next_cycle(), 5);
        assert_eq!(clock_count(&tl), 1);
    }

    #[test]
    fn handler_removing_itself_leaves_queue() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let calls = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&calls);
        set.register(
            conv(5),
            Box::new(move |cycle: Cycle, _: &mut Context<'_>| {
                *c.lock().unwrap() += 1;
                cycle == 2
            }),
            &mut tl,
        );

        run_until(&mut set, &mut tl, 100);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(clock_count(&tl), 0);
        let clock = set.get(5).unwrap();
        assert!(!clock.is_scheduled());
        assert_eq!(clock.handler_count(), 0);
    }

    #[test]
    fn handlers_run_in_registration_order_and_removal_is_stable() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let o = Arc::clone(&order);
            set.register(
                conv(10),
                Box::new(move |_: Cycle, _: &mut Context<'_>| {
                    o.lock().unwrap().push(tag);
                    tag == 1
                }),
                &mut tl,
            );
        }
        assert_eq!(set.len(), 1);
        assert_eq!(clock_count(&tl), 1);

        run_until(&mut set, &mut tl, 20);
        // Removing handler 1 mid-iteration must not skip handler 2.
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 2]);
    }

    #[test]
    fn external_unregister_drops_out_at_next_firing() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let (log, h) = recorder();
        let handle = set.register(conv(10), h, &mut tl);

        assert_eq!(set.unregister(handle), Ok(true));
        assert_eq!(clock_count(&tl), 1);
        run_until(&mut set, &mut tl, 50);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(clock_count(&tl), 0);
        assert!(!set.get(10).unwrap().is_scheduled());

        assert_eq!(
            set.unregister(ClockHandle {
                factor: 7,
                handler: HandlerId(0)
            }),
            Err(ConfigError::UnknownClock { factor: 7 })
        );
    }

    #[test]
    fn dormant_clock_restarts_on_new_handler() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        set.register(
            conv(10),
            Box::new(|_: Cycle, _: &mut Context<'_>| true),
            &mut tl,
        );
        run_until(&mut set, &mut tl, 10);
        assert!(!set.get(10).unwrap().is_scheduled());

        // Park the timeline at 25 via an unrelated activity.
        tl.insert(25, priority::EVENT, Action::Stop);
        tl.advance().unwrap();

        let (log, h) = recorder();
        set.register(conv(10), h, &mut tl);
        run_until(&mut set, &mut tl, 40);
        assert_eq!(*log.lock().unwrap(), vec![(30, 3), (40, 4)]);
    }

    fn placement_at_boundary(policy: ClockPolicy, current: Priority) -> SimTime {
        let mut tl = Timeline::new();
        tl.insert(20, current, Action::Stop);
        tl.advance().unwrap();
        let mut set = ClockSet::new(ClockConfig {
            priority: priority::CLOCK,
            policy,
            ..ClockConfig::default()
        });
        let (_, h) = recorder();
        set.register(conv(10), h, &mut tl);
        tl.next_activity_time()
    }

    #[test]
    fn same_instant_policy_fires_now_under_lower_priority() {
        assert_eq!(
            placement_at_boundary(ClockPolicy::SameInstant, priority::THREAD_SYNC),
            20
        );
        assert_eq!(
            placement_at_boundary(ClockPolicy::SameInstant, priority::EVENT),
            30
        );
    }

    #[test]
    fn next_boundary_policy_always_defers() {
        assert_eq!(
            placement_at_boundary(ClockPolicy::NextBoundary, priority::THREAD_SYNC),
            30
        );
        assert_eq!(
            placement_at_boundary(ClockPolicy::NextBoundary, priority::EVENT),
            30
        );
    }

    #[test]
    fn time_zero_always_defers() {
        for policy in [ClockPolicy::SameInstant, ClockPolicy::NextBoundary] {
            let mut tl = Timeline::new();
            let mut set = ClockSet::new(ClockConfig {
                priority: priority::CLOCK,
                policy,
                ..ClockConfig::default()
            });
            let (_, h) = recorder();
            set.register(conv(10), h, &mut tl);
            assert_eq!(tl.next_activity_time(), 10);
        }
    }

    #[test]
    fn off_boundary_rounds_up() {
        let mut tl = Timeline::new();
        tl.insert(23, priority::STOP_ACTION, Action::Stop);
        tl.advance().unwrap();
        let mut set = ClockSet::new(ClockConfig::default());
        let (log, h) = recorder();
        set.register(conv(10), h, &mut tl);
        run_until(&mut set, &mut tl, 30);
        assert_eq!(*log.lock().unwrap(), vec![(30, 3)]);
    }

    #[test]
    fn handler_can_add_a_clock_mid_run() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        // At cycle 2 (t=20) the period-10 handler starts a period-7 clock.
        set.register(
            conv(10),
            Box::new(move |cycle: Cycle, ctx: &mut Context<'_>| {
                if cycle == 2 {
                    let sink = Arc::clone(&sink);
                    ctx.register_clock(conv(7), move |c: Cycle, ctx: &mut Context<'_>| {
                        sink.lock().unwrap().push((ctx.now(), c));
                        false
                    });
                }
                cycle == 3
            }),
            &mut tl,
        );

        run_until(&mut set, &mut tl, 35);
        assert_eq!(*log.lock().unwrap(), vec![(21, 3), (28, 4), (35, 5)]);
        assert_eq!(set.len(), 2);
        assert!(!set.get(10).unwrap().is_scheduled());
    }

    #[test]
    fn requested_handles_do_not_collide_with_setup_handles() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let (_, a) = recorder();
        let (_, b) = recorder();
        let first = set.register(conv(10), a, &mut tl);

        let mut requests = set.requests();
        let second = requests.register(conv(10), b);
        assert_ne!(first.handler, second.handler);
        set.apply(&mut requests, &mut tl);
        assert!(requests.is_empty());
        assert_eq!(set.get(10).unwrap().handler_count(), 2);

        requests.unregister(second);
        requests.unregister(ClockHandle {
            factor: 3,
            handler: HandlerId(99),
        });
        set.apply(&mut requests, &mut tl);
        assert_eq!(set.get(10).unwrap().handler_count(), 1);
    }

    #[test]
    fn profiling_counts_live_and_removed_handlers() {
        for mode in [ClockProfileMode::Count, ClockProfileMode::Time] {
            let mut tl = Timeline::new();
            let mut set = ClockSet::new(ClockConfig {
                profile: mode,
                ..ClockConfig::default()
            });
            let (_, keep) = recorder();
            set.register(conv(10), keep, &mut tl);
            set.register(
                conv(5),
                Box::new(|cycle: Cycle, _: &mut Context<'_>| cycle == 2),
                &mut tl,
            );

            run_until(&mut set, &mut tl, 40);
            let profile = set.profile();
            assert_eq!(profile.len(), 2);
            assert_eq!((profile[0].factor, profile[0].calls), (10, 4));
            assert_eq!((profile[1].factor, profile[1].calls), (5, 2));
            assert_eq!(
                profile[0].time.is_some(),
                mode == ClockProfileMode::Time
            );
        }
    }

    #[test]
    fn profiling_off_reports_nothing() {
        let mut tl = Timeline::new();
        let mut set = ClockSet::new(ClockConfig::default());
        let (_, h) = recorder();
        set.register(conv(10), h, &mut tl);
        run_until(&mut set, &mut tl, 30);
        assert!(set.profile().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn cycles_strictly_increase(factors in prop::collection::vec(1u64..20, 1..5), horizon in 1u64..200) {
                let mut tl = Timeline::new();
                let mut set = ClockSet::new(ClockConfig::default());
                let mut logs = Vec::new();
                for f in &factors {
                    let (log, h) = recorder();
                    set.register(conv(*f), h, &mut tl);
                    logs.push((*f, log));
                }
                run_until(&mut set, &mut tl, horizon);

                for (factor, log) in logs {
                    let fired = log.lock().unwrap();
                    for w in fired.windows(2) {
                        prop_assert!(w[0].1 < w[1].1);
                    }
                    for (time, cycle) in fired.iter() {
                        prop_assert_eq!(*time, cycle * factor);
                    }
                }
            }
        }
    }
}
