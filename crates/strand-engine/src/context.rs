//! The capability handed to event and clock handlers.

use strand_core::{
    priority, Activity, EventPayload, LinkId, PartitionId, Priority, SimTime, TimeConverter,
    TimeSource,
};

use crate::clock::{ClockHandle, ClockHandler, ClockRequests};
use crate::event::{Action, Event};
use crate::link::{Delivery, LinkError, LinkQueue, LinkRoutes};
use crate::timeline::Timeline;

/// What a handler may do while an activity executes: read the time, send
/// on the partition's links, and add or remove clock handlers.
///
/// Built fresh by the partition for every dispatched activity from
/// disjoint borrows of its own state.
pub struct Context<'a> {
    partition: PartitionId,
    timeline: &'a mut Timeline,
    routes: &'a LinkRoutes,
    outbound: &'a mut [LinkQueue],
    clocks: &'a mut ClockRequests,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        partition: PartitionId,
        timeline: &'a mut Timeline,
        routes: &'a LinkRoutes,
        outbound: &'a mut [LinkQueue],
        clocks: &'a mut ClockRequests,
    ) -> Self {
        Self {
            partition,
            timeline,
            routes,
            outbound,
            clocks,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.timeline.now()
    }

    /// The partition executing this handler.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Latency of one of this partition's link ends.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownLink`] if `link` does not exist here.
    pub fn link_latency(&self, link: LinkId) -> Result<SimTime, LinkError> {
        Ok(self.routes.get(link)?.latency())
    }

    /// Send `payload` on `link`, delivered at `now + latency + delay` to
    /// the other end.
    ///
    /// Same-partition links go straight into this partition's queue.
    /// Cross-partition sends are buffered until the next sync epoch.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownLink`] for a link id not in this
    /// partition, or [`LinkError::Unwired`] if the other end never
    /// registered.
    pub fn send<T: EventPayload>(
        &mut self,
        link: LinkId,
        delay: SimTime,
        payload: T,
    ) -> Result<(), LinkError> {
        self.send_boxed(link, delay, Box::new(payload))
    }

    /// [`send`](Self::send) for an already-boxed payload.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub fn send_boxed(
        &mut self,
        link: LinkId,
        delay: SimTime,
        payload: Box<dyn EventPayload>,
    ) -> Result<(), LinkError> {
        let route = self.routes.get(link)?;
        let at = self
            .timeline
            .now()
            .saturating_add(route.latency())
            .saturating_add(delay);

        match route.delivery() {
            Delivery::Unwired => Err(LinkError::Unwired {
                name: route.name().to_string(),
            }),
            Delivery::Local(target) => {
                self.timeline.insert(
                    at,
                    priority::EVENT,
                    Action::Deliver(Event::new(target, payload)),
                );
                Ok(())
            }
            Delivery::Remote(end) => {
                let queue = self
                    .outbound
                    .get_mut(end.partition.index())
                    .ok_or(LinkError::NoRoute {
                        partition: end.partition,
                    })?;
                queue.append(Activity::new(
                    at,
                    priority::EVENT,
                    Action::Deliver(Event::new(end.link, payload)),
                ));
                Ok(())
            }
        }
    }

    /// Register `handler` on this partition's clock with `period`.
    ///
    /// The clock is scheduled once the current handler returns, from the
    /// current time and priority, exactly as if it had been registered
    /// at this instant.
    pub fn register_clock(
        &mut self,
        period: TimeConverter,
        handler: impl ClockHandler + 'static,
    ) -> ClockHandle {
        self.clocks.register(period, Box::new(handler))
    }

    /// Remove a clock handler once the current handler returns. A clock
    /// left without handlers drops out at its next firing.
    pub fn unregister_clock(&mut self, handle: ClockHandle) {
        self.clocks.unregister(handle);
    }

    pub(crate) fn timeline(&mut self) -> &mut Timeline {
        self.timeline
    }
}

impl TimeSource for Context<'_> {
    fn current_sim_time(&self) -> SimTime {
        self.timeline.now()
    }

    fn current_priority(&self) -> Priority {
        self.timeline.current_priority()
    }
}

/// Receiver for events arriving on a link end.
///
/// Implemented for any `FnMut(Event, &mut Context) -> Result<(), LinkError>`
/// closure that is `Send`.
pub trait EventHandler: Send {
    /// Handle one delivered event.
    ///
    /// # Errors
    ///
    /// A send failure aborts the partition's run.
    fn handle(&mut self, event: Event, ctx: &mut Context<'_>) -> Result<(), LinkError>;
}

impl<F> EventHandler for F
where
    F: FnMut(Event, &mut Context<'_>) -> Result<(), LinkError> + Send,
{
    fn handle(&mut self, event: Event, ctx: &mut Context<'_>) -> Result<(), LinkError> {
        self(event, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkEnd, LinkRegistry};

    fn wired_pair() -> (Vec<LinkRoutes>, LinkId, LinkId, LinkId) {
        let mut routes = vec![
            LinkRoutes::new(PartitionId(0)),
            LinkRoutes::new(PartitionId(1)),
        ];
        let cross0 = routes[0].push("cross", 10);
        let cross1 = routes[1].push("cross", 10);
        let local_a = routes[0].push("loop", 2);
        let local_b = routes[0].push("loop", 2);
        let mut reg = LinkRegistry::new();
        reg.register_link("cross", LinkEnd::new(PartitionId(0), cross0), &mut routes)
            .unwrap();
        reg.register_link("cross", LinkEnd::new(PartitionId(1), cross1), &mut routes)
            .unwrap();
        reg.register_link("loop", LinkEnd::new(PartitionId(0), local_a), &mut routes)
            .unwrap();
        reg.register_link("loop", LinkEnd::new(PartitionId(0), local_b), &mut routes)
            .unwrap();
        (routes, cross0, local_a, local_b)
    }

    #[test]
    fn local_send_lands_in_own_timeline() {
        let (routes, _, local_a, local_b) = wired_pair();
        let mut tl = Timeline::new();
        let mut outbound = vec![LinkQueue::new(), LinkQueue::new()];
        let mut clocks = ClockRequests::default();
        let mut ctx = Context::new(
            PartitionId(0),
            &mut tl,
            &routes[0],
            &mut outbound,
            &mut clocks,
        );

        ctx.send(local_a, 3, 1u32).unwrap();
        assert!(outbound.iter().all(LinkQueue::is_empty));

        let a = tl.advance().unwrap();
        assert_eq!(a.delivery_time(), 5);
        match a.into_payload() {
            Action::Deliver(ev) => assert_eq!(ev.link(), local_b),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_send_is_buffered_for_destination() {
        let (routes, cross0, _, _) = wired_pair();
        let mut tl = Timeline::new();
        let mut outbound = vec![LinkQueue::new(), LinkQueue::new()];
        let mut clocks = ClockRequests::default();
        let mut ctx = Context::new(
            PartitionId(0),
            &mut tl,
            &routes[0],
            &mut outbound,
            &mut clocks,
        );

        ctx.send(cross0, 3, 1u32).unwrap();
        assert!(tl.is_empty());
        assert!(outbound[0].is_empty());
        let sent = outbound[1].drain_all();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].delivery_time(), 13);
    }

    #[test]
    fn unwired_and_unknown_links_error() {
        let mut routes = LinkRoutes::new(PartitionId(0));
        let dangling = routes.push("dangling", 1);
        let mut tl = Timeline::new();
        let mut outbound = vec![LinkQueue::new()];
        let mut clocks = ClockRequests::default();
        let mut ctx = Context::new(PartitionId(0), &mut tl, &routes, &mut outbound, &mut clocks);

        assert_eq!(
            ctx.send(dangling, 0, ()),
            Err(LinkError::Unwired {
                name: "dangling".into()
            })
        );
        assert!(matches!(
            ctx.send(LinkId(9), 0, ()),
            Err(LinkError::UnknownLink { .. })
        ));
    }

    #[test]
    fn clock_requests_wait_for_the_handler_to_return() {
        let routes = LinkRoutes::new(PartitionId(0));
        let mut tl = Timeline::new();
        let mut outbound: Vec<LinkQueue> = Vec::new();
        let mut clocks = ClockRequests::default();
        let mut ctx = Context::new(PartitionId(0), &mut tl, &routes, &mut outbound, &mut clocks);

        let period = TimeConverter::new(10).unwrap();
        let a = ctx.register_clock(period, |_: u64, _: &mut Context<'_>| false);
        let b = ctx.register_clock(period, |_: u64, _: &mut Context<'_>| false);
        ctx.unregister_clock(a);
        assert_ne!(a, b);
        assert_eq!(a.factor, 10);

        // Nothing is scheduled until the partition applies the requests.
        assert!(tl.is_empty());
        assert_eq!(clocks.len(), 3);
    }
}
