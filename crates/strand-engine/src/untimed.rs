//! Untimed init and complete stages.
//!
//! Before the first timed activity runs, and again after the last one,
//! each partition runs numbered untimed phases. In every phase each
//! [`UntimedHandler`] is called once and may send untimed events on its
//! links; those events carry no delivery time and become readable on the
//! other end in the next phase. The stage ends after the first phase in
//! which no partition sent anything.
//!
//! Untimed events nobody read by the end of a stage are dropped.

use std::collections::VecDeque;

use strand_core::{priority, Activity, EventPayload, LinkId, PartitionId};

use crate::event::{Action, Event};
use crate::link::{Delivery, LinkError, LinkQueue, LinkRoutes};

/// Which untimed stage is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Before the timed run.
    Init,
    /// After the timed run has stopped.
    Complete,
}

/// Participant in the untimed stages.
///
/// Implemented for any `FnMut(&mut UntimedContext) -> Result<(), LinkError>`
/// closure that is `Send`.
pub trait UntimedHandler: Send {
    /// Called once per phase of each stage.
    ///
    /// # Errors
    ///
    /// A send failure aborts the run.
    fn on_phase(&mut self, ctx: &mut UntimedContext<'_>) -> Result<(), LinkError>;
}

impl<F> UntimedHandler for F
where
    F: FnMut(&mut UntimedContext<'_>) -> Result<(), LinkError> + Send,
{
    fn on_phase(&mut self, ctx: &mut UntimedContext<'_>) -> Result<(), LinkError> {
        self(ctx)
    }
}

// ── UntimedInbox ───────────────────────────────────────────────────

/// Untimed events waiting to be read, per link end of one partition.
#[derive(Debug, Default)]
pub struct UntimedInbox {
    queues: Vec<VecDeque<Event>>,
    local: Vec<Event>,
}

impl UntimedInbox {
    /// An inbox for a partition with `links` link ends.
    pub fn new(links: usize) -> Self {
        Self {
            queues: (0..links).map(|_| VecDeque::new()).collect(),
            local: Vec::new(),
        }
    }

    /// Make `event` readable on its target link end.
    pub fn deliver(&mut self, event: Event) {
        let index = event.link().index();
        if index >= self.queues.len() {
            self.queues.resize_with(index + 1, VecDeque::new);
        }
        self.queues[index].push_back(event);
    }

    /// Move this phase's same-partition sends into the readable queues.
    /// Returns how many there were.
    pub fn commit_local(&mut self) -> usize {
        let local = std::mem::take(&mut self.local);
        let count = local.len();
        for event in local {
            self.deliver(event);
        }
        count
    }

    /// Take the oldest unread event on `link`.
    pub fn take(&mut self, link: LinkId) -> Option<Event> {
        self.queues.get_mut(link.index())?.pop_front()
    }

    /// Unread events across every link, including uncommitted local sends.
    pub fn unread(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum::<usize>() + self.local.len()
    }

    /// Drop everything unread. Returns how many events were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.unread();
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.local.clear();
        dropped
    }
}

// ── UntimedContext ─────────────────────────────────────────────────

/// What an [`UntimedHandler`] may do during one phase.
pub struct UntimedContext<'a> {
    partition: PartitionId,
    stage: Stage,
    phase: u32,
    routes: &'a LinkRoutes,
    outbound: &'a mut [LinkQueue],
    inbox: &'a mut UntimedInbox,
}

impl<'a> UntimedContext<'a> {
    pub(crate) fn new(
        partition: PartitionId,
        stage: Stage,
        phase: u32,
        routes: &'a LinkRoutes,
        outbound: &'a mut [LinkQueue],
        inbox: &'a mut UntimedInbox,
    ) -> Self {
        Self {
            partition,
            stage,
            phase,
            routes,
            outbound,
            inbox,
        }
    }

    /// The partition running this handler.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The running stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Phase number within the stage, starting at zero.
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Send `payload` on `link`; the other end can read it next phase.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnknownLink`], [`LinkError::Unwired`], or
    /// [`LinkError::NoRoute`], as for timed sends.
    pub fn send_untimed<T: EventPayload>(
        &mut self,
        link: LinkId,
        payload: T,
    ) -> Result<(), LinkError> {
        let route = self.routes.get(link)?;
        match route.delivery() {
            Delivery::Unwired => Err(LinkError::Unwired {
                name: route.name().to_string(),
            }),
            Delivery::Local(target) => {
                self.inbox.local.push(Event::new(target, Box::new(payload)));
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
                    0,
                    priority::EVENT,
                    Action::Deliver(Event::new(end.link, Box::new(payload))),
                ));
                Ok(())
            }
        }
    }

    /// Read the oldest untimed event that arrived on `link` in an earlier
    /// phase.
    pub fn recv_untimed(&mut self, link: LinkId) -> Option<Event> {
        self.inbox.take(link)
    }
}
