//! One partition's pop-execute loop.
//!
//! Each [`Partition`] is moved onto its own thread by
//! [`Simulation::run`](crate::Simulation::run) and owns everything it
//! touches: its timeline, link table, handlers, clocks, and sync manager.
//! The only cross-thread traffic is the sync epoch and the untimed
//! rounds of the init and complete stages.
//!
//! A partition that fails, by error or panic, aborts the shared barriers
//! so its peers return [`RunError::Aborted`] instead of waiting forever.

use strand_core::{priority, LinkId, PartitionId, QueueError, SimTime};
use thiserror::Error;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::clock::{ClockRequests, ClockSet};
use crate::context::{Context, EventHandler};
use crate::event::{Action, Event};
use crate::link::{LinkError, LinkRoutes};
use crate::metrics::PartitionMetrics;
use crate::sync::{SyncError, SyncOutcome, ThreadSync};
use crate::timeline::Timeline;
use crate::untimed::{Stage, UntimedContext, UntimedHandler, UntimedInbox};

// ── RunError ───────────────────────────────────────────────────────

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The activity queue was popped while empty.
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    /// A handler's send failed, or the sync exchange lost a peer.
    #[error("link: {0}")]
    Link(#[from] LinkError),
    /// An event arrived on a link end with no handler.
    #[error("partition {partition}: no handler for link {link}")]
    Unhandled {
        /// Receiving partition.
        partition: PartitionId,
        /// Receiving link end.
        link: LinkId,
    },
    /// Another partition failed and released this one from the barriers.
    #[error("partition {partition}: run aborted by a failed peer")]
    Aborted {
        /// The partition that was released.
        partition: PartitionId,
    },
    /// A partition thread panicked.
    #[error("partition {partition} panicked")]
    PartitionPanicked {
        /// The panicked partition.
        partition: PartitionId,
    },
    /// A partition thread could not be started.
    #[error("failed to spawn thread for partition {partition}: {source}")]
    ThreadSpawn {
        /// The partition that never started.
        partition: PartitionId,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Whether this partition only stopped because a peer failed.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    fn from_sync(partition: PartitionId, e: SyncError) -> Self {
        match e {
            SyncError::Link(e) => Self::Link(e),
            SyncError::Aborted(_) => Self::Aborted { partition },
        }
    }
}

// ── PartitionReport ────────────────────────────────────────────────

/// Why a partition stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The configured stop time was reached.
    StopAt,
    /// A sync epoch found every partition's queue empty.
    Drained,
    /// A single-partition run emptied its queue.
    Exhausted,
}

/// What one partition reports when it finishes.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionReport {
    /// Which partition.
    pub partition: PartitionId,
    /// Why it stopped.
    pub stop: StopReason,
    /// Counters over the whole run.
    pub metrics: PartitionMetrics,
}

// ── Partition ──────────────────────────────────────────────────────

/// Per-thread simulation state.
pub struct Partition {
    id: PartitionId,
    timeline: Timeline,
    routes: LinkRoutes,
    handlers: Vec<Option<Box<dyn EventHandler>>>,
    clocks: ClockSet,
    clock_requests: ClockRequests,
    untimed: Vec<Box<dyn UntimedHandler>>,
    untimed_inbox: UntimedInbox,
    lifecycle: bool,
    sync: ThreadSync,
    synchronized: bool,
    stop_at: Option<SimTime>,
    metrics: PartitionMetrics,
}

// Compile-time assertion: Partition must be Send to move onto its thread.
const _: fn() = || {
    fn assert<T: Send>() {}
    assert::<Partition>();
};

impl Partition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PartitionId,
        timeline: Timeline,
        routes: LinkRoutes,
        handlers: Vec<Option<Box<dyn EventHandler>>>,
        clocks: ClockSet,
        untimed: Vec<Box<dyn UntimedHandler>>,
        lifecycle: bool,
        sync: ThreadSync,
        synchronized: bool,
        stop_at: Option<SimTime>,
    ) -> Self {
        let clock_requests = clocks.requests();
        let untimed_inbox = UntimedInbox::new(routes.len());
        Self {
            id,
            timeline,
            routes,
            handlers,
            clocks,
            clock_requests,
            untimed,
            untimed_inbox,
            lifecycle,
            sync,
            synchronized,
            stop_at,
            metrics: PartitionMetrics::default(),
        }
    }

    /// This partition's id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Activities currently queued.
    pub fn pending(&self) -> usize {
        self.timeline.pending()
    }

    /// Run until stopped, drained, or exhausted.
    ///
    /// When any partition has untimed handlers, every partition runs the
    /// init stage first and the complete stage after the timed loop.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunError`]. A failing partition aborts the
    /// shared barriers on the way out, so its peers stop at their next
    /// sync point with [`RunError::Aborted`].
    pub fn run(mut self) -> Result<PartitionReport, RunError> {
        let span = info_span!("partition", id = %self.id);
        let _span = span.enter();
        let guard = self.sync.abort_guard();

        match self.execute() {
            Ok(stop) => {
                guard.disarm();
                Ok(self.finish(stop))
            }
            Err(e) if e.is_abort() => {
                info!(time = self.timeline.now(), "aborted by a failed peer");
                Err(e)
            }
            Err(e) => {
                error!(time = self.timeline.now(), error = %e, "partition failed");
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> Result<StopReason, RunError> {
        let partition = self.id;
        if self.synchronized {
            self.timeline
                .insert(self.sync.next_sync_time(), priority::THREAD_SYNC, Action::Sync);
        }
        if let Some(at) = self.stop_at {
            self.timeline.insert(at, priority::STOP_ACTION, Action::Stop);
        }
        info!(
            pending = self.timeline.pending(),
            links = self.routes.len(),
            clocks = self.clocks.len(),
            "partition started"
        );

        if self.lifecycle {
            self.run_stage(Stage::Init)?;
            self.finalize_links();
        }

        let stop = loop {
            if self.timeline.is_empty() {
                break StopReason::Exhausted;
            }
            let activity = self.timeline.advance()?;
            trace!(
                time = activity.delivery_time(),
                priority = activity.priority(),
                kind = activity.payload().kind(),
                "dispatch"
            );

            match activity.into_payload() {
                Action::Deliver(event) => self.deliver(event)?,
                Action::Clock(id) => {
                    let mut ctx = Context::new(
                        self.id,
                        &mut self.timeline,
                        &self.routes,
                        self.sync.outbound_mut(),
                        &mut self.clock_requests,
                    );
                    self.clocks.execute(id, &mut ctx);
                    self.clocks
                        .apply(&mut self.clock_requests, &mut self.timeline);
                    self.metrics.clock_fires += 1;
                }
                Action::Sync => {
                    let outcome = self
                        .sync
                        .execute(&mut self.timeline)
                        .map_err(|e| RunError::from_sync(partition, e))?;
                    if outcome == SyncOutcome::Drained {
                        break StopReason::Drained;
                    }
                }
                Action::Stop => break StopReason::StopAt,
            }
        };

        if self.lifecycle {
            self.prepare_for_complete();
            self.run_stage(Stage::Complete)?;
            self.finalize_links();
        }
        Ok(stop)
    }

    /// Run untimed phases until a round in which no partition sent.
    fn run_stage(&mut self, stage: Stage) -> Result<(), RunError> {
        let id = self.id;
        let mut phase = 0;
        loop {
            for handler in &mut self.untimed {
                let mut ctx = UntimedContext::new(
                    id,
                    stage,
                    phase,
                    &self.routes,
                    self.sync.outbound_mut(),
                    &mut self.untimed_inbox,
                );
                handler.on_phase(&mut ctx)?;
            }
            let local = self.untimed_inbox.commit_local();
            let round = self
                .sync
                .exchange_untimed(local > 0)
                .map_err(|e| RunError::from_sync(id, e))?;
            self.metrics.untimed_received += (local + round.received.len()) as u64;
            for event in round.received {
                self.untimed_inbox.deliver(event);
            }
            if !round.more {
                debug!(?stage, phases = phase + 1, "untimed stage done");
                return Ok(());
            }
            phase += 1;
        }
    }

    /// Drop untimed events nobody read during the stage just finished.
    fn finalize_links(&mut self) {
        let dropped = self.untimed_inbox.clear();
        if dropped > 0 {
            warn!(dropped, "unread untimed events dropped");
            self.metrics.untimed_dropped += dropped as u64;
        }
    }

    /// Discard timed sends that never reached a sync epoch before the
    /// stop, so the complete stage only exchanges untimed events.
    fn prepare_for_complete(&mut self) {
        let stale: usize = self
            .sync
            .outbound_mut()
            .iter_mut()
            .map(|q| q.drain_all().len())
            .sum();
        if stale > 0 {
            debug!(stale, "timed sends past the stop discarded");
        }
        self.finalize_links();
    }

    fn deliver(&mut self, event: Event) -> Result<(), RunError> {
        let link = event.link();
        let handler = self
            .handlers
            .get_mut(link.index())
            .and_then(Option::as_mut)
            .ok_or(RunError::Unhandled {
                partition: self.id,
                link,
            })?;
        let mut ctx = Context::new(
            self.id,
            &mut self.timeline,
            &self.routes,
            self.sync.outbound_mut(),
            &mut self.clock_requests,
        );
        handler.handle(event, &mut ctx)?;
        self.clocks
            .apply(&mut self.clock_requests, &mut self.timeline);
        self.metrics.events_delivered += 1;
        Ok(())
    }

    fn finish(mut self, stop: StopReason) -> PartitionReport {
        let m = &mut self.metrics;
        m.sync_epochs = self.sync.epochs();
        m.activities_exchanged = self.sync.exchanged();
        m.bytes_exchanged = self.sync.bytes_exchanged();
        m.sync_wait = self.sync.total_wait_time();
        m.final_time = self.timeline.now();
        m.pending_at_exit = self.timeline.pending();
        m.sync_profile = self.sync.profile_summary();
        m.clock_profile = self.clocks.profile();
        m.untimed_rounds = self.sync.untimed_rounds();

        debug!(
            total_wait = ?m.sync_wait,
            epochs = m.sync_epochs,
            "sync finished"
        );
        if let Some(profile) = m.sync_profile {
            debug!(%profile, "sync profile");
        }
        for profile in &m.clock_profile {
            debug!(%profile, "clock profile");
        }
        info!(
            ?stop,
            time = m.final_time,
            events = m.events_delivered,
            clock_fires = m.clock_fires,
            "partition finished"
        );

        PartitionReport {
            partition: self.id,
            stop,
            metrics: self.metrics,
        }
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("timeline", &self.timeline)
            .field("links", &self.routes.len())
            .field("clocks", &self.clocks.len())
            .field("untimed", &self.untimed.len())
            .field("sync", &self.sync)
            .finish()
    }
}
