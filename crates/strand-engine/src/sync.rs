//! Skip-ahead thread synchronization.
//!
//! Partitions run independently between sync points. A sync point is an
//! ordinary activity ([`Action::Sync`]) at priority
//! [`THREAD_SYNC`](strand_core::priority::THREAD_SYNC), scheduled at the
//! same simulated time on every partition. When it fires, each partition's
//! [`ThreadSync`] runs one epoch:
//!
//! 1. **arrive**: rendezvous on the first barrier.
//! 2. **before**: drain every outbound [`LinkQueue`] and hand each
//!    destination one batch, keeping every delivery time.
//! 3. **exchanged**: rendezvous; every inbox is now complete. Each
//!    partition moves its inbox into its own queue, batches in sender
//!    order, and publishes the earliest time it has pending.
//! 4. **published**: rendezvous; every minimum is visible.
//! 5. **after**: every partition reads the same minimums and computes the
//!    same next sync time, `global_min + max_period`.
//!
//! Skipping straight to `global_min + max_period` is safe because every
//! cross-partition link has latency at least `max_period`: nothing sent at
//! or after `global_min` can arrive before the next sync point.
//!
//! If every queue is empty after the exchange the run is drained and all
//! partitions stop together.
//!
//! The same three barriers also carry the untimed rounds of the init and
//! complete stages ([`ThreadSync::exchange_untimed`]).
//!
//! A partition that fails aborts the shared barriers ([`AbortGuard`]), so
//! its peers leave their next epoch with [`SyncError::Aborted`] instead of
//! waiting for it forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use strand_core::{priority, PartitionId, SimTime, MAX_SIM_TIME};
use thiserror::Error;
use tracing::{debug, warn};

use crate::barrier::{BarrierAborted, SyncBarriers};
use crate::event::{Action, Event, SimActivity};
use crate::link::{LinkError, LinkQueue};
use crate::profile::{SyncProfileSummary, SyncProfiler};
use crate::timeline::Timeline;

// ── SyncShared ─────────────────────────────────────────────────────

/// One partition's published local minimum, padded to its own cache line.
#[repr(align(128))]
struct MinimumSlot(AtomicU64);

/// State shared by every partition's [`ThreadSync`] for the whole run.
pub struct SyncShared {
    barriers: SyncBarriers,
    local_minimums: Box<[MinimumSlot]>,
}

// Compile-time assertion: SyncShared must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SyncShared>();
};

impl SyncShared {
    /// Barriers and minimum slots for `partitions` participants.
    pub fn new(partitions: usize) -> Self {
        Self {
            barriers: SyncBarriers::new(partitions),
            local_minimums: (0..partitions)
                .map(|_| MinimumSlot(AtomicU64::new(MAX_SIM_TIME)))
                .collect(),
        }
    }

    /// Number of participating partitions.
    pub fn partitions(&self) -> usize {
        self.local_minimums.len()
    }

    fn publish(&self, partition: PartitionId, time: SimTime) {
        if let Some(slot) = self.local_minimums.get(partition.index()) {
            slot.0.store(time, Ordering::Release);
        }
    }

    /// Release every partition blocked in, or about to enter, an epoch.
    pub fn abort(&self) {
        self.barriers.abort();
    }

    /// Whether a partition has aborted the run.
    pub fn is_aborted(&self) -> bool {
        self.barriers.arrive.is_aborted()
    }

    fn global_minimum(&self) -> SimTime {
        self.local_minimums
            .iter()
            .map(|slot| slot.0.load(Ordering::Acquire))
            .min()
            .unwrap_or(MAX_SIM_TIME)
    }
}

impl std::fmt::Debug for SyncShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncShared")
            .field("partitions", &self.partitions())
            .field("barriers", &self.barriers)
            .finish()
    }
}

// ── AbortGuard ─────────────────────────────────────────────────────

/// Aborts the shared barriers when dropped, unless disarmed.
///
/// A partition holds one for the whole run. Returning early with an error
/// or unwinding from a panic drops it armed.
#[derive(Debug)]
pub struct AbortGuard {
    shared: Option<Arc<SyncShared>>,
}

impl AbortGuard {
    /// The partition finished normally; leave the barriers alone.
    pub fn disarm(mut self) {
        self.shared = None;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.abort();
        }
    }
}

// ── SyncError ──────────────────────────────────────────────────────

/// Errors from a sync epoch or untimed round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A destination partition's inbox is gone.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// Another partition failed and aborted the barriers.
    #[error(transparent)]
    Aborted(#[from] BarrierAborted),
}

// ── ThreadSync ─────────────────────────────────────────────────────

/// Activities one partition hands another in a single epoch.
#[derive(Debug)]
pub struct ExchangeBatch {
    from: PartitionId,
    activities: Vec<SimActivity>,
}

/// Result of one sync epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The run continues; the next sync point is scheduled.
    Continue {
        /// When the next epoch fires.
        next_sync: SimTime,
    },
    /// Every partition's queue is empty. The run is over.
    Drained,
}

/// Result of one untimed round.
#[derive(Debug)]
pub struct UntimedRound {
    /// Untimed events addressed to this partition, in sender order.
    pub received: Vec<Event>,
    /// Whether any partition sent anything this round, so another round
    /// is needed.
    pub more: bool,
}

/// A partition's side of the skip-ahead protocol.
///
/// Owns the partition's outbound link queues (one per destination), the
/// senders into every partition's inbox, and its own inbox.
pub struct ThreadSync {
    partition: PartitionId,
    shared: Arc<SyncShared>,
    outbound: Vec<LinkQueue>,
    peers: Vec<Sender<ExchangeBatch>>,
    inbox: Receiver<ExchangeBatch>,
    max_period: SimTime,
    next_sync_time: SimTime,
    total_wait: Duration,
    epochs: u64,
    exchanged: u64,
    bytes_exchanged: u64,
    untimed_rounds: u64,
    profiler: Option<Box<dyn SyncProfiler>>,
}

impl ThreadSync {
    /// Build a partition's sync manager.
    ///
    /// `peers[i]` feeds partition `i`'s inbox; `inbox` is this
    /// partition's own receiver. The first sync point is at `max_period`.
    pub fn new(
        partition: PartitionId,
        shared: Arc<SyncShared>,
        peers: Vec<Sender<ExchangeBatch>>,
        inbox: Receiver<ExchangeBatch>,
        max_period: SimTime,
        profiler: Option<Box<dyn SyncProfiler>>,
    ) -> Self {
        let outbound = (0..peers.len()).map(|_| LinkQueue::new()).collect();
        Self {
            partition,
            shared,
            outbound,
            peers,
            inbox,
            max_period,
            next_sync_time: max_period,
            total_wait: Duration::ZERO,
            epochs: 0,
            exchanged: 0,
            bytes_exchanged: 0,
            untimed_rounds: 0,
            profiler,
        }
    }

    /// Run one full epoch at the current time of `timeline`.
    ///
    /// On [`SyncOutcome::Continue`] the next sync activity has already
    /// been inserted into `timeline`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Link`] if a destination partition's inbox is
    /// gone, or [`SyncError::Aborted`] if another partition failed.
    pub fn execute(&mut self, timeline: &mut Timeline) -> Result<SyncOutcome, SyncError> {
        if let Some(p) = self.profiler.as_mut() {
            p.sync_start();
        }

        self.total_wait += self.shared.barriers.arrive.wait()?;
        let sent = match self.before(timeline.now()) {
            Ok(sent) => sent,
            Err(e) => {
                self.shared.abort();
                return Err(e.into());
            }
        };
        self.total_wait += self.shared.barriers.exchanged.wait()?;
        self.ingest(timeline);
        self.total_wait += self.shared.barriers.published.wait()?;
        let outcome = self.after(timeline);

        self.epochs += 1;
        if let Some(p) = self.profiler.as_mut() {
            p.sync_end();
        }
        debug!(
            partition = %self.partition,
            epoch = self.epochs,
            now = timeline.now(),
            sent,
            ?outcome,
            "sync epoch"
        );
        Ok(outcome)
    }

    /// Drain every outbound queue into its destination's inbox.
    /// Returns the number of activities handed over.
    fn before(&mut self, now: SimTime) -> Result<usize, LinkError> {
        let (sent, bytes) = self.hand_over(now)?;
        self.exchanged += sent as u64;
        self.bytes_exchanged += bytes;
        Ok(sent)
    }

    /// Send one batch per non-empty outbound queue, re-stamping each
    /// activity relative to `now`. Returns `(activities, bytes)`.
    fn hand_over(&mut self, now: SimTime) -> Result<(usize, u64), LinkError> {
        let mut sent = 0;
        let mut bytes = 0;
        for (dest, queue) in self.outbound.iter_mut().enumerate() {
            if queue.is_empty() {
                continue;
            }
            bytes += queue.data_size();
            let peer = self.peers.get(dest).ok_or(LinkError::NoRoute {
                partition: PartitionId(dest as u32),
            })?;
            let activities: Vec<SimActivity> = queue
                .drain_all()
                .into_iter()
                .map(|activity| {
                    let delay = activity.delivery_time().saturating_sub(now);
                    activity.with_delivery_time(now.saturating_add(delay))
                })
                .collect();
            sent += activities.len();
            let batch = ExchangeBatch {
                from: self.partition,
                activities,
            };
            peer.send(batch).map_err(|_| LinkError::NoRoute {
                partition: PartitionId(dest as u32),
            })?;
        }
        Ok((sent, bytes))
    }

    /// Everything in the inbox, batches in sender order so that
    /// equal-time arrivals from different partitions tie-break the same
    /// way on every run.
    fn take_inbox(&mut self) -> impl Iterator<Item = SimActivity> {
        let mut batches: Vec<ExchangeBatch> = self.inbox.try_iter().collect();
        batches.sort_by_key(|b| b.from);
        batches.into_iter().flat_map(|b| b.activities)
    }

    /// Move the inbox into `timeline` and publish the local minimum.
    fn ingest(&mut self, timeline: &mut Timeline) {
        for activity in self.take_inbox() {
            timeline.insert_activity(activity);
        }
        self.shared
            .publish(self.partition, timeline.next_activity_time());
    }

    /// One untimed round of the init or complete stage.
    ///
    /// Hands every outbound queue to its destination like an epoch does,
    /// but returns the arrivals instead of queueing them. `sent_locally`
    /// reports same-partition untimed sends, which never pass through the
    /// outbound queues but still call for another round.
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute).
    pub fn exchange_untimed(&mut self, sent_locally: bool) -> Result<UntimedRound, SyncError> {
        self.total_wait += self.shared.barriers.arrive.wait()?;
        let sent = match self.hand_over(0) {
            Ok((sent, _)) => sent,
            Err(e) => {
                self.shared.abort();
                return Err(e.into());
            }
        };
        self.total_wait += self.shared.barriers.exchanged.wait()?;

        let mut received = Vec::new();
        for activity in self.take_inbox() {
            match activity.into_payload() {
                Action::Deliver(event) => received.push(event),
                other => warn!(kind = other.kind(), "non-event in untimed exchange dropped"),
            }
        }
        let busy = if sent > 0 || sent_locally { 0 } else { MAX_SIM_TIME };
        self.shared.publish(self.partition, busy);
        self.total_wait += self.shared.barriers.published.wait()?;

        self.untimed_rounds += 1;
        Ok(UntimedRound {
            received,
            more: self.shared.global_minimum() != MAX_SIM_TIME,
        })
    }

    /// Compute the next sync time from the published minimums.
    fn after(&mut self, timeline: &mut Timeline) -> SyncOutcome {
        let global_min = self.shared.global_minimum();
        if global_min == MAX_SIM_TIME {
            return SyncOutcome::Drained;
        }
        self.next_sync_time = global_min.max(global_min.saturating_add(self.max_period));
        timeline.insert(self.next_sync_time, priority::THREAD_SYNC, Action::Sync);
        SyncOutcome::Continue {
            next_sync: self.next_sync_time,
        }
    }

    /// Outbound queues, indexed by destination partition.
    pub fn outbound_mut(&mut self) -> &mut [LinkQueue] {
        &mut self.outbound
    }

    /// Payload bytes currently buffered for other partitions.
    pub fn data_size(&self) -> u64 {
        self.outbound.iter().map(LinkQueue::data_size).sum()
    }

    /// When the next epoch fires.
    pub fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    /// The skip-ahead window.
    pub fn max_period(&self) -> SimTime {
        self.max_period
    }

    /// Wall time spent blocked on the barriers so far.
    pub fn total_wait_time(&self) -> Duration {
        self.total_wait
    }

    /// Epochs completed.
    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    /// Activities handed to other partitions so far.
    pub fn exchanged(&self) -> u64 {
        self.exchanged
    }

    /// Payload bytes handed to other partitions so far.
    pub fn bytes_exchanged(&self) -> u64 {
        self.bytes_exchanged
    }

    /// Untimed rounds completed.
    pub fn untimed_rounds(&self) -> u64 {
        self.untimed_rounds
    }

    /// The barriers and slots shared with every other partition.
    pub fn shared(&self) -> &Arc<SyncShared> {
        &self.shared
    }

    /// A guard that aborts every partition's barriers unless disarmed.
    pub fn abort_guard(&self) -> AbortGuard {
        AbortGuard {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    /// Profiler totals, if profiling is enabled.
    pub fn profile_summary(&self) -> Option<SyncProfileSummary> {
        self.profiler.as_ref().map(|p| p.summary())
    }
}

impl std::fmt::Debug for ThreadSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSync")
            .field("partition", &self.partition)
            .field("max_period", &self.max_period)
            .field("next_sync_time", &self.next_sync_time)
            .field("epochs", &self.epochs)
            .field("exchanged", &self.exchanged)
            .finish()
    }
}

/// Build one [`ThreadSync`] per partition sharing a fresh [`SyncShared`].
pub fn thread_syncs(
    partitions: usize,
    max_period: SimTime,
    mut profiler: impl FnMut() -> Option<Box<dyn SyncProfiler>>,
) -> Vec<ThreadSync> {
    let shared = Arc::new(SyncShared::new(partitions));
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions)
        .map(|_| crossbeam_channel::unbounded())
        .unzip();

    receivers
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| {
            ThreadSync::new(
                PartitionId(i as u32),
                Arc::clone(&shared),
                senders.clone(),
                inbox,
                max_period,
                profiler(),
            )
        })
        .collect()
}
