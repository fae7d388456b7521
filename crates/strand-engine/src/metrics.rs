//! Per-partition run metrics.
//!
//! [`PartitionMetrics`] is filled in by the partition loop as it runs and
//! returned in the [`PartitionReport`](crate::partition::PartitionReport)
//! when the partition finishes.

use std::time::Duration;

use strand_core::SimTime;

use crate::profile::{ClockHandlerProfile, SyncProfileSummary};

/// Counters collected by one partition over a whole run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionMetrics {
    /// Link events delivered to handlers.
    pub events_delivered: u64,
    /// Clock firings dispatched.
    pub clock_fires: u64,
    /// Sync epochs completed.
    pub sync_epochs: u64,
    /// Activities this partition handed to other partitions.
    pub activities_exchanged: u64,
    /// Payload bytes this partition handed to other partitions.
    pub bytes_exchanged: u64,
    /// Wall time spent blocked on sync barriers.
    pub sync_wait: Duration,
    /// Simulated time when the partition stopped.
    pub final_time: SimTime,
    /// Activities still queued when the partition stopped.
    pub pending_at_exit: usize,
    /// Sync profiler totals, if profiling was enabled.
    pub sync_profile: Option<SyncProfileSummary>,
    /// Per-handler clock totals. Empty unless clock profiling was enabled.
    pub clock_profile: Vec<ClockHandlerProfile>,
    /// Untimed init and complete rounds run.
    pub untimed_rounds: u64,
    /// Untimed events delivered to untimed handlers' inboxes.
    pub untimed_received: u64,
    /// Untimed events nobody read before their stage ended.
    pub untimed_dropped: u64,
}

impl PartitionMetrics {
    /// Total activities dispatched, excluding sync epochs.
    pub fn work_done(&self) -> u64 {
        self.events_delivered + self.clock_fires
    }
}
