//! Test utilities for Strand development.
//!
//! Provides a [`Recorder`] that captures every event a link end receives,
//! the [`Stamp`] payload that carries its own expected arrival time, and
//! the clock fixtures in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex, MutexGuard};

use strand_core::{LinkId, PartitionId, SimTime};
use strand_engine::{Context, Event, EventHandler, LinkError};

/// Payload that knows when it should arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Stamp {
    pub id: u64,
    pub origin: PartitionId,
    pub sent_at: SimTime,
    pub expected_at: SimTime,
}

/// One observed delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub partition: PartitionId,
    pub link: LinkId,
    pub time: SimTime,
    pub stamp: Option<Stamp>,
}

/// Shared log of deliveries, cloneable into handlers on any thread.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delivery.
    pub fn record(&self, ctx: &Context<'_>, event: &Event) {
        let record = Record {
            partition: ctx.partition(),
            link: event.link(),
            time: ctx.now(),
            stamp: event.downcast_ref::<Stamp>().copied(),
        };
        self.lock().push(record);
    }

    /// A handler that records and does nothing else.
    pub fn handler(&self) -> impl EventHandler + 'static {
        let recorder = self.clone();
        move |event: Event, ctx: &mut Context<'_>| -> Result<(), LinkError> {
            recorder.record(ctx, &event);
            Ok(())
        }
    }

    /// Snapshot of everything recorded so far, in arrival order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    /// Records from one partition, in that partition's execution order.
    pub fn for_partition(&self, partition: PartitionId) -> Vec<Record> {
        self.lock()
            .iter()
            .filter(|r| r.partition == partition)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        // A poisoned log still holds every record pushed before the panic.
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
