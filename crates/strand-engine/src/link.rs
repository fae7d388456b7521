//! Links, cross-partition link queues, and two-phase link wiring.
//!
//! A link is a named channel between two link ends. Each end lives in one
//! partition's [`LinkRoutes`] table and records where its sends go
//! ([`Delivery`]). The delivery metadata is unknown when the first end is
//! created, so [`LinkRegistry`] resolves it lazily: whichever end
//! registers a name first is stashed, and the second registration under
//! the same name wires both directions and removes the entry. The result
//! does not depend on which side arrives first.
//!
//! Sends to another partition are not delivered immediately; they are
//! appended to the sender's [`LinkQueue`] for that destination and handed
//! over during the next thread sync epoch.

use indexmap::IndexMap;
use strand_core::{LinkId, PartitionId, SimTime};
use thiserror::Error;
use tracing::{trace, warn};

use crate::event::{Action, SimActivity};

// ── LinkError ──────────────────────────────────────────────────────

/// Errors from link wiring and sending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A link name was registered but never matched by a second end.
    #[error("link '{name}' has no remote counterpart")]
    Unmatched {
        /// The unmatched link name.
        name: String,
    },
    /// A link id does not exist in the partition's link table.
    #[error("unknown link {link} in partition {partition}")]
    UnknownLink {
        /// Partition searched.
        partition: PartitionId,
        /// The missing link id.
        link: LinkId,
    },
    /// A send was attempted on a link whose other end never registered.
    #[error("link '{name}' is not wired")]
    Unwired {
        /// The link name.
        name: String,
    },
    /// A remote delivery named a partition with no outbound queue.
    #[error("no route to partition {partition}")]
    NoRoute {
        /// The unreachable partition.
        partition: PartitionId,
    },
}

// ── LinkEnd / Delivery / LinkRoutes ────────────────────────────────

/// One end of a link: the owning partition and the link's id there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkEnd {
    /// Owning partition.
    pub partition: PartitionId,
    /// Link id within that partition.
    pub link: LinkId,
}

impl LinkEnd {
    /// Construct a link end.
    pub fn new(partition: PartitionId, link: LinkId) -> Self {
        Self { partition, link }
    }
}

/// Where sends on a link end are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The other end has not registered yet.
    Unwired,
    /// The other end lives in the same partition.
    Local(LinkId),
    /// The other end lives in another partition.
    Remote(LinkEnd),
}

impl Delivery {
    /// Delivery metadata for sends from `from` to `to`.
    pub fn between(from: LinkEnd, to: LinkEnd) -> Self {
        if from.partition == to.partition {
            Self::Local(to.link)
        } else {
            Self::Remote(to)
        }
    }
}

/// Routing entry for one link end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRoute {
    name: String,
    latency: SimTime,
    delivery: Delivery,
}

impl LinkRoute {
    /// Link name shared by both ends.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum delay added to every send on this end.
    pub fn latency(&self) -> SimTime {
        self.latency
    }

    /// Where sends go.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }
}

/// A partition's link table, indexed by [`LinkId`].
#[derive(Clone, Debug)]
pub struct LinkRoutes {
    partition: PartitionId,
    routes: Vec<LinkRoute>,
}

impl LinkRoutes {
    /// An empty table for `partition`.
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            routes: Vec::new(),
        }
    }

    /// Add an unwired link end, returning its id.
    pub fn push(&mut self, name: impl Into<String>, latency: SimTime) -> LinkId {
        let id = LinkId(self.routes.len() as u32);
        self.routes.push(LinkRoute {
            name: name.into(),
            latency,
            delivery: Delivery::Unwired,
        });
        id
    }

    /// Look up a link end.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownLink`] if `link` is not in this table.
    pub fn get(&self, link: LinkId) -> Result<&LinkRoute, LinkError> {
        self.routes.get(link.index()).ok_or(LinkError::UnknownLink {
            partition: self.partition,
            link,
        })
    }

    fn set_delivery(&mut self, link: LinkId, delivery: Delivery) -> Result<(), LinkError> {
        let partition = self.partition;
        let route = self
            .routes
            .get_mut(link.index())
            .ok_or(LinkError::UnknownLink { partition, link })?;
        route.delivery = delivery;
        Ok(())
    }

    /// Owning partition.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Number of link ends.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate `(id, route)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &LinkRoute)> {
        self.routes
            .iter()
            .enumerate()
            .map(|(i, r)| (LinkId(i as u32), r))
    }
}

// ── LinkQueue ──────────────────────────────────────────────────────

/// Buffer of activities bound for one destination partition.
///
/// Appends are unordered; the exchange re-inserts everything into the
/// destination's activity queue, which restores time order. Only the
/// owning (sending) partition's thread touches a `LinkQueue`.
#[derive(Debug, Default)]
pub struct LinkQueue {
    activities: Vec<SimActivity>,
}

impl LinkQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an activity. O(1) amortized.
    pub fn append(&mut self, activity: SimActivity) {
        self.activities.push(activity);
    }

    /// Take every queued activity in append order, leaving the queue empty.
    pub fn drain_all(&mut self) -> Vec<SimActivity> {
        std::mem::take(&mut self.activities)
    }

    /// Number of queued activities.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Sum of payload size hints of queued events, in bytes.
    pub fn data_size(&self) -> u64 {
        self.activities
            .iter()
            .map(|a| match a.payload() {
                Action::Deliver(ev) => ev.data_size() as u64,
                _ => 0,
            })
            .sum()
    }
}

// ── LinkRegistry ───────────────────────────────────────────────────

/// Outcome of [`LinkRegistry::register_link`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// First end under this name; waiting for its counterpart.
    Pending,
    /// Second end; both directions are now wired to each other.
    Wired {
        /// The end that registered first.
        peer: LinkEnd,
    },
}

/// Name-keyed table that pairs link ends regardless of arrival order.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    pending: IndexMap<String, LinkEnd>,
    wired: usize,
}

impl LinkRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `end` under `name`.
    ///
    /// If nothing is stashed under `name`, stashes `end`. If a different
    /// end is stashed, wires both ends' delivery metadata in `routes`
    /// (indexed by partition) and removes the entry. Registering the very
    /// same end twice leaves it pending.
    ///
    /// Both ends are checked before either is modified, so a failed
    /// registration leaves `routes` and the registry untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownLink`] if either end is not present in
    /// `routes`.
    pub fn register_link(
        &mut self,
        name: &str,
        end: LinkEnd,
        routes: &mut [LinkRoutes],
    ) -> Result<Registration, LinkError> {
        check_end(routes, end)?;
        let peer = match self.pending.get(name) {
            None => {
                self.pending.insert(name.to_string(), end);
                trace!(link = name, partition = %end.partition, "link end stashed");
                return Ok(Registration::Pending);
            }
            Some(stashed) if *stashed == end => {
                warn!(link = name, partition = %end.partition, "link end registered twice");
                return Ok(Registration::Pending);
            }
            Some(stashed) => *stashed,
        };
        check_end(routes, peer)?;

        route_table(routes, end)?.set_delivery(end.link, Delivery::between(end, peer))?;
        route_table(routes, peer)?.set_delivery(peer.link, Delivery::between(peer, end))?;
        self.pending.shift_remove(name);
        self.wired += 1;
        trace!(
            link = name,
            from = %peer.partition,
            to = %end.partition,
            "link wired"
        );
        Ok(Registration::Wired { peer })
    }

    /// Names still waiting for a counterpart, in registration order.
    pub fn pending_names(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    /// Number of fully wired links.
    pub fn wired_count(&self) -> usize {
        self.wired
    }

    /// Check that every registered name found its counterpart.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unmatched`] naming the earliest unmatched link.
    pub fn finalize(&self) -> Result<(), LinkError> {
        match self.pending.keys().next() {
            Some(name) => Err(LinkError::Unmatched { name: name.clone() }),
            None => Ok(()),
        }
    }
}

fn check_end(routes: &[LinkRoutes], end: LinkEnd) -> Result<(), LinkError> {
    routes
        .get(end.partition.index())
        .ok_or(LinkError::UnknownLink {
            partition: end.partition,
            link: end.link,
        })?
        .get(end.link)
        .map(|_| ())
}

fn route_table(routes: &mut [LinkRoutes], end: LinkEnd) -> Result<&mut LinkRoutes, LinkError> {
    routes
        .get_mut(end.partition.index())
        .ok_or(LinkError::UnknownLink {
            partition: end.partition,
            link: end.link,
        })
}
