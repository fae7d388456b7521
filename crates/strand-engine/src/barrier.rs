//! Reusable thread rendezvous.
//!
//! [`Barrier`] blocks callers until a fixed number of participants have
//! arrived, releases them all, and is immediately ready for the next round.
//! Unlike [`std::sync::Barrier`] it reports how long each caller waited,
//! which feeds the sync statistics.
//!
//! There is no timeout. A participant that never calls [`Barrier::wait`]
//! leaves the others blocked forever. A participant that knows it will
//! not arrive calls [`Barrier::abort`] instead, which releases everyone
//! with [`BarrierAborted`].

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// The barrier was aborted; the round will never complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("barrier aborted by a failed participant")]
pub struct BarrierAborted;

struct State {
    waiting: usize,
    generation: u64,
    aborted: bool,
}

/// An N-party reusable barrier.
pub struct Barrier {
    participants: usize,
    state: Mutex<State>,
    released: Condvar,
}

// Compile-time assertion: Barrier must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Barrier>();
};

impl Barrier {
    /// A barrier for `participants` threads. Zero is treated as one.
    pub fn new(participants: usize) -> Self {
        Self {
            participants: participants.max(1),
            state: Mutex::new(State {
                waiting: 0,
                generation: 0,
                aborted: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Block until every participant has called `wait` for this round.
    ///
    /// Returns the time this caller spent blocked. The last arrival does
    /// not block and gets a near-zero duration.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierAborted`] if the barrier was aborted before or
    /// while this caller waited. Every later call fails the same way.
    pub fn wait(&self) -> Result<Duration, BarrierAborted> {
        let start = Instant::now();
        // The guarded state is plain counters and a flag; a panic elsewhere
        // cannot leave it inconsistent, so poisoning is ignored.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            return Err(BarrierAborted);
        }
        let generation = state.generation;
        state.waiting += 1;

        if state.waiting == self.participants {
            state.waiting = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
        } else {
            while state.generation == generation {
                if state.aborted {
                    return Err(BarrierAborted);
                }
                state = self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        Ok(start.elapsed())
    }

    /// Release every current and future waiter with [`BarrierAborted`].
    /// Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.aborted = true;
        self.released.notify_all();
    }

    /// Whether [`abort`](Self::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aborted
    }

    /// Number of participants per round.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Completed rounds so far.
    pub fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("participants", &self.participants)
            .field("generation", &self.generation())
            .finish()
    }
}

/// The three rendezvous of one sync epoch: arrive, exchanged, publish.
#[derive(Debug)]
pub struct SyncBarriers {
    /// Every partition has reached the sync point.
    pub arrive: Barrier,
    /// Every outbound queue has been handed over.
    pub exchanged: Barrier,
    /// Every partition has published its local minimum.
    pub published: Barrier,
}

impl SyncBarriers {
    /// Three barriers for `participants` partitions.
    pub fn new(participants: usize) -> Self {
        Self {
            arrive: Barrier::new(participants),
            exchanged: Barrier::new(participants),
            published: Barrier::new(participants),
        }
    }

    /// Abort all three barriers.
    pub fn abort(&self) {
        self.arrive.abort();
        self.exchanged.abort();
        self.published.abort();
    }
}
