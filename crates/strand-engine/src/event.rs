//! Link events and the engine's activity payload.

use std::fmt;

use strand_core::{Activity, ClockId, EventPayload, LinkId};

/// An event travelling over a link.
///
/// `target` is the receiving link end in the destination partition.
/// The payload is opaque to the engine apart from its size hint.
pub struct Event {
    target: LinkId,
    payload: Box<dyn EventPayload>,
}

impl Event {
    /// Wrap a payload addressed to `target`.
    pub fn new(target: LinkId, payload: Box<dyn EventPayload>) -> Self {
        Self { target, payload }
    }

    /// The receiving link end.
    pub fn link(&self) -> LinkId {
        self.target
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &dyn EventPayload {
        self.payload.as_ref()
    }

    /// Borrow the payload as a concrete type.
    pub fn downcast_ref<T: EventPayload>(&self) -> Option<&T> {
        self.payload.as_ref().as_any().downcast_ref::<T>()
    }

    /// Take the payload as a concrete type, or return the event unchanged.
    pub fn downcast<T: EventPayload>(self) -> Result<Box<T>, Self> {
        if self.payload.as_ref().as_any().is::<T>() {
            // The `is` check above makes this infallible.
            match self.payload.into_any().downcast::<T>() {
                Ok(v) => Ok(v),
                Err(_) => unreachable!("payload type checked above"),
            }
        } else {
            Err(self)
        }
    }

    /// Payload size hint in bytes.
    pub fn data_size(&self) -> usize {
        self.payload.as_ref().data_size()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("link", &self.target)
            .field("payload", &self.payload)
            .finish()
    }
}

/// What a partition does when an activity comes due.
#[derive(Debug)]
pub enum Action {
    /// Deliver an event to a link end's handler.
    Deliver(Event),
    /// Fire a clock.
    Clock(ClockId),
    /// Run a thread synchronization epoch.
    Sync,
    /// Stop the partition.
    Stop,
}

impl Action {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deliver(_) => "deliver",
            Self::Clock(_) => "clock",
            Self::Sync => "sync",
            Self::Stop => "stop",
        }
    }
}

/// An activity carrying an engine [`Action`].
pub type SimActivity = Activity<Action>;
