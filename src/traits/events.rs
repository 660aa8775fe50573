//! Heading notifications from drivers to whoever listens (usually the hub).
//!
//! Drivers publish into an [`EventSink`] and never wait on it. The sink is a
//! bounded broadcast channel: a consumer that falls behind loses the oldest
//! updates and is told how many it missed. Updates from one driver arrive in
//! the order they were published.

use tokio::sync::broadcast;

use crate::messages::Heading;

/// Default number of updates buffered per consumer.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// A driver's heading after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingUpdate {
    /// Publishing rotator.
    pub rotator_name: String,
    /// Full snapshot at publish time.
    pub heading: Heading,
}

/// Handle passed to every driver constructor.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<HeadingUpdate>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }
}

impl EventSink {
    /// Create a sink buffering `capacity` updates per consumer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an update. Never blocks; without listeners the update is dropped.
    pub fn publish(&self, rotator_name: &str, heading: Heading) {
        let _ = self.tx.send(HeadingUpdate {
            rotator_name: rotator_name.to_string(),
            heading,
        });
    }

    /// Start receiving updates published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HeadingUpdate> {
        self.tx.subscribe()
    }
}
