//! Fan-out of events to live local subscribers.
//!
//! [`LocalBroadcaster`] wraps [`tokio::sync::broadcast`] and carries each event
//! as a JSON text frame, ready to be forwarded over a WebSocket or printed.
//! Slow receivers get `RecvError::Lagged(n)`; events sent while nobody is
//! subscribed are dropped.

use tokio::sync::broadcast;

use crate::event::Event;

/// Default ring buffer size shared by all receivers.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fire-and-forget delivery to every currently connected subscriber.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: &Event);
}

#[derive(Clone, Debug)]
pub struct LocalBroadcaster {
    tx: broadcast::Sender<String>,
}

impl LocalBroadcaster {
    /// The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A receiver only gets frames sent after it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for LocalBroadcaster {
    fn broadcast(&self, event: &Event) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to encode {} event: {}", event.kind(), e);
                return;
            }
        };

        match self.tx.send(frame) {
            Ok(receivers) => tracing::debug!("Broadcast {} to {} subscribers", event.kind(), receivers),
            Err(_) => tracing::debug!("No subscribers for {}", event.kind()),
        }
    }
}
