//! Ordered publish/subscribe bus for protocol events.
//!
//! One bus per connection (sessionless events) and one per session. Delivery
//! is at-most-once per subscriber per event, in the exact order the
//! transport delivered the underlying frames; the dispatch layer introduces
//! no reordering because all publishes happen on the receive loop.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::Event;

// ============================================================================
// EventBus
// ============================================================================

/// Fan-out of events to any number of subscribers.
///
/// Subscribers that drop their receiver are pruned on the next publish.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its event stream.
    #[must_use]
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event to every live subscriber.
    pub(crate) fn publish(&self, event: &Event) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
