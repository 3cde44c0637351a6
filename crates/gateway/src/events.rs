//! Broadcast bus bridging the broker to WebSocket subscribers.

use tokio::sync::broadcast;

use ah_broker::{BrokerEvent, BrokerEvents};
use ah_domain::Result;

/// Fan-out channel for broker events.
///
/// Built on `tokio::sync::broadcast`: each `/ws/events` connection holds
/// a receiver. Publishing with no subscribers is not an error — events
/// are best-effort by contract.
pub struct EventBus {
    tx: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BrokerEvents for EventBus {
    fn publish(&self, event: BrokerEvent) -> Result<()> {
        // send only errors when nobody is listening; that's fine.
        let _ = self.tx.send(event);
        Ok(())
    }
}
