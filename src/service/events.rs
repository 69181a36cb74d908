//! Typed event bus: one sender, many receivers. A slow or failing
//! subscriber never blocks or breaks the others since each gets its own
//! queue.

use tokio::sync::broadcast;
use tracing::warn;

use crate::types::ServiceEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct EventBus {
    sender: broadcast::Sender<ServiceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    /// Publish is error-isolated by construction: a lagging/dropped
    /// receiver only affects that receiver, never the publisher or its
    /// siblings.
    pub fn publish(&self, event: ServiceEvent) {
        if self.sender.send(event).is_err() {
            warn!("published event with no active subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
