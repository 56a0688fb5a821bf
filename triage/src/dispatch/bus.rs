//! In-process event bus
//!
//! Tokio broadcast channel implementing [`Dispatcher`]. Publishing with no
//! subscribers succeeds: the message is simply dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{DispatchEvent, DispatchPayload};
use super::{DispatchError, Dispatcher};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast dispatcher for in-process consumers.
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Wrap in an [`Arc`] for sharing.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for EventBus {
    async fn publish(
        &self,
        event_type: &str,
        payload: &DispatchPayload,
    ) -> Result<(), DispatchError> {
        let event = DispatchEvent::new(event_type, payload.clone());
        let event_id = event.event_id.clone();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, event_id = %event_id, receivers = count, "Event published");
            }
            Err(_) => {
                debug!(event_type, event_id = %event_id, "Event published (no receivers)");
            }
        }
        Ok(())
    }
}
