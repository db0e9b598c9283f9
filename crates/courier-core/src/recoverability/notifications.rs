//! Broadcast of recoverability events.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so processing never depends on anyone listening.

use courier_types::event::RecoverabilityEvent;
use tokio::sync::broadcast;

/// Multi-consumer channel for retry and error-queue notifications.
///
/// Cloning clones the sender; every clone publishes to the same subscribers.
pub struct BusNotifications {
    sender: broadcast::Sender<RecoverabilityEvent>,
}

impl BusNotifications {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RecoverabilityEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RecoverabilityEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for BusNotifications {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Clone for BusNotifications {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for BusNotifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusNotifications")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
