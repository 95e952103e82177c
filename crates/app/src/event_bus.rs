//! In-process event bus backed by a tokio broadcast channel.

use tokio::sync::broadcast;

use vibelink_domain::event::HubEvent;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Cloning yields another handle onto the same channel. Publishing succeeds
/// even when there are no active subscribers (the event is simply dropped).
#[derive(Debug, Clone)]
pub struct InProcessEventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: HubEvent) {
        // broadcast::send fails only when there are zero receivers.
        let _ = self.sender.send(event);
    }
}
