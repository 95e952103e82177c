//! Event bus port — publish/subscribe for hub events.

use vibelink_domain::event::HubEvent;

/// Publishes hub events to interested subscribers.
///
/// Publishing never blocks and never fails: a bus with no subscribers
/// simply drops the event.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: HubEvent);
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: HubEvent) {
        (**self).publish(event);
    }
}
