//! Shared view of one adapter session.
//!
//! The runner task and the adapter's own background tasks both move the
//! session through its state machine; the router only reads it. A
//! [`watch`] channel gives every reader a consistent copy.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use vibelink_domain::error::TransitionError;
use vibelink_domain::event::AdapterEvent;
use vibelink_domain::id::{DeviceId, SessionId};
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::{ConnectionState, Session};

#[derive(Debug, Clone)]
pub struct SessionTracker {
    session: Arc<watch::Sender<Session>>,
    events: mpsc::Sender<AdapterEvent>,
}

impl SessionTracker {
    #[must_use]
    pub fn new(protocol: Protocol, events: mpsc::Sender<AdapterEvent>) -> Self {
        let (session, _) = watch::channel(Session::new(protocol));
        Self {
            session: Arc::new(session),
            events,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.borrow().id
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.session.borrow().protocol
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.session.borrow().consecutive_failures
    }

    #[must_use]
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.session.borrow().devices.clone()
    }

    /// A read-only view for the router.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Apply a transition and report it to the hub. Same-state moves are
    /// silent no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the state machine forbids the move.
    pub async fn set(&self, next: ConnectionState) -> Result<(), TransitionError> {
        let mut outcome = Ok(None);
        self.session.send_if_modified(|session| match session.transition(next) {
            Ok(previous) if previous != next => {
                outcome = Ok(Some(previous));
                true
            }
            Ok(_) => false,
            Err(err) => {
                outcome = Err(err);
                false
            }
        });

        let Some(from) = outcome? else {
            return Ok(());
        };
        let (session, protocol) = (self.id(), self.protocol());
        tracing::debug!(%session, %protocol, %from, to = %next, "session state changed");
        let event = AdapterEvent::StateChanged {
            session,
            protocol,
            from,
            to: next,
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!(%session, "hub event loop is gone, state change not reported");
        }
        Ok(())
    }

    pub(crate) fn claim(&self, device: DeviceId) {
        self.session.send_if_modified(|session| session.claim(device));
    }

    pub(crate) fn release(&self, device: &DeviceId) {
        self.session.send_if_modified(|session| session.release(device));
    }

    pub(crate) fn release_all(&self) {
        self.session.send_if_modified(|session| {
            let had_devices = !session.devices.is_empty();
            session.devices.clear();
            had_devices
        });
    }
}
