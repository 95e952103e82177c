//! Protocol adapter port — the contract every transport variant implements.
//!
//! An adapter owns one transport resource (a BLE central, an advertiser, a
//! UDP socket, a tunnel) and translates between that transport and the
//! actuation model. The supervisor drives its lifecycle:
//!
//! 1. [`probe`](ProtocolAdapter::probe) — can this platform run the adapter at all?
//! 2. [`start`](ProtocolAdapter::start) — acquire the transport, spawn inbound tasks
//!    and report discoveries through the [`AdapterContext`]
//! 3. [`submit`](ProtocolAdapter::submit) — re-encode and write routed actuations
//! 4. [`stop`](ProtocolAdapter::stop) — release everything acquired by `start`
//!
//! `start` and `stop` may be called again after a failure; adapters must be
//! restartable.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use tokio::sync::{broadcast, mpsc};

use vibelink_domain::command::{Ack, Actuation, Command};
use vibelink_domain::device::DeviceDescriptor;
use vibelink_domain::error::{AdapterError, TransitionError};
use vibelink_domain::event::{AdapterEvent, HubEvent};
use vibelink_domain::id::{DeviceId, SessionId};
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

use crate::event_bus::InProcessEventBus;
use crate::supervisor::SessionTracker;

/// Outcome of probing an adapter before start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// The transport exists and the adapter can be started.
    Available,
    /// The platform lacks a required transport. The adapter is skipped and
    /// the hub keeps running the others.
    Unavailable(String),
    /// The adapter is switched off by configuration (e.g. no auth token).
    Disabled(String),
}

impl Capability {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            Self::Disabled(reason) => write!(f, "disabled: {reason}"),
        }
    }
}

/// A protocol-specific transport bridged into the hub.
///
/// Implementations live in the adapter crates. Every future must be `Send`
/// because the supervisor runs each adapter on its own task.
pub trait ProtocolAdapter: Send {
    /// Which protocol variant this adapter speaks.
    fn protocol(&self) -> Protocol;

    /// Check whether the platform supports this adapter.
    fn probe(&self) -> impl Future<Output = Capability> + Send;

    /// Acquire the transport and begin discovery.
    ///
    /// Returns once the session is usable. Unless
    /// [`connects_in_background`](Self::connects_in_background) is set, the
    /// supervisor marks the session connected when this returns `Ok`.
    fn start(&mut self, ctx: AdapterContext)
    -> impl Future<Output = Result<(), AdapterError>> + Send;

    /// Whether the adapter drives its own connect phase after `start`.
    ///
    /// Such adapters leave the session in [`ConnectionState::Discovering`]
    /// when `start` returns and move it through `Connecting` to `Connected`
    /// via [`AdapterContext::set_state`] once a device link is up.
    fn connects_in_background(&self) -> bool {
        false
    }

    /// Re-encode a routed actuation and write it to the device.
    fn submit(
        &mut self,
        actuation: &Actuation,
    ) -> impl Future<Output = Result<Ack, AdapterError>> + Send;

    /// Release the transport and cancel every background task spawned by
    /// [`start`](Self::start).
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// Handle given to an adapter on start: its session identity, the inbound
/// event path into the hub, and a read side of the hub bus.
#[derive(Clone)]
pub struct AdapterContext {
    tracker: SessionTracker,
    events: mpsc::Sender<AdapterEvent>,
    faults: mpsc::UnboundedSender<AdapterError>,
    bus: InProcessEventBus,
}

impl AdapterContext {
    pub(crate) fn new(
        tracker: SessionTracker,
        events: mpsc::Sender<AdapterEvent>,
        faults: mpsc::UnboundedSender<AdapterError>,
        bus: InProcessEventBus,
    ) -> Self {
        Self {
            tracker,
            events,
            faults,
            bus,
        }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.tracker.id()
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.tracker.protocol()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Devices this session currently claims.
    #[must_use]
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.tracker.devices()
    }

    /// Move the session to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the state machine forbids the move.
    pub async fn set_state(&self, state: ConnectionState) -> Result<(), TransitionError> {
        self.tracker.set(state).await
    }

    /// Report a newly discovered device and claim it for this session.
    pub async fn discovered(&self, descriptor: DeviceDescriptor) {
        self.tracker.claim(descriptor.id.clone());
        self.emit(AdapterEvent::DeviceDiscovered {
            session: self.session(),
            descriptor,
        })
        .await;
    }

    /// Report that a device disconnected or disappeared.
    pub async fn lost(&self, device: DeviceId) {
        self.tracker.release(&device);
        self.emit(AdapterEvent::DeviceLost {
            session: self.session(),
            device,
        })
        .await;
    }

    /// Report that writes to a device keep failing.
    pub async fn unreachable(&self, device: DeviceId) {
        self.emit(AdapterEvent::DeviceUnreachable {
            session: self.session(),
            device,
        })
        .await;
    }

    /// Report a sign of life from a device.
    pub async fn heartbeat(&self, device: DeviceId) {
        self.emit(AdapterEvent::Heartbeat {
            session: self.session(),
            device,
        })
        .await;
    }

    /// Forward a decoded inbound command to the router.
    pub async fn command(&self, command: Command) {
        self.emit(AdapterEvent::CommandReceived {
            session: self.session(),
            command,
        })
        .await;
    }

    /// Report a fault from a background task. The supervisor tears the
    /// session down and restarts it with backoff.
    pub fn fault(&self, err: AdapterError) {
        if self.faults.send(err).is_err() {
            tracing::debug!(session = %self.session(), "fault reported after session ended");
        }
    }

    /// Subscribe to hub events (used for state mirroring).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.bus.subscribe()
    }

    /// A context that is not attached to a supervisor: events and faults
    /// land in the returned receivers. Used to drive adapters directly.
    #[must_use]
    pub fn standalone(
        protocol: Protocol,
        bus: InProcessEventBus,
    ) -> (
        Self,
        mpsc::Receiver<AdapterEvent>,
        mpsc::UnboundedReceiver<AdapterError>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let tracker = SessionTracker::new(protocol, events_tx.clone());
        (
            Self::new(tracker, events_tx, faults_tx, bus),
            events_rx,
            faults_rx,
        )
    }

    async fn emit(&self, event: AdapterEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(session = %self.session(), "hub event loop is gone, dropping adapter event");
        }
    }
}

impl fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("session", &self.session())
            .field("protocol", &self.protocol())
            .finish_non_exhaustive()
    }
}
