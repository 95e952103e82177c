//! Command router — validation, coalescing and dispatch.
//!
//! The router is an actor. A command is validated against the registry
//! snapshot and the owning session when it arrives; rejected commands never
//! reach an adapter. Accepted commands are parked in a slot keyed by
//! `(device, channel)`:
//!
//! - the first command opens the slot and arms a timer for the end of the
//!   coalescing window,
//! - later commands for the same slot replace the parked one, which resolves
//!   as [`AckStatus::Superseded`](vibelink_domain::command::AckStatus),
//! - when the timer fires the parked command is handed to the owning
//!   adapter's queue, no earlier than `min_interval` after the previous
//!   dispatch to the same device.
//!
//! Dispatch itself never blocks the actor: waiting for the adapter's ack
//! happens on a spawned task that also watches the device's liveness flag.
//!
//! A command with a `duration` is followed by a zero-intensity command for
//! its slot once the duration has elapsed after dispatch, unless a newer
//! command for the same slot arrived in the meantime.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use vibelink_domain::actuation::Intensity;
use vibelink_domain::channel::Channel;
use vibelink_domain::command::{Ack, Actuation, Command, CommandSource};
use vibelink_domain::device::DeviceUpdate;
use vibelink_domain::error::{AdapterError, RoutingError};
use vibelink_domain::event::HubEvent;
use vibelink_domain::id::{DeviceId, SessionId};
use vibelink_domain::session::Session;

use crate::config::RouterConfig;
use crate::event_bus::InProcessEventBus;
use crate::ports::EventPublisher;
use crate::registry::Registry;
use crate::supervisor::SessionTracker;

/// Pending result of a routed command.
pub type Ticket = oneshot::Receiver<Result<Ack, RoutingError>>;

/// An actuation handed to an adapter, with the channel for its result.
#[derive(Debug)]
pub struct Submission {
    pub actuation: Actuation,
    pub reply: oneshot::Sender<Result<Ack, AdapterError>>,
}

/// The router's view of one adapter session: its state and its queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: watch::Receiver<Session>,
    outbox: mpsc::Sender<Submission>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(tracker: &SessionTracker, outbox: mpsc::Sender<Submission>) -> Self {
        Self {
            session: tracker.watch(),
            outbox,
        }
    }

    fn id(&self) -> SessionId {
        self.session.borrow().id
    }

    fn is_connected(&self) -> bool {
        self.session.borrow().state.is_connected()
    }
}

type SlotKey = (DeviceId, u32);

enum Request {
    Route { command: Command, reply: oneshot::Sender<Result<Ack, RoutingError>> },
    Flush { key: SlotKey, generation: u64 },
    Release { key: SlotKey, stamp: u64 },
    Attach(SessionHandle),
    Detach(SessionId),
}

/// Cloneable handle onto the router actor.
#[derive(Debug, Clone)]
pub struct Router {
    requests: mpsc::Sender<Request>,
}

impl Router {
    /// Spawn the router actor. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(config: RouterConfig, registry: Registry, bus: InProcessEventBus) -> Self {
        let (requests, inbox) = mpsc::channel(config.queue_capacity.max(1));
        let actor = RouterActor {
            max_intensity: config.max_intensity(),
            config,
            registry,
            bus,
            sessions: HashMap::new(),
            slots: HashMap::new(),
            last_dispatch: HashMap::new(),
            generation: 0,
            latest: HashMap::new(),
            stamp: 0,
            requests: requests.downgrade(),
        };
        tokio::spawn(actor.run(inbox));
        Self { requests }
    }

    /// Route a command and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownDevice`], [`RoutingError::ChannelOutOfRange`]
    /// or [`RoutingError::AdapterUnavailable`] for rejected commands, and the
    /// dispatch failure for accepted ones.
    #[tracing::instrument(
        skip(self, command),
        fields(command = %command.id, device = %command.device, channel = command.channel)
    )]
    pub async fn route(&self, command: Command) -> Result<Ack, RoutingError> {
        let ticket = self.submit(command).await?;
        ticket.await.map_err(|_| RoutingError::HubStopped)?
    }

    /// Queue a command without waiting for its outcome.
    ///
    /// Commands submitted in sequence from one task reach the router in that
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::HubStopped`] when the router is gone.
    pub async fn submit(&self, command: Command) -> Result<Ticket, RoutingError> {
        let (reply, ticket) = oneshot::channel();
        self.requests
            .send(Request::Route { command, reply })
            .await
            .map_err(|_| RoutingError::HubStopped)?;
        Ok(ticket)
    }

    /// Make a session's devices routable.
    pub async fn attach(&self, handle: SessionHandle) {
        let _ = self.requests.send(Request::Attach(handle)).await;
    }

    /// Forget a session; its devices answer `AdapterUnavailable`.
    pub async fn detach(&self, session: SessionId) {
        let _ = self.requests.send(Request::Detach(session)).await;
    }
}

struct Pending {
    command: Command,
    /// Arrival order of the command within its slot.
    stamp: u64,
    actuation: Actuation,
    reply: oneshot::Sender<Result<Ack, RoutingError>>,
}

struct Slot {
    pending: Pending,
    generation: u64,
}

struct RouterActor {
    config: RouterConfig,
    max_intensity: Intensity,
    registry: Registry,
    bus: InProcessEventBus,
    sessions: HashMap<SessionId, SessionHandle>,
    slots: HashMap<SlotKey, Slot>,
    last_dispatch: HashMap<DeviceId, Instant>,
    generation: u64,
    /// Stamp of the most recent accepted command per slot.
    latest: HashMap<SlotKey, u64>,
    stamp: u64,
    requests: mpsc::WeakSender<Request>,
}

impl RouterActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<Request>) {
        while let Some(request) = inbox.recv().await {
            match request {
                Request::Route { command, reply } => self.route(command, reply),
                Request::Flush { key, generation } => self.flush(key, generation),
                Request::Release { key, stamp } => self.release(key, stamp),
                Request::Attach(handle) => {
                    tracing::debug!(session = %handle.id(), "session attached to router");
                    self.sessions.insert(handle.id(), handle);
                }
                Request::Detach(session) => {
                    tracing::debug!(%session, "session detached from router");
                    self.sessions.remove(&session);
                }
            }
        }
        tracing::debug!("router stopped");
    }

    /// Resolve the target channel, rejecting commands that can never be
    /// delivered right now.
    fn resolve(&self, command: &Command) -> Result<Channel, RoutingError> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .get(&command.device)
            .ok_or_else(|| RoutingError::UnknownDevice(command.device.clone()))?;
        let channel = entry.device.channel(command.channel).copied().ok_or_else(|| {
            RoutingError::ChannelOutOfRange {
                device: command.device.clone(),
                channel: command.channel,
            }
        })?;
        let connected = self
            .sessions
            .get(&entry.device.session)
            .is_some_and(SessionHandle::is_connected);
        if !connected {
            return Err(RoutingError::AdapterUnavailable(command.device.clone()));
        }
        Ok(channel)
    }

    fn route(&mut self, command: Command, reply: oneshot::Sender<Result<Ack, RoutingError>>) {
        let channel = match self.resolve(&command) {
            Ok(channel) => channel,
            Err(err) => {
                tracing::debug!(command = %command.id, %err, "command rejected");
                let _ = reply.send(Err(err));
                return;
            }
        };

        let intensity = command.clamped_intensity().scale(self.max_intensity);
        let actuation = Actuation::new(&command, channel, intensity);
        let key = (command.device.clone(), command.channel);
        self.stamp = self.stamp.wrapping_add(1);
        self.latest.insert(key.clone(), self.stamp);
        let pending = Pending {
            command,
            stamp: self.stamp,
            actuation,
            reply,
        };

        if let Some(slot) = self.slots.get_mut(&key) {
            let by = pending.command.id;
            let superseded = std::mem::replace(&mut slot.pending, pending);
            tracing::trace!(command = %superseded.command.id, %by, "command superseded");
            let _ = superseded
                .reply
                .send(Ok(Ack::superseded(&superseded.command, by)));
            return;
        }

        let due = (Instant::now() + self.config.coalesce_window()).max(self.earliest_dispatch(&key.0));
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.slots.insert(key.clone(), Slot { pending, generation });
        self.arm(key, generation, due);
    }

    fn earliest_dispatch(&self, device: &DeviceId) -> Instant {
        self.last_dispatch
            .get(device)
            .map_or_else(Instant::now, |last| *last + self.config.min_interval())
    }

    fn arm(&self, key: SlotKey, generation: u64, due: Instant) {
        let requests = self.requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            if let Some(requests) = requests.upgrade() {
                let _ = requests.send(Request::Flush { key, generation }).await;
            }
        });
    }

    fn flush(&mut self, key: SlotKey, generation: u64) {
        if self.slots.get(&key).is_none_or(|slot| slot.generation != generation) {
            return;
        }
        // another channel of the same device may have dispatched meanwhile
        let earliest = self.earliest_dispatch(&key.0);
        if earliest > Instant::now() {
            self.arm(key, generation, earliest);
            return;
        }
        let Some(Slot { pending, .. }) = self.slots.remove(&key) else {
            return;
        };
        self.last_dispatch.insert(key.0.clone(), Instant::now());
        let timed = pending
            .command
            .duration
            .filter(|_| !pending.actuation.intensity.is_zero());
        if let Some(duration) = timed {
            self.schedule_release(key, pending.stamp, duration);
        }
        self.dispatch(pending);
    }

    fn schedule_release(&self, key: SlotKey, stamp: u64, after: Duration) {
        let requests = self.requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(requests) = requests.upgrade() {
                let _ = requests.send(Request::Release { key, stamp }).await;
            }
        });
    }

    /// Stop a timed command's slot, unless it has been overridden since.
    fn release(&mut self, key: SlotKey, stamp: u64) {
        if self.latest.get(&key) != Some(&stamp) {
            return;
        }
        let (device, channel) = key;
        tracing::trace!(%device, channel, "timed command expired");
        let stop = Command::new(device, channel, 0.0, CommandSource::Local);
        let (reply, _) = oneshot::channel();
        self.route(stop, reply);
    }

    fn dispatch(&self, pending: Pending) {
        let Pending {
            command,
            actuation,
            reply,
            ..
        } = pending;
        let device = command.device.clone();

        // the device or its session may have gone away during the window
        let snapshot = self.registry.snapshot();
        let Some(entry) = snapshot.get(&device) else {
            let _ = reply.send(Err(RoutingError::DeviceUnavailable(device)));
            return;
        };
        let Some(handle) = self
            .sessions
            .get(&entry.device.session)
            .filter(|handle| handle.is_connected())
        else {
            let _ = reply.send(Err(RoutingError::AdapterUnavailable(device)));
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let submission = Submission {
            actuation: actuation.clone(),
            reply: ack_tx,
        };
        match handle.outbox.try_send(submission) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%device, "adapter queue is full, dropping command");
                let _ = reply.send(Err(RoutingError::AdapterUnavailable(device)));
                return;
            }
            Err(TrySendError::Closed(_)) => {
                let _ = reply.send(Err(RoutingError::AdapterUnavailable(device)));
                return;
            }
        }

        tracing::trace!(%device, channel = actuation.channel.index, value = actuation.value, "command dispatched");
        tokio::spawn(await_delivery(
            self.registry.clone(),
            self.bus.clone(),
            self.config.dispatch_timeout(),
            actuation,
            entry.liveness(),
            ack_rx,
            reply,
        ));
    }
}

async fn await_delivery(
    registry: Registry,
    bus: InProcessEventBus,
    deadline: Duration,
    actuation: Actuation,
    mut alive: watch::Receiver<bool>,
    ack: oneshot::Receiver<Result<Ack, AdapterError>>,
    reply: oneshot::Sender<Result<Ack, RoutingError>>,
) {
    let device = actuation.device.clone();
    let outcome = tokio::select! {
        result = tokio::time::timeout(deadline, ack) => match result {
            Ok(Ok(Ok(ack))) => Ok(ack),
            Ok(Ok(Err(AdapterError::Unavailable)) | Err(_)) => {
                Err(RoutingError::AdapterUnavailable(device.clone()))
            }
            Ok(Ok(Err(source))) => Err(RoutingError::DeliveryFailed {
                device: device.clone(),
                source,
            }),
            Err(_) => Err(RoutingError::Timeout {
                device: device.clone(),
                after: deadline,
            }),
        },
        _ = alive.wait_for(|alive| !*alive) => Err(RoutingError::DeviceUnavailable(device.clone())),
    };

    match &outcome {
        Ok(ack) if ack.applied() => {
            let update = DeviceUpdate::actuated(actuation.channel.index, actuation.intensity);
            if let Err(err) = registry.update_state(&device, update).await {
                tracing::debug!(%device, %err, "could not record actuation state");
            }
            bus.publish(HubEvent::CommandDelivered {
                command: actuation.command,
                device,
                channel: actuation.channel.index,
                intensity: actuation.intensity,
            });
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%device, %err, "command failed"),
    }
    let _ = reply.send(outcome);
}
