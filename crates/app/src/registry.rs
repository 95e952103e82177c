//! Device registry — the single source of truth for known devices.
//!
//! All mutations go through one actor task, so concurrent adapter reports
//! are serialized. After every mutation the actor publishes an immutable
//! [`RegistrySnapshot`] through a [`watch`] channel: readers never block the
//! writer and never observe a half-updated record.
//!
//! Every registered device carries a liveness flag. Removing the device
//! flips it, which is how in-flight dispatches learn that their target is
//! gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use vibelink_domain::device::{Device, DeviceDescriptor, DeviceUpdate, Reachability};
use vibelink_domain::error::ValidationError;
use vibelink_domain::event::{HubEvent, RemovalReason};
use vibelink_domain::id::{DeviceId, SessionId};
use vibelink_domain::time;

use crate::event_bus::InProcessEventBus;
use crate::ports::EventPublisher;

/// Registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid device descriptor")]
    Validation(#[from] ValidationError),

    #[error("device {0} is not registered")]
    NotFound(DeviceId),

    #[error("device {device} is owned by session {owner}")]
    OwnedByOtherSession { device: DeviceId, owner: SessionId },

    #[error("registry is stopped")]
    Stopped,
}

/// A device record together with its liveness flag.
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    pub device: Device,
    alive: watch::Receiver<bool>,
}

impl RegisteredDevice {
    /// A receiver that turns `false` once the device leaves the registry.
    #[must_use]
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.alive.clone()
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    devices: HashMap<DeviceId, Arc<RegisteredDevice>>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<&RegisteredDevice> {
        self.devices.get(id).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().map(|entry| &entry.device)
    }
}

enum Request {
    Register {
        session: SessionId,
        descriptor: DeviceDescriptor,
        reply: oneshot::Sender<Result<Device, RegistryError>>,
    },
    Update {
        device: DeviceId,
        update: DeviceUpdate,
        reply: oneshot::Sender<Result<Device, RegistryError>>,
    },
    Remove {
        device: DeviceId,
        reason: RemovalReason,
        reply: oneshot::Sender<Option<Device>>,
    },
    RemoveSession {
        session: SessionId,
        reply: oneshot::Sender<Vec<DeviceId>>,
    },
    Expire {
        timeout: Duration,
        reply: oneshot::Sender<Vec<DeviceId>>,
    },
}

/// Cloneable handle onto the registry actor.
#[derive(Debug, Clone)]
pub struct Registry {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<Arc<RegistrySnapshot>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Register { .. } => "Register",
            Self::Update { .. } => "Update",
            Self::Remove { .. } => "Remove",
            Self::RemoveSession { .. } => "RemoveSession",
            Self::Expire { .. } => "Expire",
        })
    }
}

impl Registry {
    /// Spawn the registry actor. Must be called inside a tokio runtime.
    ///
    /// The actor stops once every handle is dropped.
    #[must_use]
    pub fn spawn(bus: InProcessEventBus, capacity: usize) -> Self {
        let (requests, inbox) = mpsc::channel(capacity.max(1));
        let (snapshot_tx, snapshot) = watch::channel(Arc::new(RegistrySnapshot::default()));
        let actor = RegistryActor {
            devices: HashMap::new(),
            liveness: HashMap::new(),
            snapshot: snapshot_tx,
            bus,
        };
        tokio::spawn(actor.run(inbox));
        Self { requests, snapshot }
    }

    /// Current consistent view of every device.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Look up one device by id.
    #[must_use]
    pub fn lookup(&self, id: &DeviceId) -> Option<Device> {
        self.snapshot.borrow().get(id).map(|entry| entry.device.clone())
    }

    /// Every registered device.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.snapshot.borrow().devices().cloned().collect()
    }

    /// Register a device discovered by `session`.
    ///
    /// Re-registering a device already owned by the same session refreshes
    /// its descriptor and `last_seen`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] on an invalid descriptor and
    /// [`RegistryError::OwnedByOtherSession`] when another session owns the id.
    #[tracing::instrument(skip(self, descriptor), fields(device = %descriptor.id))]
    pub async fn register(
        &self,
        session: SessionId,
        descriptor: DeviceDescriptor,
    ) -> Result<Device, RegistryError> {
        descriptor.validate()?;
        self.call(|reply| Request::Register {
            session,
            descriptor,
            reply,
        })
        .await?
    }

    /// Apply a partial state update.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown device.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_state(
        &self,
        device: &DeviceId,
        update: DeviceUpdate,
    ) -> Result<Device, RegistryError> {
        let device = device.clone();
        self.call(|reply| Request::Update {
            device,
            update,
            reply,
        })
        .await?
    }

    /// Remove a device, failing its in-flight commands.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Stopped`] when the actor is gone.
    #[tracing::instrument(skip(self))]
    pub async fn remove(
        &self,
        device: &DeviceId,
        reason: RemovalReason,
    ) -> Result<Option<Device>, RegistryError> {
        let device = device.clone();
        self.call(|reply| Request::Remove {
            device,
            reason,
            reply,
        })
        .await
    }

    /// Remove every device owned by `session`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Stopped`] when the actor is gone.
    #[tracing::instrument(skip(self))]
    pub async fn remove_session(&self, session: SessionId) -> Result<Vec<DeviceId>, RegistryError> {
        self.call(|reply| Request::RemoveSession { session, reply })
            .await
    }

    /// Remove devices with no sign of life within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Stopped`] when the actor is gone.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, timeout: Duration) -> Result<Vec<DeviceId>, RegistryError> {
        self.call(|reply| Request::Expire { timeout, reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| RegistryError::Stopped)?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }
}

struct RegistryActor {
    devices: HashMap<DeviceId, Arc<RegisteredDevice>>,
    liveness: HashMap<DeviceId, watch::Sender<bool>>,
    snapshot: watch::Sender<Arc<RegistrySnapshot>>,
    bus: InProcessEventBus,
}

impl RegistryActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<Request>) {
        while let Some(request) = inbox.recv().await {
            tracing::trace!(?request, "registry request");
            match request {
                Request::Register {
                    session,
                    descriptor,
                    reply,
                } => {
                    let _ = reply.send(self.register(session, descriptor));
                }
                Request::Update {
                    device,
                    update,
                    reply,
                } => {
                    let _ = reply.send(self.update(&device, &update));
                }
                Request::Remove {
                    device,
                    reason,
                    reply,
                } => {
                    let removed = self.remove(&device, reason);
                    self.publish_snapshot();
                    let _ = reply.send(removed);
                }
                Request::RemoveSession { session, reply } => {
                    let owned: Vec<_> = self
                        .devices
                        .values()
                        .filter(|entry| entry.device.session == session)
                        .map(|entry| entry.device.id().clone())
                        .collect();
                    for id in &owned {
                        self.remove(id, RemovalReason::SessionClosed);
                    }
                    self.publish_snapshot();
                    let _ = reply.send(owned);
                }
                Request::Expire { timeout, reply } => {
                    let now = time::now();
                    let stale: Vec<_> = self
                        .devices
                        .values()
                        .filter(|entry| entry.device.is_stale(now, timeout))
                        .map(|entry| entry.device.id().clone())
                        .collect();
                    for id in &stale {
                        tracing::info!(device = %id, "device expired, no heartbeat");
                        self.remove(id, RemovalReason::Expired);
                    }
                    self.publish_snapshot();
                    let _ = reply.send(stale);
                }
            }
        }
        tracing::debug!("registry stopped");
    }

    fn register(
        &mut self,
        session: SessionId,
        descriptor: DeviceDescriptor,
    ) -> Result<Device, RegistryError> {
        let now = time::now();
        if let Some(existing) = self.devices.get(&descriptor.id) {
            if existing.device.session != session {
                return Err(RegistryError::OwnedByOtherSession {
                    device: descriptor.id,
                    owner: existing.device.session,
                });
            }
            let alive = existing.alive.clone();
            let mut device = existing.device.clone();
            device.descriptor = descriptor;
            device.last_seen = now;
            let refreshed = device.clone();
            self.replace(device, alive);
            self.publish_snapshot();
            return Ok(refreshed);
        }

        let device = Device::new(descriptor, session, now);
        let (alive_tx, alive_rx) = watch::channel(true);
        self.liveness.insert(device.id().clone(), alive_tx);
        self.replace(device.clone(), alive_rx);
        self.publish_snapshot();

        tracing::info!(device = %device.id(), protocol = %device.protocol(), "device registered");
        self.bus.publish(HubEvent::DeviceRegistered {
            device: device.id().clone(),
            protocol: device.protocol(),
            session,
        });
        Ok(device)
    }

    fn update(&mut self, id: &DeviceId, update: &DeviceUpdate) -> Result<Device, RegistryError> {
        let entry = self
            .devices
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut device = entry.device.clone();
        let was = device.reachability;
        device.apply(update, time::now());
        let alive = entry.alive.clone();
        let updated = device.clone();
        self.replace(device, alive);
        self.publish_snapshot();

        if was == Reachability::Reachable && updated.reachability == Reachability::Unreachable {
            tracing::warn!(device = %id, "device marked unreachable");
            self.bus
                .publish(HubEvent::DeviceUnreachable { device: id.clone() });
        }
        Ok(updated)
    }

    /// Drop a device and flip its liveness flag. Does not publish the
    /// snapshot so batch removals publish once.
    fn remove(&mut self, id: &DeviceId, reason: RemovalReason) -> Option<Device> {
        let entry = self.devices.remove(id)?;
        if let Some(alive) = self.liveness.remove(id) {
            alive.send_replace(false);
        }
        tracing::info!(device = %id, ?reason, "device removed");
        self.bus.publish(HubEvent::DeviceRemoved {
            device: id.clone(),
            reason,
        });
        Some(entry.device.clone())
    }

    fn replace(&mut self, device: Device, alive: watch::Receiver<bool>) {
        self.devices
            .insert(device.id().clone(), Arc::new(RegisteredDevice { device, alive }));
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(Arc::new(RegistrySnapshot {
            devices: self.devices.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibelink_domain::actuation::{ChannelRange, Intensity};
    use vibelink_domain::channel::Channel;
    use vibelink_domain::protocol::Protocol;

    fn descriptor(id: &str) -> DeviceDescriptor {
        DeviceDescriptor::builder()
            .id(id)
            .protocol(Protocol::Gatt)
            .channel(Channel::vibration(0, ChannelRange::steps(20)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_register_and_lookup_device() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let session = SessionId::new();

        registry.register(session, descriptor("D1")).await.unwrap();

        let device = registry.lookup(&DeviceId::new("D1")).unwrap();
        assert_eq!(device.session, session);
        assert_eq!(registry.devices().len(), 1);
    }

    #[tokio::test]
    async fn should_publish_registration_on_bus() {
        let bus = InProcessEventBus::new(16);
        let mut rx = bus.subscribe();
        let registry = Registry::spawn(bus, 16);

        registry
            .register(SessionId::new(), descriptor("D1"))
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            HubEvent::DeviceRegistered { device, .. } if device.as_str() == "D1"
        ));
    }

    #[tokio::test]
    async fn should_reject_device_owned_by_other_session() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let owner = SessionId::new();
        registry.register(owner, descriptor("D1")).await.unwrap();

        let err = registry
            .register(SessionId::new(), descriptor("D1"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::OwnedByOtherSession { owner: o, .. } if o == owner));
        assert_eq!(registry.lookup(&DeviceId::new("D1")).unwrap().session, owner);
    }

    #[tokio::test]
    async fn should_reject_invalid_descriptor() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let mut invalid = descriptor("D1");
        invalid.channels.clear();

        let err = registry.register(SessionId::new(), invalid).await.unwrap_err();

        assert!(matches!(err, RegistryError::Validation(ValidationError::NoChannels)));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn should_keep_actuation_state_when_same_session_rediscovers() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let session = SessionId::new();
        registry.register(session, descriptor("D1")).await.unwrap();
        registry
            .update_state(&DeviceId::new("D1"), DeviceUpdate::actuated(0, Intensity::FULL))
            .await
            .unwrap();

        registry.register(session, descriptor("D1")).await.unwrap();

        let device = registry.lookup(&DeviceId::new("D1")).unwrap();
        assert_eq!(device.actuation.get(&0), Some(&Intensity::FULL));
    }

    #[tokio::test]
    async fn should_return_not_found_when_updating_unknown_device() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let err = registry
            .update_state(&DeviceId::new("D2"), DeviceUpdate::heartbeat())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn should_flip_liveness_when_removed() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        registry
            .register(SessionId::new(), descriptor("D1"))
            .await
            .unwrap();
        let mut alive = registry
            .snapshot()
            .get(&DeviceId::new("D1"))
            .unwrap()
            .liveness();
        assert!(*alive.borrow());

        let removed = registry
            .remove(&DeviceId::new("D1"), RemovalReason::Lost)
            .await
            .unwrap();

        assert!(removed.is_some());
        alive.wait_for(|alive| !*alive).await.unwrap();
        assert!(registry.lookup(&DeviceId::new("D1")).is_none());
    }

    #[tokio::test]
    async fn should_remove_only_devices_of_closed_session() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        let closing = SessionId::new();
        let staying = SessionId::new();
        registry.register(closing, descriptor("A")).await.unwrap();
        registry.register(closing, descriptor("B")).await.unwrap();
        registry.register(staying, descriptor("C")).await.unwrap();

        let mut removed = registry.remove_session(closing).await.unwrap();
        removed.sort();

        assert_eq!(removed, vec![DeviceId::new("A"), DeviceId::new("B")]);
        assert_eq!(registry.devices().len(), 1);
    }

    #[tokio::test]
    async fn should_expire_silent_devices() {
        let registry = Registry::spawn(InProcessEventBus::new(16), 16);
        registry
            .register(SessionId::new(), descriptor("D1"))
            .await
            .unwrap();

        assert!(registry.expire(Duration::from_secs(60)).await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let expired = registry.expire(Duration::from_millis(5)).await.unwrap();

        assert_eq!(expired, vec![DeviceId::new("D1")]);
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn should_publish_unreachable_once() {
        let bus = InProcessEventBus::new(16);
        let registry = Registry::spawn(bus.clone(), 16);
        registry
            .register(SessionId::new(), descriptor("D1"))
            .await
            .unwrap();
        let mut rx = bus.subscribe();

        let id = DeviceId::new("D1");
        registry.update_state(&id, DeviceUpdate::unreachable()).await.unwrap();
        registry.update_state(&id, DeviceUpdate::unreachable()).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), HubEvent::DeviceUnreachable { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            registry.lookup(&id).unwrap().reachability,
            Reachability::Unreachable
        );
    }
}
