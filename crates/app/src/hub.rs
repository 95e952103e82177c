//! Hub — wires the registry, router and supervisor together.
//!
//! Adapter events are consumed by a single coordinating task, which is the
//! only place that turns discoveries, losses and heartbeats into registry
//! mutations. A second task sweeps the registry for silent devices.

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use vibelink_domain::command::{Ack, Command};
use vibelink_domain::device::DeviceUpdate;
use vibelink_domain::error::RoutingError;
use vibelink_domain::event::{AdapterEvent, HubEvent, RemovalReason};
use vibelink_domain::id::{DeviceId, SessionId};
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

use crate::config::HubConfig;
use crate::event_bus::InProcessEventBus;
use crate::ports::{Capability, EventPublisher, ProtocolAdapter};
use crate::registry::Registry;
use crate::router::Router;
use crate::supervisor::Supervisor;

/// A running hub.
pub struct Hub {
    bus: InProcessEventBus,
    registry: Registry,
    router: Router,
    supervisor: Supervisor,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Start the core tasks. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(config: &HubConfig) -> Self {
        let bus = InProcessEventBus::new(config.bus_capacity);
        let registry = Registry::spawn(bus.clone(), config.event_capacity);
        let router = Router::spawn(config.router.clone(), registry.clone(), bus.clone());
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let supervisor = Supervisor::new(
            config.supervisor.clone(),
            events_tx,
            bus.clone(),
            router.clone(),
        );
        let (stop, _) = watch::channel(false);

        let coordinator = Coordinator {
            registry: registry.clone(),
            router: router.clone(),
            bus: bus.clone(),
        };
        let tasks = vec![
            tokio::spawn(coordinator.run(events_rx, stop.subscribe())),
            tokio::spawn(sweep(
                registry.clone(),
                config.heartbeat_timeout(),
                config.sweep_interval(),
                stop.subscribe(),
            )),
        ];
        tracing::info!("hub started");

        Self {
            bus,
            registry,
            router,
            supervisor,
            stop,
            tasks,
        }
    }

    /// Probe and start an adapter. See [`Supervisor::spawn_adapter`].
    pub async fn spawn_adapter<A>(&mut self, adapter: A) -> Capability
    where
        A: ProtocolAdapter + Sync + 'static,
    {
        self.supervisor.spawn_adapter(adapter).await
    }

    /// Route a command submitted in-process.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub async fn route(&self, command: Command) -> Result<Ack, RoutingError> {
        self.router.route(command).await
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<(Protocol, SessionId)> {
        self.supervisor.sessions()
    }

    /// Stop every adapter, then the core tasks.
    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
        self.stop.send_replace(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(%err, "hub task failed");
            }
        }
        tracing::info!("hub stopped");
    }
}

struct Coordinator {
    registry: Registry,
    router: Router,
    bus: InProcessEventBus,
}

impl Coordinator {
    async fn run(self, mut events: mpsc::Receiver<AdapterEvent>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                () = stop_requested(&mut stop) => break,
            }
        }
        tracing::debug!("hub event loop stopped");
    }

    async fn handle(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::DeviceDiscovered {
                session,
                descriptor,
            } => {
                let device = descriptor.id.clone();
                if let Err(err) = self.registry.register(session, descriptor).await {
                    tracing::warn!(%device, %err, "device registration rejected");
                }
            }
            AdapterEvent::DeviceLost { session, device } => {
                if self.owned_by(&device, session) {
                    if let Err(err) = self.registry.remove(&device, RemovalReason::Lost).await {
                        tracing::debug!(%device, %err, "lost device not removed");
                    }
                }
            }
            AdapterEvent::DeviceUnreachable { session, device } => {
                self.update(session, &device, DeviceUpdate::unreachable())
                    .await;
            }
            AdapterEvent::Heartbeat { session, device } => {
                self.update(session, &device, DeviceUpdate::heartbeat()).await;
            }
            AdapterEvent::CommandReceived { session, command } => {
                self.forward(session, command).await;
            }
            AdapterEvent::StateChanged {
                session,
                protocol,
                from,
                to,
            } => {
                self.bus.publish(HubEvent::SessionStateChanged {
                    session,
                    protocol,
                    from,
                    to,
                });
                if matches!(to, ConnectionState::Error | ConnectionState::Disconnected) {
                    match self.registry.remove_session(session).await {
                        Ok(removed) if !removed.is_empty() => {
                            tracing::info!(%protocol, count = removed.len(), "dropped devices of closed session");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::debug!(%err, "registry unavailable"),
                    }
                }
            }
        }
    }

    fn owned_by(&self, device: &DeviceId, session: SessionId) -> bool {
        self.registry
            .lookup(device)
            .is_some_and(|record| record.session == session)
    }

    async fn update(&self, session: SessionId, device: &DeviceId, update: DeviceUpdate) {
        if !self.owned_by(device, session) {
            tracing::trace!(%device, "ignoring update for device not owned by reporter");
            return;
        }
        if let Err(err) = self.registry.update_state(device, update).await {
            tracing::debug!(%device, %err, "device update dropped");
        }
    }

    /// Queue an inbound command in arrival order; its outcome is only logged
    /// because the submitter is on the far side of a network protocol.
    async fn forward(&self, session: SessionId, command: Command) {
        let (id, source) = (command.id, command.source);
        match self.router.submit(command).await {
            Ok(ticket) => {
                tokio::spawn(async move {
                    match ticket.await {
                        Ok(Ok(ack)) => tracing::trace!(command = %id, status = ?ack.status, "inbound command handled"),
                        Ok(Err(err)) => tracing::debug!(command = %id, %source, %err, "inbound command not delivered"),
                        Err(_) => {}
                    }
                });
            }
            Err(err) => tracing::warn!(%session, %err, "router unavailable"),
        }
    }
}

async fn sweep(
    registry: Registry,
    timeout: std::time::Duration,
    every: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => match registry.expire(timeout).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::debug!(count = expired.len(), "expired silent devices");
                }
                Ok(_) => {}
                Err(_) => break,
            },
            () = stop_requested(&mut stop) => break,
        }
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::FakeAdapter;
    use vibelink_domain::command::{AckStatus, CommandSource};
    use vibelink_domain::error::AdapterError;

    async fn wait_connected(bus: &mut broadcast::Receiver<HubEvent>, protocol: Protocol) {
        loop {
            if let HubEvent::SessionStateChanged {
                protocol: p,
                to: ConnectionState::Connected,
                ..
            } = bus.recv().await.unwrap()
            {
                if p == protocol {
                    return;
                }
            }
        }
    }

    async fn wait_removed(bus: &mut broadcast::Receiver<HubEvent>) -> RemovalReason {
        loop {
            if let HubEvent::DeviceRemoved { reason, .. } = bus.recv().await.unwrap() {
                return reason;
            }
        }
    }

    #[tokio::test]
    async fn should_deliver_denormalized_values_end_to_end() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        let adapter = FakeAdapter::new(Protocol::Gatt).with_device("D1", 20);
        let log = adapter.log();
        hub.spawn_adapter(adapter).await;
        wait_connected(&mut bus, Protocol::Gatt).await;

        let ack = hub
            .route(Command::new("D1", 0, 0.5, CommandSource::Local))
            .await
            .unwrap();
        hub.route(Command::new("D1", 0, 1.5, CommandSource::Local))
            .await
            .unwrap();

        assert_eq!(ack.status, AckStatus::Delivered);
        let values: Vec<f64> = log.lock().unwrap().submitted.iter().map(|a| a.value).collect();
        assert_eq!(values, vec![10.0, 20.0]);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_reject_unregistered_device() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        hub.spawn_adapter(FakeAdapter::new(Protocol::Gatt).with_device("D1", 20))
            .await;
        wait_connected(&mut bus, Protocol::Gatt).await;
        let before = hub.registry().devices();

        let err = hub
            .route(Command::new("D2", 0, 0.5, CommandSource::Local))
            .await
            .unwrap_err();

        assert!(matches!(err, RoutingError::UnknownDevice(_)));
        assert_eq!(hub.registry().devices(), before);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_keep_running_when_one_adapter_is_unsupported() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();

        let adv = hub
            .spawn_adapter(
                FakeAdapter::new(Protocol::Adv)
                    .with_capability(Capability::Unavailable("requires linux".into())),
            )
            .await;
        hub.spawn_adapter(FakeAdapter::new(Protocol::Gatt).with_device("G1", 20))
            .await;
        hub.spawn_adapter(FakeAdapter::new(Protocol::Osc).with_device("O1", 100))
            .await;
        hub.spawn_adapter(FakeAdapter::new(Protocol::Remote)).await;

        assert!(matches!(adv, Capability::Unavailable(_)));
        assert_eq!(hub.sessions().len(), 3);
        wait_connected(&mut bus, Protocol::Osc).await;
        hub.route(Command::new("O1", 0, 0.3, CommandSource::Local))
            .await
            .unwrap();
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_route_commands_received_by_adapters() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        let adapter = FakeAdapter::new(Protocol::Osc).with_device("D1", 20);
        let log = adapter.log();
        hub.spawn_adapter(adapter).await;
        wait_connected(&mut bus, Protocol::Osc).await;

        let ctx = log.lock().unwrap().ctx.clone().unwrap();
        ctx.command(Command::new("D1", 0, 0.25, CommandSource::Adapter(Protocol::Osc)))
            .await;

        loop {
            if let HubEvent::CommandDelivered { intensity, .. } = bus.recv().await.unwrap() {
                assert!((intensity.value() - 0.25).abs() < f64::EPSILON);
                break;
            }
        }
        assert!((log.lock().unwrap().submitted[0].value - 5.0).abs() < f64::EPSILON);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_remove_device_reported_lost() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        let adapter = FakeAdapter::new(Protocol::Gatt).with_device("D1", 20);
        let log = adapter.log();
        hub.spawn_adapter(adapter).await;
        wait_connected(&mut bus, Protocol::Gatt).await;

        let ctx = log.lock().unwrap().ctx.clone().unwrap();
        ctx.lost(DeviceId::new("D1")).await;

        assert_eq!(wait_removed(&mut bus).await, RemovalReason::Lost);
        let err = hub
            .route(Command::new("D1", 0, 0.5, CommandSource::Local))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::UnknownDevice(_)));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_drop_devices_of_failed_session() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        let adapter = FakeAdapter::new(Protocol::Remote).with_device("R1", 20);
        let log = adapter.log();
        hub.spawn_adapter(adapter).await;
        wait_connected(&mut bus, Protocol::Remote).await;

        let ctx = log.lock().unwrap().ctx.clone().unwrap();
        ctx.fault(AdapterError::transport(std::io::Error::other("tunnel down")));

        assert_eq!(wait_removed(&mut bus).await, RemovalReason::SessionClosed);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_expire_devices_without_heartbeat() {
        let config = HubConfig {
            heartbeat_timeout_ms: 50,
            sweep_interval_ms: 20,
            ..HubConfig::default()
        };
        let mut hub = Hub::start(&config);
        let mut bus = hub.subscribe();
        hub.spawn_adapter(FakeAdapter::new(Protocol::Adv).with_device("A1", 7))
            .await;

        let reason = tokio::time::timeout(Duration::from_secs(5), wait_removed(&mut bus))
            .await
            .unwrap();

        assert_eq!(reason, RemovalReason::Expired);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn should_stop_every_adapter_on_shutdown() {
        let mut hub = Hub::start(&HubConfig::default());
        let mut bus = hub.subscribe();
        let gatt = FakeAdapter::new(Protocol::Gatt);
        let osc = FakeAdapter::new(Protocol::Osc);
        let (gatt_log, osc_log) = (gatt.log(), osc.log());
        hub.spawn_adapter(gatt).await;
        hub.spawn_adapter(osc).await;
        wait_connected(&mut bus, Protocol::Osc).await;

        hub.shutdown().await;

        assert_eq!(gatt_log.lock().unwrap().stops, 1);
        assert_eq!(osc_log.lock().unwrap().stops, 1);
    }
}
