//! # vibelink-adapter-gatt
//!
//! GATT adapter — scans for haptic peripherals, connects to them and writes
//! actuation commands to a known characteristic.
//!
//! ## How it works
//!
//! 1. `start` begins a BLE scan filtered on the profile's service UUID.
//! 2. Every matching peripheral that passes the MAC allowlist is connected
//!    (service discovery included) and registered as a device with the
//!    profile's channels. The session moves to `Connecting` for the first
//!    peripheral and to `Connected` once its characteristics are resolved;
//!    a failed first attempt returns it to `Discovering`.
//! 3. Notifications on the RX characteristic are reported as heartbeats.
//! 4. `submit` writes the profile command for the denormalized level.
//!    Identical consecutive levels are not re-sent. A failed write is
//!    retried `write_retries` times; after that the device is reported
//!    unreachable while the session stays up.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `vibelink-app` and `vibelink-domain`.

mod config;
mod error;
pub mod link;
pub mod profile;

pub use config::GattConfig;
pub use error::GattError;
pub use link::{BtleplugLink, GattLink, LinkEvent};
pub use profile::GattProfile;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vibelink_app::ports::{AdapterContext, Capability, ProtocolAdapter};
use vibelink_domain::command::{Ack, AckStatus, Actuation};
use vibelink_domain::device::DeviceDescriptor;
use vibelink_domain::error::AdapterError;
use vibelink_domain::id::DeviceId;
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

/// A connected peripheral.
#[derive(Debug)]
struct Peer {
    address: String,
    /// Last level written per channel.
    levels: BTreeMap<u32, u32>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for Peer {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

type Peers = Arc<Mutex<HashMap<DeviceId, Peer>>>;

fn lock(peers: &Peers) -> MutexGuard<'_, HashMap<DeviceId, Peer>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device id of the peripheral at `address`.
#[must_use]
pub fn device_id(address: &str) -> DeviceId {
    DeviceId::new(format!("gatt:{}", address.to_ascii_uppercase()))
}

/// GATT protocol adapter over a [`GattLink`].
pub struct GattAdapter<L> {
    config: GattConfig,
    link: Arc<L>,
    peers: Peers,
    ctx: Option<AdapterContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L: GattLink> GattAdapter<L> {
    #[must_use]
    pub fn new(config: GattConfig, link: Arc<L>) -> Self {
        Self {
            config,
            link,
            peers: Arc::new(Mutex::new(HashMap::new())),
            ctx: None,
            tasks: Vec::new(),
        }
    }

    async fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }

    async fn write_with_retries(&self, address: &str, bytes: &[u8]) -> Result<(), GattError> {
        let profile = &self.config.profile;
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let deadline = Duration::from_millis(self.config.write_timeout_ms);
        let mut attempt = 0;
        loop {
            let write = self.link.write(
                address,
                profile.write_characteristic,
                bytes,
                profile.write_with_response,
            );
            let result = match tokio::time::timeout(deadline, write).await {
                Ok(result) => result,
                Err(_) => Err(GattError::Timeout(deadline)),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.write_retries => {
                    attempt += 1;
                    tracing::debug!(address, attempt, %err, "GATT write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<L: GattLink> ProtocolAdapter for GattAdapter<L> {
    fn protocol(&self) -> Protocol {
        Protocol::Gatt
    }

    fn probe(&self) -> impl Future<Output = Capability> + Send {
        let link = Arc::clone(&self.link);
        let enabled = self.config.enabled;
        async move {
            if !enabled {
                return Capability::Disabled("gatt adapter disabled in configuration".into());
            }
            match link.probe().await {
                Ok(()) => Capability::Available,
                Err(err) => Capability::Unavailable(err.to_string()),
            }
        }
    }

    fn connects_in_background(&self) -> bool {
        true
    }

    async fn start(&mut self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.abort_tasks().await;

        let service = self.config.profile.service;
        let events = self.link.scan(service).await?;
        tracing::info!(%service, "GATT scan started");

        self.tasks.push(tokio::spawn(discover(
            Arc::clone(&self.link),
            ctx.clone(),
            events,
            Arc::clone(&self.peers),
            self.config.clone(),
        )));
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn submit(&mut self, actuation: &Actuation) -> Result<Ack, AdapterError> {
        let channel = actuation.channel.index;
        let level = actuation.level();
        let (address, unchanged) = {
            let peers = lock(&self.peers);
            let peer = peers
                .get(&actuation.device)
                .ok_or_else(|| AdapterError::NotOwned(actuation.device.clone()))?;
            (
                peer.address.clone(),
                peer.levels.get(&channel) == Some(&level),
            )
        };
        if unchanged {
            return Ok(Ack::new(actuation, AckStatus::Unchanged));
        }

        let bytes = self.config.profile.encode(level);
        if let Err(err) = self.write_with_retries(&address, &bytes).await {
            tracing::warn!(
                device = %actuation.device,
                attempts = self.config.write_retries + 1,
                %err,
                "GATT write failed, marking device unreachable"
            );
            if let Some(peer) = lock(&self.peers).get_mut(&actuation.device) {
                peer.levels.remove(&channel);
            }
            if let Some(ctx) = &self.ctx {
                ctx.unreachable(actuation.device.clone()).await;
            }
            return Err(err.into());
        }

        if let Some(peer) = lock(&self.peers).get_mut(&actuation.device) {
            peer.levels.insert(channel, level);
        }
        tracing::trace!(device = %actuation.device, level, "GATT level written");

        let status = if self.config.profile.write_with_response {
            AckStatus::Delivered
        } else {
            AckStatus::BestEffort
        };
        Ok(Ack::new(actuation, status))
    }

    async fn stop(&mut self) {
        self.abort_tasks().await;
        self.link.stop_scan().await;
        let addresses: Vec<String> = lock(&self.peers)
            .drain()
            .map(|(_, peer)| peer.address.clone())
            .collect();
        for address in addresses {
            self.link.disconnect(&address).await;
        }
        self.ctx = None;
        tracing::info!("GATT adapter stopped");
    }
}

async fn discover<L: GattLink>(
    link: Arc<L>,
    ctx: AdapterContext,
    mut events: mpsc::Receiver<LinkEvent>,
    peers: Peers,
    config: GattConfig,
) {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Discovered { address, name } => {
                let id = device_id(&address);
                if lock(&peers).contains_key(&id) {
                    continue;
                }
                if !config.accepts(&address) {
                    tracing::trace!(address, "GATT peripheral not in allowlist");
                    continue;
                }
                if !config.auto_connect {
                    tracing::info!(address, ?name, "GATT peripheral found, auto-connect is off");
                    continue;
                }
                let first_link = ctx.state() != ConnectionState::Connected;
                if first_link {
                    report_state(&ctx, ConnectionState::Connecting).await;
                }
                let registered = match connect(&*link, &ctx, &config, &address, connect_timeout).await
                {
                    Some(peer) => {
                        let descriptor = DeviceDescriptor::builder()
                            .id(id.clone())
                            .protocol(Protocol::Gatt)
                            .name(name.unwrap_or_else(|| address.clone()))
                            .channels(config.profile.channels())
                            .build();
                        match descriptor {
                            Ok(descriptor) => {
                                lock(&peers).insert(id.clone(), peer);
                                tracing::info!(device = %id, "GATT peripheral connected");
                                report_state(&ctx, ConnectionState::Connected).await;
                                ctx.discovered(descriptor).await;
                                true
                            }
                            Err(err) => {
                                tracing::warn!(address, %err, "invalid GATT device profile");
                                link.disconnect(&address).await;
                                false
                            }
                        }
                    }
                    None => false,
                };
                if first_link && !registered {
                    report_state(&ctx, ConnectionState::Discovering).await;
                }
            }
            LinkEvent::Disconnected { address } => {
                let id = device_id(&address);
                let removed = lock(&peers).remove(&id);
                if removed.is_some() {
                    tracing::info!(device = %id, "GATT peripheral disconnected");
                    ctx.lost(id).await;
                }
            }
        }
    }
    ctx.fault(GattError::ScanEnded.into());
}

async fn report_state(ctx: &AdapterContext, state: ConnectionState) {
    if let Err(err) = ctx.set_state(state).await {
        tracing::debug!(%err, "GATT session state not updated");
    }
}

async fn connect<L: GattLink>(
    link: &L,
    ctx: &AdapterContext,
    config: &GattConfig,
    address: &str,
    timeout: Duration,
) -> Option<Peer> {
    match tokio::time::timeout(timeout, link.connect(address)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(address, %err, "GATT connect failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(address, ?timeout, "GATT connect timed out");
            link.disconnect(address).await;
            return None;
        }
    }

    let heartbeat = match config.profile.notify_characteristic {
        Some(characteristic) => match link.notifications(address, characteristic).await {
            Ok(rx) => Some(tokio::spawn(forward_heartbeats(
                ctx.clone(),
                device_id(address),
                rx,
            ))),
            Err(err) => {
                tracing::debug!(address, %err, "GATT notifications unavailable");
                None
            }
        },
        None => None,
    };

    Some(Peer {
        address: address.to_string(),
        levels: BTreeMap::new(),
        heartbeat,
    })
}

async fn forward_heartbeats(ctx: AdapterContext, device: DeviceId, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(payload) = rx.recv().await {
        tracing::trace!(device = %device, len = payload.len(), "GATT notification");
        ctx.heartbeat(device.clone()).await;
    }
}
