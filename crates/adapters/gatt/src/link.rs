//! The BLE central capability the adapter drives.
//!
//! [`GattLink`] is the seam between the adapter's session logic and the
//! platform stack: scan, connect, write a characteristic, subscribe to
//! notifications. [`BtleplugLink`] implements it on top of btleplug.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::error::GattError;

/// What the scan loop reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peripheral advertising the scanned service was seen.
    Discovered {
        address: String,
        name: Option<String>,
    },
    /// A connected peripheral dropped its connection.
    Disconnected { address: String },
}

/// Platform BLE central.
pub trait GattLink: Send + Sync + 'static {
    /// Check that a usable BLE adapter exists.
    fn probe(&self) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Start scanning for peripherals advertising `service`.
    fn scan(
        &self,
        service: Uuid,
    ) -> impl Future<Output = Result<mpsc::Receiver<LinkEvent>, GattError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = ()> + Send;

    /// Connect and run service discovery.
    fn connect(&self, address: &str) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Write `bytes` to `characteristic`.
    fn write(
        &self,
        address: &str,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Subscribe to notifications of `characteristic`.
    fn notifications(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<mpsc::Receiver<Vec<u8>>, GattError>> + Send;

    fn disconnect(&self, address: &str) -> impl Future<Output = ()> + Send;
}

/// [`GattLink`] over the first BLE adapter btleplug finds.
#[derive(Default)]
pub struct BtleplugLink {
    central: Mutex<Option<Adapter>>,
    connected: Mutex<HashMap<String, Peripheral>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugLink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn central(&self) -> Result<Adapter, GattError> {
        let mut central = self.central.lock().await;
        if let Some(adapter) = central.as_ref() {
            return Ok(adapter.clone());
        }
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(GattError::NotAvailable)?;
        *central = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find(&self, address: &str) -> Result<Peripheral, GattError> {
        let central = self.central().await?;
        let wanted: BDAddr = address
            .parse()
            .map_err(|_| GattError::UnknownPeripheral(address.to_string()))?;
        central
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == wanted)
            .ok_or_else(|| GattError::UnknownPeripheral(address.to_string()))
    }

    async fn connected(&self, address: &str) -> Result<Peripheral, GattError> {
        self.connected
            .lock()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| GattError::UnknownPeripheral(address.to_string()))
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, GattError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(GattError::CharacteristicNotFound { uuid })
}

impl GattLink for BtleplugLink {
    async fn probe(&self) -> Result<(), GattError> {
        self.central().await.map(|_| ())
    }

    async fn scan(&self, service: Uuid) -> Result<mpsc::Receiver<LinkEvent>, GattError> {
        let central = self.central().await?;
        let mut events = central.events().await?;
        central
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = central.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(props)) = peripheral.properties().await else {
                            continue;
                        };
                        if !props.services.contains(&service) {
                            continue;
                        }
                        LinkEvent::Discovered {
                            address: props.address.to_string(),
                            name: props.local_name,
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let Ok(peripheral) = central.peripheral(&id).await else {
                            continue;
                        };
                        LinkEvent::Disconnected {
                            address: peripheral.address().to_string(),
                        }
                    }
                    _ => continue,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        self.tasks.lock().await.push(task);
        Ok(rx)
    }

    async fn stop_scan(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let central = self.central.lock().await.clone();
        if let Some(central) = central {
            if let Err(err) = central.stop_scan().await {
                tracing::debug!(%err, "failed to stop BLE scan");
            }
        }
    }

    async fn connect(&self, address: &str) -> Result<(), GattError> {
        let peripheral = self.find(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        self.connected
            .lock()
            .await
            .insert(address.to_string(), peripheral);
        Ok(())
    }

    async fn write(
        &self,
        address: &str,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), GattError> {
        let peripheral = self.connected(address).await?;
        let characteristic = find_characteristic(&peripheral, characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral.write(&characteristic, bytes, write_type).await?;
        Ok(())
    }

    async fn notifications(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, GattError> {
        let peripheral = self.connected(address).await?;
        let target = find_characteristic(&peripheral, characteristic)?;
        peripheral.subscribe(&target).await?;
        let mut stream = peripheral.notifications().await?;

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic && tx.send(notification.value).await.is_err()
                {
                    return;
                }
            }
        });
        self.tasks.lock().await.push(task);
        Ok(rx)
    }

    async fn disconnect(&self, address: &str) {
        let peripheral = self.connected.lock().await.remove(address);
        if let Some(peripheral) = peripheral {
            if let Err(err) = peripheral.disconnect().await {
                tracing::warn!(%err, address, "failed to disconnect peripheral");
            }
        }
    }
}
