//! The platform capability the ADV adapter consumes: put one manufacturer
//! data payload on the air, replacing whatever was advertised before.

use std::future::Future;
use std::sync::Arc;

use crate::config::AdvConfig;
use crate::error::AdvError;

/// Advertisement broadcaster.
pub trait Advertiser: Send + Sync + 'static {
    /// Check that advertising is possible on this host.
    fn probe(&self) -> impl Future<Output = Result<(), AdvError>> + Send;

    /// Replace the current advertisement with `payload` under `company_id`.
    fn advertise(
        &self,
        company_id: u16,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), AdvError>> + Send;

    /// Withdraw the current advertisement, if any.
    fn clear(&self) -> impl Future<Output = ()> + Send;
}

/// Fallback for hosts without BlueZ: every call fails with
/// [`AdvError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedAdvertiser;

impl Advertiser for UnsupportedAdvertiser {
    async fn probe(&self) -> Result<(), AdvError> {
        Err(AdvError::Unsupported)
    }

    async fn advertise(&self, _company_id: u16, _payload: Vec<u8>) -> Result<(), AdvError> {
        Err(AdvError::Unsupported)
    }

    async fn clear(&self) {}
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use bluez::BluezAdvertiser;

/// The advertiser this build can drive.
#[cfg(all(target_os = "linux", feature = "bluez"))]
pub type PlatformAdvertiser = BluezAdvertiser;

/// The advertiser this build can drive.
#[cfg(not(all(target_os = "linux", feature = "bluez")))]
pub type PlatformAdvertiser = UnsupportedAdvertiser;

/// Build the advertiser for the current platform.
#[cfg(all(target_os = "linux", feature = "bluez"))]
#[must_use]
pub fn platform_advertiser(config: &AdvConfig) -> Arc<PlatformAdvertiser> {
    Arc::new(BluezAdvertiser::new(std::time::Duration::from_millis(
        config.advertising_interval_ms,
    )))
}

/// Build the advertiser for the current platform.
#[cfg(not(all(target_os = "linux", feature = "bluez")))]
#[must_use]
pub fn platform_advertiser(_config: &AdvConfig) -> Arc<PlatformAdvertiser> {
    Arc::new(UnsupportedAdvertiser)
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
mod bluez {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use bluer::adv::{Advertisement, AdvertisementHandle, Type};
    use bluer::{Adapter, Session};
    use tokio::sync::Mutex;

    use super::Advertiser;
    use crate::error::AdvError;

    const DEFAULT_TX_POWER: i16 = 20;

    struct Radio {
        // keeps the D-Bus connection alive
        _session: Session,
        adapter: Adapter,
        tx_power: i16,
    }

    /// [`Advertiser`] over the BlueZ default adapter.
    pub struct BluezAdvertiser {
        interval: Duration,
        radio: Mutex<Option<Radio>>,
        current: Mutex<Option<AdvertisementHandle>>,
    }

    impl BluezAdvertiser {
        #[must_use]
        pub fn new(interval: Duration) -> Self {
            Self {
                interval,
                radio: Mutex::new(None),
                current: Mutex::new(None),
            }
        }

        async fn open() -> Result<Radio, AdvError> {
            let session = Session::new()
                .await
                .map_err(|err| AdvError::NoAdapter(err.to_string()))?;
            let adapter = session
                .default_adapter()
                .await
                .map_err(|err| AdvError::NoAdapter(err.to_string()))?;
            let tx_power = match adapter.supported_advertising_capabilities().await {
                Ok(Some(caps)) => caps.max_tx_power,
                Ok(None) => DEFAULT_TX_POWER,
                Err(err) => {
                    tracing::debug!(%err, "could not read advertising capabilities");
                    DEFAULT_TX_POWER
                }
            };
            tracing::debug!(adapter = adapter.name(), tx_power, "BlueZ adapter opened");
            Ok(Radio {
                _session: session,
                adapter,
                tx_power,
            })
        }

        async fn radio(&self) -> Result<(Adapter, i16), AdvError> {
            let mut radio = self.radio.lock().await;
            if radio.is_none() {
                *radio = Some(Self::open().await?);
            }
            radio
                .as_ref()
                .map(|r| (r.adapter.clone(), r.tx_power))
                .ok_or_else(|| AdvError::NoAdapter("adapter closed".into()))
        }
    }

    impl Advertiser for BluezAdvertiser {
        async fn probe(&self) -> Result<(), AdvError> {
            let (adapter, _) = self.radio().await?;
            match adapter.is_powered().await {
                Ok(true) => Ok(()),
                Ok(false) => Err(AdvError::NoAdapter(format!(
                    "{} is powered off",
                    adapter.name()
                ))),
                Err(err) => Err(AdvError::NoAdapter(err.to_string())),
            }
        }

        async fn advertise(&self, company_id: u16, payload: Vec<u8>) -> Result<(), AdvError> {
            let (adapter, tx_power) = self.radio().await?;
            let mut manufacturer_data = BTreeMap::new();
            manufacturer_data.insert(company_id, payload);
            let advertisement = Advertisement {
                advertisement_type: Type::Peripheral,
                manufacturer_data,
                min_interval: Some(self.interval),
                max_interval: Some(self.interval),
                tx_power: Some(tx_power),
                ..Advertisement::default()
            };

            let mut current = self.current.lock().await;
            // dropping the handle unregisters the previous advertisement
            current.take();
            let handle = adapter
                .advertise(advertisement)
                .await
                .map_err(AdvError::advertise)?;
            *current = Some(handle);
            Ok(())
        }

        async fn clear(&self) {
            self.current.lock().await.take();
        }
    }
}
