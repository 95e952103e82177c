//! # vibelink-adapter-adv
//!
//! ADV adapter — drives connectionless toys by broadcasting BLE
//! advertisements.
//!
//! There is no link and no acknowledgement. While the adapter runs, the
//! configured broadcast target counts as connected: it is registered on
//! start and kept alive with periodic heartbeats. Every actuation becomes a
//! manufacturer data payload (see [`codec`]) that replaces the previous
//! advertisement; it is sent `repeat` times and acked as best effort.
//!
//! Advertising needs BlueZ, so the adapter only works on Linux builds with
//! the `bluez` feature. Everywhere else [`PlatformAdvertiser`] reports the
//! capability as unavailable and the hub carries on without it.

mod advertiser;
pub mod codec;
mod config;
mod error;

pub use advertiser::{
    Advertiser, PlatformAdvertiser, UnsupportedAdvertiser, platform_advertiser,
};
#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use advertiser::BluezAdvertiser;
pub use config::AdvConfig;
pub use error::AdvError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use vibelink_app::ports::{AdapterContext, Capability, ProtocolAdapter};
use vibelink_domain::actuation::ChannelRange;
use vibelink_domain::channel::Channel;
use vibelink_domain::command::{Ack, AckStatus, Actuation};
use vibelink_domain::device::DeviceDescriptor;
use vibelink_domain::error::AdapterError;
use vibelink_domain::id::DeviceId;
use vibelink_domain::protocol::Protocol;

/// ADV protocol adapter over an [`Advertiser`].
pub struct AdvAdapter<A> {
    config: AdvConfig,
    advertiser: Arc<A>,
    device: DeviceId,
    running: bool,
    last_level: Option<u32>,
    keep_alive: Option<JoinHandle<()>>,
}

impl<A: Advertiser> AdvAdapter<A> {
    #[must_use]
    pub fn new(config: AdvConfig, advertiser: Arc<A>) -> Self {
        let device = DeviceId::new(config.device_id.clone());
        Self {
            config,
            advertiser,
            device,
            running: false,
            last_level: None,
            keep_alive: None,
        }
    }

    fn descriptor(&self) -> Result<DeviceDescriptor, AdapterError> {
        DeviceDescriptor::builder()
            .id(self.device.clone())
            .protocol(Protocol::Adv)
            .name(&self.config.name)
            .channel(Channel::vibration(0, ChannelRange::steps(codec::MAX_LEVEL)))
            .build()
            .map_err(|err| AdapterError::Protocol(err.to_string()))
    }

    /// Broadcast `level`, `repeat` times.
    async fn broadcast(&self, level: u32) -> Result<(), AdvError> {
        let repeat = self.config.repeat.max(1);
        let pause = Duration::from_millis(self.config.repeat_interval_ms);
        let payload = codec::level_payload(level);
        for sent in 1..=repeat {
            self.advertiser
                .advertise(codec::COMPANY_ID, payload.clone())
                .await?;
            if sent < repeat {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    async fn abort_keep_alive(&mut self) {
        if let Some(task) = self.keep_alive.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl<A: Advertiser> ProtocolAdapter for AdvAdapter<A> {
    fn protocol(&self) -> Protocol {
        Protocol::Adv
    }

    fn probe(&self) -> impl Future<Output = Capability> + Send {
        let advertiser = Arc::clone(&self.advertiser);
        let enabled = self.config.enabled;
        async move {
            if !enabled {
                return Capability::Disabled("adv adapter disabled in configuration".into());
            }
            match advertiser.probe().await {
                Ok(()) => Capability::Available,
                Err(err) => Capability::Unavailable(err.to_string()),
            }
        }
    }

    async fn start(&mut self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.abort_keep_alive().await;
        let descriptor = self.descriptor()?;

        // start from a stopped motor
        self.broadcast(0).await?;
        self.last_level = Some(0);
        self.running = true;
        tracing::info!(device = %self.device, "ADV broadcast target ready");

        ctx.discovered(descriptor).await;
        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        self.keep_alive = Some(tokio::spawn(keep_alive(ctx, self.device.clone(), period)));
        Ok(())
    }

    async fn submit(&mut self, actuation: &Actuation) -> Result<Ack, AdapterError> {
        if actuation.device != self.device {
            return Err(AdapterError::NotOwned(actuation.device.clone()));
        }
        if !self.running {
            return Err(AdapterError::Unavailable);
        }

        let level = actuation.level();
        self.broadcast(level).await?;
        self.last_level = Some(level);
        tracing::trace!(device = %self.device, level, repeat = self.config.repeat, "ADV payload broadcast");
        Ok(Ack::new(actuation, AckStatus::BestEffort))
    }

    async fn stop(&mut self) {
        self.abort_keep_alive().await;
        if self.running && self.last_level.is_some_and(|level| level > 0) {
            if let Err(err) = self.broadcast(0).await {
                tracing::debug!(%err, "failed to broadcast stop before shutdown");
            }
        }
        self.advertiser.clear().await;
        self.running = false;
        self.last_level = None;
        tracing::info!("ADV adapter stopped");
    }
}

async fn keep_alive(ctx: AdapterContext, device: DeviceId, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        ctx.heartbeat(device.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use vibelink_app::event_bus::InProcessEventBus;
    use vibelink_domain::actuation::Intensity;
    use vibelink_domain::command::{Command, CommandSource};
    use vibelink_domain::event::AdapterEvent;

    use super::*;

    #[derive(Default)]
    struct FakeAdvertiser {
        unsupported: bool,
        failing: Mutex<bool>,
        sent: Mutex<Vec<(u16, Vec<u8>)>>,
        clears: Mutex<u32>,
    }

    impl FakeAdvertiser {
        fn sent(&self) -> Vec<(u16, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Advertiser for FakeAdvertiser {
        async fn probe(&self) -> Result<(), AdvError> {
            if self.unsupported {
                Err(AdvError::Unsupported)
            } else {
                Ok(())
            }
        }

        async fn advertise(&self, company_id: u16, payload: Vec<u8>) -> Result<(), AdvError> {
            if *self.failing.lock().unwrap() {
                return Err(AdvError::advertise(std::io::Error::other("controller busy")));
            }
            self.sent.lock().unwrap().push((company_id, payload));
            Ok(())
        }

        async fn clear(&self) {
            *self.clears.lock().unwrap() += 1;
        }
    }

    struct Fixture {
        adapter: AdvAdapter<FakeAdvertiser>,
        advertiser: Arc<FakeAdvertiser>,
        events: mpsc::Receiver<AdapterEvent>,
        descriptor: DeviceDescriptor,
    }

    async fn started(config: AdvConfig) -> Fixture {
        let advertiser = Arc::new(FakeAdvertiser::default());
        let mut adapter = AdvAdapter::new(config, Arc::clone(&advertiser));
        let (ctx, mut events, _faults) =
            AdapterContext::standalone(Protocol::Adv, InProcessEventBus::new(16));
        adapter.start(ctx).await.unwrap();
        let Some(AdapterEvent::DeviceDiscovered { descriptor, .. }) = events.recv().await else {
            panic!("expected the broadcast target to be registered");
        };
        Fixture {
            adapter,
            advertiser,
            events,
            descriptor,
        }
    }

    fn actuation(descriptor: &DeviceDescriptor, intensity: f64) -> Actuation {
        let command = Command::new(descriptor.id.clone(), 0, intensity, CommandSource::Local);
        Actuation::new(&command, descriptor.channels[0], Intensity::clamped(intensity))
    }

    #[tokio::test]
    async fn should_report_unavailable_when_platform_lacks_advertising() {
        let adapter = AdvAdapter::new(AdvConfig::default(), Arc::new(UnsupportedAdvertiser));
        assert!(matches!(adapter.probe().await, Capability::Unavailable(_)));
    }

    #[tokio::test]
    async fn should_report_disabled_from_configuration() {
        let config = AdvConfig {
            enabled: false,
            ..AdvConfig::default()
        };
        let adapter = AdvAdapter::new(config, Arc::new(FakeAdvertiser::default()));
        assert!(matches!(adapter.probe().await, Capability::Disabled(_)));
    }

    #[tokio::test]
    async fn should_fail_start_without_advertising_support() {
        let mut adapter = AdvAdapter::new(AdvConfig::default(), Arc::new(UnsupportedAdvertiser));
        let (ctx, _events, _faults) =
            AdapterContext::standalone(Protocol::Adv, InProcessEventBus::new(16));
        assert!(matches!(
            adapter.start(ctx).await,
            Err(AdapterError::CapabilityUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_register_target_with_eight_levels() {
        let f = started(AdvConfig::default()).await;

        assert_eq!(f.descriptor.id, DeviceId::new("adv:generic"));
        assert_eq!(f.descriptor.protocol, Protocol::Adv);
        assert!((f.descriptor.channels[0].range.max - 7.0).abs() < f64::EPSILON);
        // the stop frame sent on start
        assert!(f.advertiser.sent().iter().all(|(id, payload)| {
            *id == codec::COMPANY_ID && *payload == codec::level_payload(0)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn should_repeat_payload_and_ack_best_effort() {
        let mut f = started(AdvConfig::default()).await;
        f.advertiser.sent.lock().unwrap().clear();

        let ack = f.adapter.submit(&actuation(&f.descriptor, 1.0)).await.unwrap();

        assert_eq!(ack.status, AckStatus::BestEffort);
        let sent = f.advertiser.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(_, payload)| *payload == codec::level_payload(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_send_same_level_again() {
        let mut f = started(AdvConfig {
            repeat: 1,
            ..AdvConfig::default()
        })
        .await;
        f.advertiser.sent.lock().unwrap().clear();

        f.adapter.submit(&actuation(&f.descriptor, 0.5)).await.unwrap();
        f.adapter.submit(&actuation(&f.descriptor, 0.5)).await.unwrap();

        assert_eq!(f.advertiser.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_devices_it_does_not_own() {
        let mut f = started(AdvConfig::default()).await;
        let command = Command::new("gatt:AA", 0, 0.5, CommandSource::Local);
        let foreign = Actuation::new(
            &command,
            f.descriptor.channels[0],
            Intensity::clamped(0.5),
        );

        assert!(matches!(
            f.adapter.submit(&foreign).await,
            Err(AdapterError::NotOwned(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_surface_advertise_failure_as_retryable() {
        let mut f = started(AdvConfig::default()).await;
        *f.advertiser.failing.lock().unwrap() = true;

        let err = f
            .adapter
            .submit(&actuation(&f.descriptor, 0.5))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn should_send_heartbeats_while_running() {
        let mut f = started(AdvConfig {
            heartbeat_interval_ms: 100,
            ..AdvConfig::default()
        })
        .await;

        let event = tokio::time::timeout(Duration::from_secs(1), f.events.recv())
            .await
            .unwrap();

        assert!(matches!(
            event,
            Some(AdapterEvent::Heartbeat { device, .. }) if device == f.descriptor.id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_broadcast_stop_and_clear_on_stop() {
        let mut f = started(AdvConfig {
            repeat: 1,
            ..AdvConfig::default()
        })
        .await;
        f.adapter.submit(&actuation(&f.descriptor, 1.0)).await.unwrap();
        f.advertiser.sent.lock().unwrap().clear();

        f.adapter.stop().await;

        assert_eq!(f.advertiser.sent(), vec![(codec::COMPANY_ID, codec::level_payload(0))]);
        assert_eq!(*f.advertiser.clears.lock().unwrap(), 1);
        assert!(matches!(
            f.adapter.submit(&actuation(&f.descriptor, 1.0)).await,
            Err(AdapterError::Unavailable)
        ));
    }
}
