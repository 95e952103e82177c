//! # vibelinkd — vibelink daemon
//!
//! Composition root that wires all protocol adapters into the hub.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the tracing subscriber
//! - Start the hub core (registry, router, supervisor)
//! - Construct each protocol adapter and hand it to the supervisor
//! - Print the remote control code whenever the relay publishes one
//! - Handle graceful shutdown (SIGINT): stop every adapter before exiting
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vibelink_adapter_adv::{AdvAdapter, platform_advertiser};
use vibelink_adapter_gatt::{BtleplugLink, GattAdapter};
use vibelink_adapter_osc::OscAdapter;
use vibelink_adapter_remote::{
    DirectTunnel, NgrokTunnel, PairingCode, RemoteAdapter, RemoteConfig, TunnelKind,
    TunnelProvider,
};
use vibelink_app::hub::Hub;
use vibelink_app::ports::Capability;
use vibelink_domain::protocol::Protocol;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.filter)
                .context("invalid logging filter")?,
        )
        .init();

    let mut hub = Hub::start(&config.hub());

    let gatt = GattAdapter::new(config.gatt.clone(), BtleplugLink::new());
    report(Protocol::Gatt, hub.spawn_adapter(gatt).await);

    let adv = AdvAdapter::new(config.adv.clone(), platform_advertiser(&config.adv));
    report(Protocol::Adv, hub.spawn_adapter(adv).await);

    let osc = OscAdapter::new(config.osc.clone());
    report(Protocol::Osc, hub.spawn_adapter(osc).await);

    let pairing = match config.remote.tunnel {
        TunnelKind::Ngrok => {
            let tunnel = NgrokTunnel::new(config.remote.authtoken.clone());
            spawn_remote(&mut hub, config.remote.clone(), tunnel).await
        }
        TunnelKind::Direct => spawn_remote(&mut hub, config.remote.clone(), DirectTunnel).await,
    };
    let announcer = tokio::spawn(announce_pairing(pairing));

    tracing::info!("vibelinkd running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    announcer.abort();
    hub.shutdown().await;
    Ok(())
}

async fn spawn_remote<T>(
    hub: &mut Hub,
    config: RemoteConfig,
    tunnel: T,
) -> watch::Receiver<Option<PairingCode>>
where
    T: TunnelProvider + Sync + 'static,
{
    let remote = RemoteAdapter::new(config, tunnel);
    let pairing = remote.pairing();
    report(Protocol::Remote, hub.spawn_adapter(remote).await);
    pairing
}

fn report(protocol: Protocol, capability: Capability) {
    match capability {
        Capability::Available => tracing::info!(%protocol, "adapter started"),
        Capability::Unavailable(reason) => {
            tracing::warn!(%protocol, %reason, "adapter unavailable on this host");
        }
        Capability::Disabled(reason) => tracing::info!(%protocol, %reason, "adapter disabled"),
    }
}

/// Log every remote control code the relay publishes.
async fn announce_pairing(mut pairing: watch::Receiver<Option<PairingCode>>) {
    while pairing.changed().await.is_ok() {
        let code = pairing.borrow_and_update().as_ref().map(PairingCode::encode);
        if let Some(code) = code {
            tracing::info!(%code, "remote control code ready");
        }
    }
}
