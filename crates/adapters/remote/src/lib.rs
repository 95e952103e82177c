//! # vibelink-adapter-remote
//!
//! Remote adapter — carries the OSC command path over a long-lived TCP relay
//! exposed through a tunnel, so a remote application drives devices with the
//! same envelope semantics as a local OSC sender.
//!
//! ## Session
//!
//! 1. Bind a local TCP listener.
//! 2. Open the tunnel ([`TunnelProvider`]) and publish a [`PairingCode`].
//! 3. Each connecting peer must send the 36-byte pairing token first; any
//!    other first frame closes the connection.
//! 4. Paired peers send length-prefixed OSC packets
//!    (`/vibelink/command`); delivered state is mirrored back as
//!    `/vibelink/state`.
//!
//! Without an auth token the ngrok tunnel reports the adapter as disabled.
//! A tunnel that cannot be opened fails `start`, which the supervisor
//! retries with backoff.
//!
//! The relay owns no devices; [`ProtocolAdapter::submit`] is always
//! rejected.

mod config;
mod error;
pub mod frame;
pub mod pairing;
mod sender;
pub mod tunnel;

pub use config::{RemoteConfig, TunnelKind};
pub use error::RemoteError;
pub use pairing::PairingCode;
pub use sender::RemoteSender;
#[cfg(feature = "ngrok")]
pub use tunnel::NgrokTunnel;
pub use tunnel::{DirectTunnel, TunnelProvider};

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt as _;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use vibelink_adapter_osc::codec::{self, StateUpdate};
use vibelink_app::ports::{AdapterContext, Capability, ProtocolAdapter};
use vibelink_domain::command::{Ack, Actuation, CommandSource};
use vibelink_domain::error::AdapterError;
use vibelink_domain::event::HubEvent;
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

use crate::pairing::TOKEN_LEN;

const SOURCE: CommandSource = CommandSource::Adapter(Protocol::Remote);

/// Remote relay adapter over a [`TunnelProvider`].
pub struct RemoteAdapter<T> {
    config: RemoteConfig,
    tunnel: T,
    pairing: watch::Sender<Option<PairingCode>>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl<T: TunnelProvider> RemoteAdapter<T> {
    #[must_use]
    pub fn new(config: RemoteConfig, tunnel: T) -> Self {
        let (pairing, _) = watch::channel(None);
        Self {
            config,
            tunnel,
            pairing,
            local_addr: None,
            accept_task: None,
        }
    }

    /// Follow the current pairing code. `None` while the relay is down.
    #[must_use]
    pub fn pairing(&self) -> watch::Receiver<Option<PairingCode>> {
        self.pairing.subscribe()
    }

    /// Address of the local relay listener while started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn abort_accept(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl<T: TunnelProvider> ProtocolAdapter for RemoteAdapter<T> {
    fn protocol(&self) -> Protocol {
        Protocol::Remote
    }

    fn probe(&self) -> impl Future<Output = Capability> + Send {
        let capability = if self.config.enabled {
            match self.tunnel.ready() {
                Ok(()) => Capability::Available,
                Err(reason) => Capability::Disabled(reason),
            }
        } else {
            Capability::Disabled("remote adapter disabled in configuration".into())
        };
        std::future::ready(capability)
    }

    async fn start(&mut self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.abort_accept().await;

        let addr = self.config.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RemoteError::Bind { addr, source })?;
        let local = listener.local_addr().map_err(RemoteError::Io)?;

        if let Err(err) = ctx.set_state(ConnectionState::Connecting).await {
            tracing::debug!(%err, "remote session skipped connecting state");
        }
        let url = self.tunnel.open(local).await.inspect_err(|err| {
            tracing::warn!(tunnel = self.tunnel.name(), %err, "failed to open tunnel");
        })?;

        let code = PairingCode::generate(url);
        tracing::info!(
            tunnel = self.tunnel.name(),
            url = %code.url,
            code = %code.encode(),
            "remote relay ready"
        );

        let peer = PeerConfig {
            token: code.token.clone(),
            pairing_timeout: Duration::from_millis(self.config.pairing_timeout_ms),
            max_frame_len: self.config.max_frame_len,
            mirror_state: self.config.mirror_state,
        };
        self.accept_task = Some(tokio::spawn(accept(listener, ctx, peer)));
        self.local_addr = Some(local);
        self.pairing.send_replace(Some(code));
        Ok(())
    }

    async fn submit(&mut self, actuation: &Actuation) -> Result<Ack, AdapterError> {
        Err(AdapterError::NotOwned(actuation.device.clone()))
    }

    async fn stop(&mut self) {
        self.abort_accept().await;
        self.tunnel.close().await;
        self.local_addr = None;
        self.pairing.send_replace(None);
        tracing::info!("remote relay stopped");
    }
}

#[derive(Debug, Clone)]
struct PeerConfig {
    token: String,
    pairing_timeout: Duration,
    max_frame_len: usize,
    mirror_state: bool,
}

async fn accept(listener: TcpListener, ctx: AdapterContext, peer: PeerConfig) {
    // dropping the set on abort closes every peer connection
    let mut peers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "remote peer connected");
                    peers.spawn(serve_peer(stream, addr, ctx.clone(), peer.clone()));
                }
                Err(err) => {
                    tracing::warn!(%err, "remote accept failed");
                    ctx.fault(RemoteError::Io(err).into());
                    return;
                }
            },
            Some(_) = peers.join_next(), if !peers.is_empty() => {}
        }
    }
}

async fn serve_peer(stream: TcpStream, addr: SocketAddr, ctx: AdapterContext, peer: PeerConfig) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%addr, %err, "failed to disable nagle on remote peer");
    }
    let (mut reader, writer) = stream.into_split();

    if let Err(err) = pair(&mut reader, &peer).await {
        tracing::warn!(%addr, %err, "unauthenticated remote peer, closing connection");
        return;
    }
    tracing::info!(%addr, "remote peer paired");

    // subscribe before serving so no delivery between pairing and mirroring is lost
    let events = ctx.subscribe();
    let inbound = read_commands(reader, &ctx, peer.max_frame_len, addr);
    let outbound = async {
        if peer.mirror_state {
            mirror(writer, events).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        () = inbound => {}
        () = outbound => {}
    }
    tracing::info!(%addr, "remote peer disconnected");
}

async fn pair(reader: &mut OwnedReadHalf, peer: &PeerConfig) -> Result<(), RemoteError> {
    let mut token = [0u8; TOKEN_LEN];
    match tokio::time::timeout(peer.pairing_timeout, reader.read_exact(&mut token)).await {
        Ok(Ok(_)) if token == peer.token.as_bytes() => Ok(()),
        Ok(Err(err)) => Err(RemoteError::Io(err)),
        Ok(Ok(_)) | Err(_) => Err(RemoteError::PairingRejected),
    }
}

async fn read_commands(
    mut reader: OwnedReadHalf,
    ctx: &AdapterContext,
    max_frame_len: usize,
    addr: SocketAddr,
) {
    loop {
        let bytes = match frame::read_frame(&mut reader, max_frame_len).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(%addr, %err, "closing remote peer on broken frame");
                return;
            }
        };
        let messages = match codec::decode_packet(&bytes) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::debug!(%addr, %err, "dropping malformed remote frame");
                continue;
            }
        };
        for msg in messages {
            if msg.addr != codec::COMMAND_ADDR {
                tracing::debug!(%addr, osc_addr = %msg.addr, "ignoring non-command remote message");
                continue;
            }
            match codec::decode_envelope(&msg) {
                Ok(envelope) => ctx.command(envelope.into_command(SOURCE)).await,
                Err(err) => tracing::debug!(%addr, %err, "dropping malformed command envelope"),
            }
        }
    }
}

async fn mirror(mut writer: OwnedWriteHalf, mut events: broadcast::Receiver<HubEvent>) {
    loop {
        let update = match events.recv().await {
            Ok(HubEvent::CommandDelivered {
                device,
                channel,
                intensity,
                ..
            }) => StateUpdate {
                device,
                channel,
                intensity,
            },
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "remote state mirror lagged behind the hub bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let bytes = match codec::encode_message(codec::state_message(&update)) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, "failed to encode remote state frame");
                continue;
            }
        };
        if let Err(err) = frame::write_frame(&mut writer, &bytes).await {
            tracing::debug!(%err, "remote state mirror write failed");
            return;
        }
    }
}
