//! # vibelink-adapter-osc
//!
//! OSC adapter — a UDP listener that turns Open Sound Control messages into
//! actuation commands, and a sender for OSC-controlled output targets.
//!
//! ## Inbound
//!
//! Each datagram is decoded with `rosc`; bundles are flattened. Messages
//! addressed to [`codec::COMMAND_ADDR`] carry a full command envelope. Any
//! other address is matched against the configured parameter bindings
//! (glob patterns) and remapped into an intensity. Velocity bindings are
//! also re-evaluated every `velocity_tick_ms` while their parameter is idle,
//! so the device winds down once the input stops moving. Malformed packets
//! are dropped and logged; they never stop the listener.
//!
//! ## Outbound
//!
//! - Configured targets are registered as devices owned by this adapter;
//!   routed actuations are sent to them as a single float argument.
//! - When `feedback` is set, every delivered command is mirrored as a
//!   [`codec::STATE_ADDR`] message.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `vibelink-app` and `vibelink-domain`.

pub mod codec;
mod binding;
mod config;
mod error;
pub mod speed;

pub use config::{BindingConfig, BindingMode, OscConfig, TargetConfig, TargetRange};
pub use error::OscError;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rosc::{OscMessage, OscType};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use vibelink_app::ports::{AdapterContext, Capability, ProtocolAdapter};
use vibelink_domain::channel::Channel;
use vibelink_domain::command::{Ack, AckStatus, Actuation, CommandSource};
use vibelink_domain::device::DeviceDescriptor;
use vibelink_domain::error::AdapterError;
use vibelink_domain::event::HubEvent;
use vibelink_domain::id::DeviceId;
use vibelink_domain::protocol::Protocol;

use crate::binding::BindingSet;
use crate::codec::StateUpdate;

/// Largest datagram the listener accepts.
const MAX_DATAGRAM: usize = 65_507;

const SOURCE: CommandSource = CommandSource::Adapter(Protocol::Osc);

/// OSC protocol adapter.
pub struct OscAdapter {
    config: OscConfig,
    /// Socket handed in by the caller, used by the first start.
    prebound: Option<std::net::UdpSocket>,
    /// Address of the last bound socket, reused on restart.
    local_addr: Option<SocketAddr>,
    socket: Option<Arc<UdpSocket>>,
    targets: HashMap<DeviceId, TargetConfig>,
    tasks: Vec<JoinHandle<()>>,
}

impl OscAdapter {
    #[must_use]
    pub fn new(config: OscConfig) -> Self {
        Self {
            config,
            prebound: None,
            local_addr: None,
            socket: None,
            targets: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Use an already bound socket instead of binding `config.bind`.
    #[must_use]
    pub fn with_socket(config: OscConfig, socket: std::net::UdpSocket) -> Self {
        let local_addr = socket.local_addr().ok();
        Self {
            prebound: Some(socket),
            local_addr,
            ..Self::new(config)
        }
    }

    /// Address the listener is (or was last) bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn bind(&mut self) -> Result<UdpSocket, OscError> {
        if let Some(socket) = self.prebound.take() {
            socket.set_nonblocking(true)?;
            return Ok(UdpSocket::from_std(socket)?);
        }
        let addr = self.local_addr.unwrap_or(self.config.bind);
        UdpSocket::bind(addr)
            .await
            .map_err(|source| OscError::Bind { addr, source })
    }

    async fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            // wait for the task to drop its socket handle
            let _ = task.await;
        }
    }
}

impl ProtocolAdapter for OscAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Osc
    }

    async fn probe(&self) -> Capability {
        if self.config.enabled {
            Capability::Available
        } else {
            Capability::Disabled("osc adapter disabled in configuration".into())
        }
    }

    async fn start(&mut self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.abort_tasks().await;

        let socket = Arc::new(self.bind().await?);
        let local = socket.local_addr().map_err(OscError::Io)?;
        self.local_addr = Some(local);
        tracing::info!(addr = %local, "OSC listener bound");

        self.targets.clear();
        for target in &self.config.targets {
            let descriptor = target_descriptor(target)?;
            self.targets.insert(descriptor.id.clone(), target.clone());
            ctx.discovered(descriptor).await;
        }

        let bindings = BindingSet::new(&self.config.bindings);
        let tick = Duration::from_millis(self.config.velocity_tick_ms.max(1));
        self.tasks.push(tokio::spawn(listen(
            Arc::clone(&socket),
            ctx.clone(),
            bindings,
            tick,
        )));

        if let Some(feedback) = self.config.feedback {
            self.tasks.push(tokio::spawn(mirror(
                Arc::clone(&socket),
                ctx.subscribe(),
                feedback,
            )));
            tracing::debug!(%feedback, "OSC state mirroring enabled");
        }

        if !self.targets.is_empty() {
            let devices = self.targets.keys().cloned().collect();
            let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
            self.tasks.push(tokio::spawn(keep_alive(ctx, devices, period)));
        }

        self.socket = Some(socket);
        Ok(())
    }

    async fn submit(&mut self, actuation: &Actuation) -> Result<Ack, AdapterError> {
        let target = self
            .targets
            .get(&actuation.device)
            .ok_or_else(|| AdapterError::NotOwned(actuation.device.clone()))?;
        let socket = self.socket.as_ref().ok_or(AdapterError::Unavailable)?;

        let msg = OscMessage {
            addr: target.path_for(actuation.channel.index),
            args: vec![OscType::Float(codec::to_float(actuation.value))],
        };
        let bytes = codec::encode_message(msg)?;
        socket
            .send_to(&bytes, target.address)
            .await
            .map_err(OscError::Io)?;

        tracing::trace!(
            device = %actuation.device,
            channel = actuation.channel.index,
            value = actuation.value,
            "OSC target updated"
        );
        Ok(Ack::new(actuation, AckStatus::BestEffort))
    }

    async fn stop(&mut self) {
        self.abort_tasks().await;
        self.socket = None;
        self.targets.clear();
        tracing::info!("OSC adapter stopped");
    }
}

fn target_descriptor(target: &TargetConfig) -> Result<DeviceDescriptor, OscError> {
    let invalid = |reason: String| OscError::Config {
        name: target.name.clone(),
        reason,
    };
    let range = target
        .range
        .to_channel_range()
        .map_err(|err| invalid(err.to_string()))?;
    DeviceDescriptor::builder()
        .id(target.device_id())
        .protocol(Protocol::Osc)
        .name(&target.name)
        .channels(target.channels.iter().map(|&index| Channel::vibration(index, range)))
        .build()
        .map_err(|err| invalid(err.to_string()))
}

async fn listen(
    socket: Arc<UdpSocket>,
    ctx: AdapterContext,
    mut bindings: BindingSet,
    tick: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let decays = bindings.has_velocity();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(err) => {
                        tracing::warn!(%err, "OSC receive failed");
                        ctx.fault(OscError::Io(err).into());
                        return;
                    }
                };
                let messages = match codec::decode_packet(&buf[..len]) {
                    Ok(messages) => messages,
                    Err(err) => {
                        tracing::debug!(%peer, %err, "dropping malformed OSC packet");
                        continue;
                    }
                };
                for msg in messages {
                    handle_message(&ctx, &mut bindings, &msg).await;
                }
            }
            _ = ticker.tick(), if decays => {
                for command in bindings.decay(Instant::now()) {
                    ctx.command(command).await;
                }
            }
        }
    }
}

async fn handle_message(ctx: &AdapterContext, bindings: &mut BindingSet, msg: &OscMessage) {
    if msg.addr == codec::COMMAND_ADDR {
        match codec::decode_envelope(msg) {
            Ok(envelope) => ctx.command(envelope.into_command(SOURCE)).await,
            Err(err) => tracing::debug!(%err, "dropping malformed command envelope"),
        }
        return;
    }

    let commands = bindings.commands(msg, Instant::now());
    if commands.is_empty() {
        tracing::trace!(addr = %msg.addr, "no binding for OSC address");
    }
    for command in commands {
        ctx.command(command).await;
    }
}

async fn mirror(
    socket: Arc<UdpSocket>,
    mut events: broadcast::Receiver<HubEvent>,
    feedback: SocketAddr,
) {
    loop {
        match events.recv().await {
            Ok(HubEvent::CommandDelivered {
                device,
                channel,
                intensity,
                ..
            }) => {
                let update = StateUpdate {
                    device,
                    channel,
                    intensity,
                };
                let bytes = match codec::encode_message(codec::state_message(&update)) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(%err, "failed to encode OSC state message");
                        continue;
                    }
                };
                if let Err(err) = socket.send_to(&bytes, feedback).await {
                    tracing::debug!(%err, %feedback, "OSC state mirror send failed");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "OSC state mirror lagged behind the hub bus");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn keep_alive(ctx: AdapterContext, devices: Vec<DeviceId>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for device in &devices {
            ctx.heartbeat(device.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use vibelink_app::event_bus::InProcessEventBus;
    use vibelink_app::ports::EventPublisher;
    use vibelink_domain::actuation::{ChannelRange, Intensity};
    use vibelink_domain::command::{Command, CommandEnvelope};
    use vibelink_domain::event::AdapterEvent;
    use vibelink_domain::id::CommandId;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn loopback() -> std::net::UdpSocket {
        std::net::UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    async fn started(
        config: OscConfig,
        bus: InProcessEventBus,
    ) -> (OscAdapter, mpsc::Receiver<AdapterEvent>, AdapterContext) {
        let mut adapter = OscAdapter::with_socket(config, loopback());
        let (ctx, events, _faults) = AdapterContext::standalone(Protocol::Osc, bus);
        adapter.start(ctx.clone()).await.unwrap();
        (adapter, events, ctx)
    }

    async fn next_command(events: &mut mpsc::Receiver<AdapterEvent>) -> Command {
        loop {
            let event = tokio::time::timeout(WAIT, events.recv())
                .await
                .expect("timed out waiting for an adapter event")
                .expect("event channel closed");
            if let AdapterEvent::CommandReceived { command, .. } = event {
                return command;
            }
        }
    }

    async fn send(to: SocketAddr, msg: OscMessage) {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bytes = codec::encode_message(msg).unwrap();
        client.send_to(&bytes, to).await.unwrap();
    }

    async fn receive(socket: &UdpSocket) -> OscMessage {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
        codec::decode_packet(&buf[..len]).unwrap().remove(0)
    }

    fn desk_target(address: SocketAddr) -> TargetConfig {
        TargetConfig {
            name: "desk".into(),
            address,
            path: "/motor/{channel}".into(),
            channels: vec![0],
            range: TargetRange {
                min: 0.0,
                max: 100.0,
                resolution: 1.0,
            },
        }
    }

    #[tokio::test]
    async fn should_report_disabled_when_switched_off() {
        let adapter = OscAdapter::new(OscConfig {
            enabled: false,
            ..OscConfig::default()
        });
        assert!(matches!(adapter.probe().await, Capability::Disabled(_)));
    }

    #[tokio::test]
    async fn should_forward_command_envelope() {
        let (adapter, mut events, _ctx) =
            started(OscConfig::default(), InProcessEventBus::new(16)).await;
        let envelope = CommandEnvelope {
            device_id: DeviceId::new("D1"),
            channel: 0,
            intensity: 0.5,
            duration_ms: Some(200),
        };

        send(adapter.local_addr().unwrap(), codec::envelope_message(&envelope)).await;

        let command = next_command(&mut events).await;
        assert_eq!(command.device.as_str(), "D1");
        assert!((command.intensity - 0.5).abs() < f64::EPSILON);
        assert_eq!(command.duration, Some(Duration::from_millis(200)));
        assert_eq!(command.source, SOURCE);
    }

    #[tokio::test]
    async fn should_keep_listening_after_malformed_packet() {
        let (adapter, mut events, _ctx) =
            started(OscConfig::default(), InProcessEventBus::new(16)).await;
        let addr = adapter.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"\x00garbage", addr).await.unwrap();
        let envelope = CommandEnvelope {
            device_id: DeviceId::new("D1"),
            channel: 0,
            intensity: 1.0,
            duration_ms: None,
        };
        send(addr, codec::envelope_message(&envelope)).await;

        let command = next_command(&mut events).await;
        assert!((command.intensity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn should_turn_bound_parameter_into_command() {
        let config = OscConfig {
            bindings: vec![BindingConfig::level("/avatar/parameters/Touch*", "D7", 1)],
            ..OscConfig::default()
        };
        let (adapter, mut events, _ctx) = started(config, InProcessEventBus::new(16)).await;

        send(
            adapter.local_addr().unwrap(),
            OscMessage {
                addr: "/avatar/parameters/TouchLeft".into(),
                args: vec![OscType::Float(0.25)],
            },
        )
        .await;

        let command = next_command(&mut events).await;
        assert_eq!(command.device.as_str(), "D7");
        assert_eq!(command.channel, 1);
        assert!((command.intensity - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn should_wind_down_velocity_binding_after_input_stops() {
        let mut binding = BindingConfig::level("/avatar/parameters/Stroke", "D3", 0);
        binding.mode = BindingMode::Velocity;
        binding.smoothing = 0.5;
        binding.velocity_ceiling = 1.0;
        let config = OscConfig {
            bindings: vec![binding],
            velocity_tick_ms: 10,
            ..OscConfig::default()
        };
        let (adapter, mut events, _ctx) = started(config, InProcessEventBus::new(16)).await;
        let addr = adapter.local_addr().unwrap();

        for value in [0.0, 0.5, 1.0] {
            send(
                addr,
                OscMessage {
                    addr: "/avatar/parameters/Stroke".into(),
                    args: vec![OscType::Float(value)],
                },
            )
            .await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        while next_command(&mut events).await.intensity < 0.5 {}
        loop {
            let command = next_command(&mut events).await;
            assert_eq!(command.device.as_str(), "D3");
            if command.intensity.abs() < f64::EPSILON {
                break;
            }
        }
    }

    #[tokio::test]
    async fn should_register_targets_and_send_denormalized_value() {
        let target_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = OscConfig {
            targets: vec![desk_target(target_socket.local_addr().unwrap())],
            ..OscConfig::default()
        };
        let (mut adapter, mut events, ctx) = started(config, InProcessEventBus::new(16)).await;

        let event = events.recv().await.unwrap();
        let AdapterEvent::DeviceDiscovered { descriptor, .. } = event else {
            panic!("expected a discovery, got {event:?}");
        };
        assert_eq!(descriptor.id.as_str(), "osc:desk");
        assert!(ctx.devices().contains(&descriptor.id));

        let command = Command::new("osc:desk", 0, 0.5, CommandSource::Local);
        let actuation = Actuation::new(&command, descriptor.channels[0], command.clamped_intensity());
        let ack = adapter.submit(&actuation).await.unwrap();
        assert_eq!(ack.status, AckStatus::BestEffort);

        let msg = receive(&target_socket).await;
        assert_eq!(msg.addr, "/motor/0");
        assert_eq!(msg.args, vec![OscType::Float(50.0)]);
    }

    #[tokio::test]
    async fn should_reject_submit_for_foreign_device() {
        let (mut adapter, _events, _ctx) =
            started(OscConfig::default(), InProcessEventBus::new(16)).await;
        let command = Command::new("gatt:1", 0, 0.5, CommandSource::Local);
        let actuation = Actuation::new(
            &command,
            Channel::vibration(0, ChannelRange::steps(20)),
            command.clamped_intensity(),
        );

        let err = adapter.submit(&actuation).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotOwned(id) if id.as_str() == "gatt:1"));
    }

    #[tokio::test]
    async fn should_mirror_delivered_state_to_feedback_address() {
        let feedback = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bus = InProcessEventBus::new(16);
        let config = OscConfig {
            feedback: Some(feedback.local_addr().unwrap()),
            ..OscConfig::default()
        };
        let (_adapter, _events, _ctx) = started(config, bus.clone()).await;

        bus.publish(HubEvent::CommandDelivered {
            command: CommandId::new(),
            device: DeviceId::new("D1"),
            channel: 0,
            intensity: Intensity::clamped(0.75),
        });

        let msg = receive(&feedback).await;
        let update = codec::decode_state(&msg).unwrap();
        assert_eq!(update.device.as_str(), "D1");
        assert_eq!(update.intensity, Intensity::clamped(0.75));
    }

    #[tokio::test]
    async fn should_rebind_same_address_after_restart() {
        let (mut adapter, _events, _ctx) =
            started(OscConfig::default(), InProcessEventBus::new(16)).await;
        let addr = adapter.local_addr().unwrap();

        adapter.stop().await;
        let (ctx, mut events, _faults) =
            AdapterContext::standalone(Protocol::Osc, InProcessEventBus::new(16));
        adapter.start(ctx).await.unwrap();

        assert_eq!(adapter.local_addr(), Some(addr));
        let envelope = CommandEnvelope {
            device_id: DeviceId::new("D1"),
            channel: 0,
            intensity: 0.1,
            duration_ms: None,
        };
        send(addr, codec::envelope_message(&envelope)).await;
        let command = next_command(&mut events).await;
        assert_eq!(command.device.as_str(), "D1");
    }

    #[tokio::test]
    async fn should_refuse_submit_after_stop() {
        let target_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = OscConfig {
            targets: vec![desk_target(target_socket.local_addr().unwrap())],
            ..OscConfig::default()
        };
        let (mut adapter, _events, _ctx) = started(config, InProcessEventBus::new(16)).await;
        adapter.stop().await;

        let command = Command::new("osc:desk", 0, 0.5, CommandSource::Local);
        let actuation = Actuation::new(
            &command,
            Channel::vibration(0, ChannelRange::steps(100)),
            command.clamped_intensity(),
        );
        assert!(adapter.submit(&actuation).await.is_err());
    }
}
