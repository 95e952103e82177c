//! Commands, the wire envelope they travel in, and their acknowledgements.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::actuation::Intensity;
use crate::channel::Channel;
use crate::id::{CommandId, DeviceId};
use crate::protocol::Protocol;
use crate::time::{self, Timestamp};

/// Where a command entered the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "protocol")]
pub enum CommandSource {
    /// Decoded by an adapter's inbound path.
    Adapter(Protocol),
    /// Submitted in-process through the hub handle.
    Local,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter(protocol) => protocol.fmt(f),
            Self::Local => f.write_str("local"),
        }
    }
}

/// An ephemeral actuation request.
///
/// `intensity` is kept as requested; it is clamped by
/// [`Command::clamped_intensity`] before anything reaches an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub device: DeviceId,
    pub channel: u32,
    pub intensity: f64,
    /// When set, the router stops the channel once this much time has passed after dispatch.
    pub duration: Option<Duration>,
    pub submitted_at: Timestamp,
    pub source: CommandSource,
}

impl Command {
    #[must_use]
    pub fn new(
        device: impl Into<DeviceId>,
        channel: u32,
        intensity: f64,
        source: CommandSource,
    ) -> Self {
        Self {
            id: CommandId::new(),
            device: device.into(),
            channel,
            intensity,
            duration: None,
            submitted_at: time::now(),
            source,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// The requested intensity clamped into `[0, 1]`.
    #[must_use]
    pub fn clamped_intensity(&self) -> Intensity {
        Intensity::clamped(self.intensity)
    }
}

/// Protocol-independent wire shape carried over the OSC and remote paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub device_id: DeviceId,
    pub channel: u32,
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u32>,
}

impl CommandEnvelope {
    /// Turn the envelope into a command stamped with `source`.
    #[must_use]
    pub fn into_command(self, source: CommandSource) -> Command {
        let command = Command::new(self.device_id, self.channel, self.intensity, source);
        match self.duration_ms {
            Some(ms) => command.with_duration(Duration::from_millis(u64::from(ms))),
            None => command,
        }
    }
}

impl From<&Command> for CommandEnvelope {
    fn from(command: &Command) -> Self {
        Self {
            device_id: command.device.clone(),
            channel: command.channel,
            intensity: command.intensity,
            duration_ms: command
                .duration
                .map(|d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX)),
        }
    }
}

/// A validated, clamped command ready for re-encoding by the owning adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Actuation {
    pub command: CommandId,
    pub device: DeviceId,
    pub channel: Channel,
    pub intensity: Intensity,
    /// `intensity` denormalized onto the channel range.
    pub value: f64,
    pub duration: Option<Duration>,
}

impl Actuation {
    #[must_use]
    pub fn new(command: &Command, channel: Channel, intensity: Intensity) -> Self {
        Self {
            command: command.id,
            device: command.device.clone(),
            channel,
            intensity,
            value: channel.to_protocol(intensity),
            duration: command.duration,
        }
    }

    /// The protocol value as a discrete level.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.channel.to_level(self.intensity)
    }
}

/// How a command ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AckStatus {
    /// The transport confirmed the write.
    Delivered,
    /// Sent without any acknowledgement from the device.
    BestEffort,
    /// Replaced by a later command for the same device channel before
    /// delivery.
    Superseded { by: CommandId },
    /// The device already had this value; nothing was sent.
    Unchanged,
}

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub command: CommandId,
    pub device: DeviceId,
    pub channel: u32,
    pub status: AckStatus,
    pub at: Timestamp,
}

impl Ack {
    #[must_use]
    pub fn new(actuation: &Actuation, status: AckStatus) -> Self {
        Self {
            command: actuation.command,
            device: actuation.device.clone(),
            channel: actuation.channel.index,
            status,
            at: time::now(),
        }
    }

    #[must_use]
    pub fn superseded(command: &Command, by: CommandId) -> Self {
        Self {
            command: command.id,
            device: command.device.clone(),
            channel: command.channel,
            status: AckStatus::Superseded { by },
            at: time::now(),
        }
    }

    /// Whether the command's value actually reached (or was broadcast to)
    /// the device.
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(
            self.status,
            AckStatus::Delivered | AckStatus::BestEffort | AckStatus::Unchanged
        )
    }
}
