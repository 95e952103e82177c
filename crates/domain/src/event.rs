//! Events flowing into the hub from adapters, and out of the hub on the bus.

use serde::{Deserialize, Serialize};

use crate::actuation::Intensity;
use crate::command::Command;
use crate::device::DeviceDescriptor;
use crate::id::{CommandId, DeviceId, SessionId};
use crate::protocol::Protocol;
use crate::session::ConnectionState;

/// Inbound event reported by an adapter session.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    DeviceDiscovered {
        session: SessionId,
        descriptor: DeviceDescriptor,
    },
    DeviceLost {
        session: SessionId,
        device: DeviceId,
    },
    /// Writes kept failing; the session stays up.
    DeviceUnreachable {
        session: SessionId,
        device: DeviceId,
    },
    /// Any sign of life from a device (notification, advertisement, ...).
    Heartbeat {
        session: SessionId,
        device: DeviceId,
    },
    CommandReceived {
        session: SessionId,
        command: Command,
    },
    StateChanged {
        session: SessionId,
        protocol: Protocol,
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl AdapterEvent {
    /// Session that reported the event.
    #[must_use]
    pub fn session(&self) -> SessionId {
        match self {
            Self::DeviceDiscovered { session, .. }
            | Self::DeviceLost { session, .. }
            | Self::DeviceUnreachable { session, .. }
            | Self::Heartbeat { session, .. }
            | Self::CommandReceived { session, .. }
            | Self::StateChanged { session, .. } => *session,
        }
    }
}

/// Why a device left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The owning adapter reported a disconnect.
    Lost,
    /// No heartbeat within the configured window.
    Expired,
    /// The owning session stopped or failed.
    SessionClosed,
}

/// Outbound notification published on the hub event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum HubEvent {
    DeviceRegistered {
        device: DeviceId,
        protocol: Protocol,
        session: SessionId,
    },
    DeviceRemoved {
        device: DeviceId,
        reason: RemovalReason,
    },
    DeviceUnreachable {
        device: DeviceId,
    },
    CommandDelivered {
        command: CommandId,
        device: DeviceId,
        channel: u32,
        intensity: Intensity,
    },
    SessionStateChanged {
        session: SessionId,
        protocol: Protocol,
        from: ConnectionState,
        to: ConnectionState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSource;

    #[test]
    fn should_expose_reporting_session() {
        let session = SessionId::new();
        let event = AdapterEvent::CommandReceived {
            session,
            command: Command::new("D1", 0, 0.3, CommandSource::Adapter(Protocol::Osc)),
        };
        assert_eq!(event.session(), session);
    }

    #[test]
    fn should_serialize_hub_event_with_type_tag() {
        let event = HubEvent::DeviceRemoved {
            device: DeviceId::new("D1"),
            reason: RemovalReason::Expired,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "device_removed");
        assert_eq!(json["reason"], "expired");
    }
}
