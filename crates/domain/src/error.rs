//! Error taxonomy used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! Adapter crates convert their private error enums into [`AdapterError`]
//! at the port boundary; only [`RoutingError`]s ever reach a command
//! submitter.

use std::time::Duration;

use crate::id::DeviceId;
use crate::session::ConnectionState;

/// Boxed third-party error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("routing error")]
    Routing(#[from] RoutingError),

    #[error("adapter error")]
    Adapter(#[from] AdapterError),

    #[error("invalid session transition")]
    Transition(#[from] TransitionError),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("device must declare at least one channel")]
    NoChannels,

    #[error("channel index {0} is declared more than once")]
    DuplicateChannel(u32),

    #[error("channel range [{min}, {max}] is empty")]
    EmptyRange { min: f64, max: f64 },

    #[error("channel resolution {0} must be positive and finite")]
    InvalidResolution(f64),
}

/// Rejections and failures observable by whoever submitted a command.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("channel {channel} does not exist on device {device}")]
    ChannelOutOfRange { device: DeviceId, channel: u32 },

    #[error("adapter owning device {0} is unavailable")]
    AdapterUnavailable(DeviceId),

    #[error("device {0} became unavailable before delivery")]
    DeviceUnavailable(DeviceId),

    #[error("delivery to device {device} failed")]
    DeliveryFailed {
        device: DeviceId,
        #[source]
        source: AdapterError,
    },

    #[error("delivery to device {device} timed out after {after:?}")]
    Timeout { device: DeviceId, after: Duration },

    #[error("hub is shutting down")]
    HubStopped,
}

/// Faults raised inside a protocol adapter.
///
/// These never escalate past the adapter boundary on their own: the
/// supervisor handles retryable ones, the router wraps the rest into
/// [`RoutingError::DeliveryFailed`].
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Radio or network failure, retried with backoff.
    #[error("transport failure")]
    Transport(#[source] BoxError),

    /// Malformed message on the wire, dropped and logged.
    #[error("malformed message: {0}")]
    Protocol(String),

    /// The platform lacks a transport this adapter needs.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A connect or write deadline expired.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The adapter is stopped or stopping.
    #[error("adapter unavailable")]
    Unavailable,

    /// The adapter was asked to actuate a device it does not own.
    #[error("device {0} is not owned by this adapter")]
    NotOwned(DeviceId),
}

impl AdapterError {
    /// Wrap any error as a transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Whether the failure is worth retrying (transport faults and timeouts).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// A session attempted a transition its state machine forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_unknown_device() {
        let err = RoutingError::UnknownDevice(DeviceId::new("D2"));
        assert_eq!(err.to_string(), "unknown device D2");
    }

    #[test]
    fn should_display_channel_out_of_range() {
        let err = RoutingError::ChannelOutOfRange {
            device: DeviceId::new("D1"),
            channel: 4,
        };
        assert_eq!(err.to_string(), "channel 4 does not exist on device D1");
    }

    #[test]
    fn should_classify_transport_and_timeout_as_retryable() {
        let io = std::io::Error::other("radio off");
        assert!(AdapterError::transport(io).is_retryable());
        assert!(AdapterError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!AdapterError::Protocol("bad".into()).is_retryable());
        assert!(!AdapterError::Unavailable.is_retryable());
    }

    #[test]
    fn should_convert_routing_error_into_hub_error() {
        let err: HubError = RoutingError::HubStopped.into();
        assert!(matches!(err, HubError::Routing(RoutingError::HubStopped)));
    }

    #[test]
    fn should_display_transition_error() {
        let err = TransitionError {
            from: ConnectionState::Error,
            to: ConnectionState::Connected,
        };
        assert_eq!(err.to_string(), "cannot transition from error to connected");
    }
}
