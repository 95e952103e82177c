//! OSC adapter error types.

use std::net::SocketAddr;

use vibelink_domain::error::AdapterError;

/// Errors specific to the OSC adapter.
#[derive(Debug, thiserror::Error)]
pub enum OscError {
    /// The listening socket could not be bound.
    #[error("failed to bind OSC socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket read or write failed.
    #[error("OSC socket error")]
    Io(#[from] std::io::Error),

    /// The datagram is not a valid OSC packet.
    #[error("malformed OSC packet: {0}")]
    Decode(String),

    /// An OSC packet could not be serialized.
    #[error("failed to encode OSC packet: {0}")]
    Encode(String),

    /// A message has the right address but the wrong arguments.
    #[error("unexpected arguments for {addr}: {reason}")]
    Arguments { addr: String, reason: &'static str },

    /// A binding or target in the configuration is unusable.
    #[error("invalid OSC configuration for {name}: {reason}")]
    Config { name: String, reason: String },
}

impl OscError {
    pub(crate) fn decode(err: &rosc::OscError) -> Self {
        Self::Decode(format!("{err:?}"))
    }

    pub(crate) fn encode(err: &rosc::OscError) -> Self {
        Self::Encode(format!("{err:?}"))
    }

    /// Convert into an [`AdapterError`] for propagation across the port
    /// boundary.
    #[must_use]
    pub fn into_adapter(self) -> AdapterError {
        match self {
            Self::Bind { .. } | Self::Io(_) => AdapterError::transport(self),
            other => AdapterError::Protocol(other.to_string()),
        }
    }
}

impl From<OscError> for AdapterError {
    fn from(err: OscError) -> Self {
        err.into_adapter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_bind_error_with_address() {
        let err = OscError::Bind {
            addr: "127.0.0.1:9001".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.to_string(), "failed to bind OSC socket on 127.0.0.1:9001");
    }

    #[test]
    fn should_convert_socket_errors_to_retryable_transport() {
        let err: AdapterError = OscError::Io(std::io::Error::other("down")).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn should_convert_argument_errors_to_protocol() {
        let err: AdapterError = OscError::Arguments {
            addr: "/vibelink/command".into(),
            reason: "missing device id",
        }
        .into();
        assert!(matches!(err, AdapterError::Protocol(msg) if msg.contains("missing device id")));
    }
}
