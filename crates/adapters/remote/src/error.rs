//! Remote adapter error types.

use std::net::SocketAddr;

use vibelink_adapter_osc::OscError;
use vibelink_domain::error::{AdapterError, BoxError};

/// Errors specific to the remote relay.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The local relay listener could not be bound.
    #[error("failed to bind remote listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Stream read or write failed.
    #[error("remote stream error")]
    Io(#[from] std::io::Error),

    /// The tunnel provider could not expose the listener.
    #[error("tunnel unavailable")]
    Tunnel(#[source] BoxError),

    /// No auth token was configured for the tunnel provider.
    #[error("no tunnel auth token configured")]
    MissingToken,

    /// A remote control code could not be decoded.
    #[error("invalid remote control code: {0}")]
    InvalidCode(String),

    /// A length prefix exceeds the accepted frame size.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer closed the connection before pairing completed.
    #[error("pairing rejected")]
    PairingRejected,

    /// A frame carried an invalid OSC payload.
    #[error("invalid OSC payload")]
    Osc(#[from] OscError),
}

impl RemoteError {
    pub fn tunnel(err: impl Into<BoxError>) -> Self {
        Self::Tunnel(err.into())
    }

    /// Convert into an [`AdapterError`] for propagation across the port
    /// boundary.
    #[must_use]
    pub fn into_adapter(self) -> AdapterError {
        match self {
            Self::Bind { .. } | Self::Io(_) | Self::Tunnel(_) => AdapterError::transport(self),
            Self::MissingToken => AdapterError::CapabilityUnavailable(self.to_string()),
            other => AdapterError::Protocol(other.to_string()),
        }
    }
}

impl From<RemoteError> for AdapterError {
    fn from(err: RemoteError) -> Self {
        err.into_adapter()
    }
}
