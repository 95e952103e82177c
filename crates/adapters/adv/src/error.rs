//! ADV adapter error types.

use vibelink_domain::error::{AdapterError, BoxError};

/// Errors specific to the ADV adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdvError {
    /// Advertising is not implemented on this platform.
    #[error("BLE advertising is only supported on Linux with BlueZ")]
    Unsupported,

    /// BlueZ is reachable but has no usable adapter.
    #[error("no Bluetooth adapter available: {0}")]
    NoAdapter(String),

    /// Registering the advertisement failed.
    #[error("failed to advertise payload")]
    Advertise(#[source] BoxError),
}

impl AdvError {
    pub(crate) fn advertise(err: impl Into<BoxError>) -> Self {
        Self::Advertise(err.into())
    }

    /// Convert into an [`AdapterError`] for propagation across the port
    /// boundary.
    #[must_use]
    pub fn into_adapter(self) -> AdapterError {
        match self {
            Self::Unsupported | Self::NoAdapter(_) => {
                AdapterError::CapabilityUnavailable(self.to_string())
            }
            Self::Advertise(_) => AdapterError::transport(self),
        }
    }
}

impl From<AdvError> for AdapterError {
    fn from(err: AdvError) -> Self {
        err.into_adapter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_report_unsupported_as_capability_gap() {
        let err: AdapterError = AdvError::Unsupported.into();
        assert!(matches!(err, AdapterError::CapabilityUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn should_report_advertise_failure_as_retryable() {
        let io = std::io::Error::other("busy");
        let err: AdapterError = AdvError::advertise(io).into();
        assert!(err.is_retryable());
    }
}
