//! GATT adapter error types.

use std::time::Duration;

use vibelink_domain::error::AdapterError;

/// Errors specific to the GATT adapter.
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// A btleplug operation failed.
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),

    /// The connected peripheral does not expose a required characteristic.
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: uuid::Uuid },

    /// No peripheral with this address is known to the central.
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),

    /// The platform scan stream ended while the session was running.
    #[error("BLE scan stopped unexpectedly")]
    ScanEnded,

    /// A connect or write attempt did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl GattError {
    /// Convert into an [`AdapterError`] for propagation across the port
    /// boundary.
    #[must_use]
    pub fn into_adapter(self) -> AdapterError {
        match self {
            Self::NotAvailable => AdapterError::CapabilityUnavailable(self.to_string()),
            Self::Timeout(after) => AdapterError::Timeout(after),
            Self::CharacteristicNotFound { .. } => AdapterError::Protocol(self.to_string()),
            other => AdapterError::transport(other),
        }
    }
}

impl From<GattError> for AdapterError {
    fn from(err: GattError) -> Self {
        err.into_adapter()
    }
}
