//! Channel — one independently addressable actuation output on a device.

use serde::{Deserialize, Serialize};

use crate::actuation::{ActuationKind, ChannelRange, Intensity};
use crate::error::ValidationError;

/// An actuation output. Immutable once its device is registered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    #[serde(default)]
    pub kind: ActuationKind,
    pub range: ChannelRange,
}

impl Channel {
    /// A vibration channel with the given range.
    #[must_use]
    pub fn vibration(index: u32, range: ChannelRange) -> Self {
        Self {
            index,
            kind: ActuationKind::Vibration,
            range,
        }
    }

    /// Convert an intensity to this channel's protocol value.
    #[must_use]
    pub fn to_protocol(&self, intensity: Intensity) -> f64 {
        self.range.denormalize(intensity)
    }

    /// Convert an intensity to this channel's discrete protocol level.
    #[must_use]
    pub fn to_level(&self, intensity: Intensity) -> u32 {
        self.range.denormalize_level(intensity)
    }

    /// Check the channel invariants.
    ///
    /// # Errors
    ///
    /// Returns the range's [`ValidationError`] when the range is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.range.validate()
    }
}
