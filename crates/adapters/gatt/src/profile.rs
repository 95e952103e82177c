//! Device profile: which GATT service to look for and how a level is
//! written.
//!
//! The default profile targets Lovense-style toys: a single vibration
//! channel with levels `0..=20`, driven by ASCII commands such as
//! `Vibrate:10;` written to the TX characteristic.

use serde::Deserialize;
use uuid::Uuid;

use vibelink_domain::actuation::ChannelRange;
use vibelink_domain::channel::Channel;

/// Primary service advertised by the default profile.
pub const LOVENSE_SERVICE: Uuid = Uuid::from_u128(0x455a_0001_0023_4bd4_bbd5_a692_0e4c_5653);

/// Write (TX) characteristic.
pub const LOVENSE_TX: Uuid = Uuid::from_u128(0x455a_0002_0023_4bd4_bbd5_a692_0e4c_5653);

/// Notify (RX) characteristic.
pub const LOVENSE_RX: Uuid = Uuid::from_u128(0x455a_0003_0023_4bd4_bbd5_a692_0e4c_5653);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GattProfile {
    pub service: Uuid,
    pub write_characteristic: Uuid,
    /// Notifications on this characteristic count as heartbeats.
    pub notify_characteristic: Option<Uuid>,
    pub max_level: u32,
    /// `{level}` is replaced by the denormalized level.
    pub command_template: String,
    /// Use acknowledged writes; acks then report `Delivered` instead of
    /// `BestEffort`.
    pub write_with_response: bool,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: LOVENSE_SERVICE,
            write_characteristic: LOVENSE_TX,
            notify_characteristic: Some(LOVENSE_RX),
            max_level: 20,
            command_template: "Vibrate:{level};".to_string(),
            write_with_response: false,
        }
    }
}

impl GattProfile {
    /// Channels exposed by every device of this profile.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        vec![Channel::vibration(0, ChannelRange::steps(self.max_level))]
    }

    /// Bytes written for `level`, saturated at `max_level`.
    #[must_use]
    pub fn encode(&self, level: u32) -> Vec<u8> {
        self.command_template
            .replace("{level}", &level.min(self.max_level).to_string())
            .into_bytes()
    }
}
