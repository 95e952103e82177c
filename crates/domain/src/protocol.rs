//! Protocol variants a device or session can belong to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The transport family an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Connection-oriented BLE GATT writes.
    Gatt,
    /// Connectionless BLE advertisement broadcast.
    Adv,
    /// Open Sound Control over UDP.
    Osc,
    /// Tunnelled remote control.
    Remote,
}

impl Protocol {
    /// All variants, in startup order.
    pub const ALL: [Self; 4] = [Self::Gatt, Self::Adv, Self::Osc, Self::Remote];

    /// Short lowercase name used in logs and config keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gatt => "gatt",
            Self::Adv => "adv",
            Self::Osc => "osc",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
