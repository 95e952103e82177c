//! ADV adapter configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvConfig {
    pub enabled: bool,
    /// Id the broadcast target is registered under.
    pub device_id: String,
    pub name: String,
    /// Times each payload is advertised. Duplicates are the only retry the
    /// protocol has.
    pub repeat: u32,
    /// Pause between duplicate sends.
    pub repeat_interval_ms: u64,
    /// Advertising interval requested from the controller.
    pub advertising_interval_ms: u64,
    /// How often the target is reported alive while the adapter runs.
    pub heartbeat_interval_ms: u64,
}

impl Default for AdvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_id: "adv:generic".to_string(),
            name: "Generic advertisement device".to_string(),
            repeat: 3,
            repeat_interval_ms: 20,
            advertising_interval_ms: 20,
            heartbeat_interval_ms: 10_000,
        }
    }
}
