//! GATT adapter configuration.

use serde::Deserialize;

use crate::profile::GattProfile;

/// Configuration for the GATT central.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    pub enabled: bool,
    /// Connect to every matching peripheral as soon as it is seen. When
    /// off, discovered peripherals are only logged.
    pub auto_connect: bool,
    /// Optional MAC address allowlist (e.g. `["C4:7C:8D:6A:12:34"]`).
    ///
    /// When empty, every peripheral advertising the profile service is
    /// accepted.
    pub device_filter: Vec<String>,
    pub connect_timeout_ms: u64,
    /// Extra attempts after a failed write before the device is reported
    /// unreachable.
    pub write_retries: u32,
    /// Deadline for a single write attempt. Retries must fit within the
    /// supervisor's per-submit deadline.
    pub write_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub profile: GattProfile,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_connect: true,
            device_filter: Vec::new(),
            connect_timeout_ms: 10_000,
            write_retries: 3,
            write_timeout_ms: 120,
            retry_delay_ms: 50,
            profile: GattProfile::default(),
        }
    }
}

impl GattConfig {
    /// Check whether the given MAC address passes the device filter.
    #[must_use]
    pub fn accepts(&self, address: &str) -> bool {
        self.device_filter.is_empty()
            || self
                .device_filter
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_everything_without_filter() {
        let config = GattConfig::default();
        assert!(config.accepts("C4:7C:8D:6A:12:34"));
    }

    #[test]
    fn should_match_filter_case_insensitively() {
        let config = GattConfig {
            device_filter: vec!["c4:7c:8d:6a:12:34".into()],
            ..GattConfig::default()
        };
        assert!(config.accepts("C4:7C:8D:6A:12:34"));
        assert!(!config.accepts("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn should_parse_partial_profile() {
        let config: GattConfig = toml::from_str(
            r#"
            auto_connect = false
            write_retries = 5

            [profile]
            max_level = 10
            "#,
        )
        .unwrap();
        assert!(!config.auto_connect);
        assert_eq!(config.write_retries, 5);
        assert_eq!(config.profile.max_level, 10);
        assert_eq!(config.profile.command_template, "Vibrate:{level};");
    }
}
