//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `vibelink.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::net::SocketAddr;

use serde::Deserialize;

use vibelink_adapter_adv::AdvConfig;
use vibelink_adapter_gatt::GattConfig;
use vibelink_adapter_osc::{OscConfig, OscError};
use vibelink_adapter_remote::RemoteConfig;
use vibelink_app::config::{HubConfig, RouterConfig, SupervisorConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    /// Coalescing and dispatch policy.
    pub router: RouterConfig,
    /// Adapter restart and shutdown policy.
    pub supervisor: SupervisorConfig,
    /// Registry liveness and queue sizes.
    pub hub: HubSection,
    pub gatt: GattConfig,
    pub adv: AdvConfig,
    pub osc: OscConfig,
    pub remote: RemoteConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// The `[hub]` section: everything in [`HubConfig`] that is not router or
/// supervisor policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub heartbeat_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub event_capacity: usize,
    pub bus_capacity: usize,
}

impl Config {
    /// Load configuration from `vibelink.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("vibelink.toml")?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("VIBELINK_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("VIBELINK_OSC_BIND") {
            match val.parse::<SocketAddr>() {
                Ok(addr) => self.osc.bind = addr,
                Err(_) => eprintln!("ignoring invalid VIBELINK_OSC_BIND={val}"),
            }
        }
        if let Some(token) = var("VIBELINK_NGROK_TOKEN").or_else(|| var("NGROK_AUTHTOKEN")) {
            self.remote.authtoken = Some(token);
        }
        if let Some(val) = var("VIBELINK_MAX_INTENSITY") {
            match val.parse::<f64>() {
                Ok(max) => self.router.max_intensity = max,
                Err(_) => eprintln!("ignoring invalid VIBELINK_MAX_INTENSITY={val}"),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.router.coalesce_window_ms == 0 {
            return Err(ConfigError::Validation(
                "router.coalesce_window_ms must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.max_intensity) {
            return Err(ConfigError::Validation(format!(
                "router.max_intensity must be within [0, 1], got {}",
                self.router.max_intensity
            )));
        }
        if self.supervisor.backoff_max_ms < self.supervisor.backoff_initial_ms {
            return Err(ConfigError::Validation(
                "supervisor.backoff_max_ms must not be smaller than backoff_initial_ms"
                    .to_string(),
            ));
        }
        self.osc.validate()?;
        Ok(())
    }

    /// Assemble the hub core configuration.
    #[must_use]
    pub fn hub(&self) -> HubConfig {
        HubConfig {
            router: self.router.clone(),
            supervisor: self.supervisor.clone(),
            heartbeat_timeout_ms: self.hub.heartbeat_timeout_ms,
            sweep_interval_ms: self.hub.sweep_interval_ms,
            event_capacity: self.hub.event_capacity,
            bus_capacity: self.hub.bus_capacity,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "vibelinkd=info,vibelink=info".to_string(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        let core = HubConfig::default();
        Self {
            heartbeat_timeout_ms: core.heartbeat_timeout_ms,
            sweep_interval_ms: core.sweep_interval_ms,
            event_capacity: core.event_capacity,
            bus_capacity: core.bus_capacity,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// Invalid OSC binding or target.
    #[error("invalid osc configuration")]
    Osc(#[from] OscError),
}
