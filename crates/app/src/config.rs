//! Tunables for the hub core.
//!
//! Every field has a documented default so the whole section is optional in
//! the daemon's TOML file. Durations are stored in milliseconds.

use std::time::Duration;

use serde::Deserialize;

use vibelink_domain::actuation::Intensity;

/// Top-level hub settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub router: RouterConfig,
    pub supervisor: SupervisorConfig,
    /// Devices silent for longer than this are dropped from the registry.
    pub heartbeat_timeout_ms: u64,
    /// How often the registry is swept for silent devices.
    pub sweep_interval_ms: u64,
    /// Capacity of the adapter → hub event queue.
    pub event_capacity: usize,
    /// Capacity of the hub event bus.
    pub bus_capacity: usize,
}

/// Command router policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Time during which later commands for the same device channel
    /// replace a pending one.
    pub coalesce_window_ms: u64,
    /// Minimum spacing between two dispatches to the same device.
    pub min_interval_ms: u64,
    /// How long a dispatched command may wait for its adapter.
    pub dispatch_timeout_ms: u64,
    /// Global ceiling applied to every clamped intensity.
    pub max_intensity: f64,
    pub queue_capacity: usize,
}

/// Adapter lifecycle policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Deadline for `start` (discovery and connection).
    pub connect_timeout_ms: u64,
    /// Deadline for a single `submit`.
    pub write_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Time spent in `Error` before returning to `Disconnected`.
    pub error_cooldown_ms: u64,
    /// How long shutdown waits for each adapter to stop.
    pub stop_timeout_ms: u64,
    /// Capacity of each adapter's submission queue.
    pub outbox_capacity: usize,
}

impl HubConfig {
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl RouterConfig {
    #[must_use]
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    #[must_use]
    pub fn max_intensity(&self) -> Intensity {
        Intensity::clamped(self.max_intensity)
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            supervisor: SupervisorConfig::default(),
            heartbeat_timeout_ms: 30_000,
            sweep_interval_ms: 5_000,
            event_capacity: 256,
            bus_capacity: 256,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 50,
            min_interval_ms: 50,
            dispatch_timeout_ms: 1_000,
            max_intensity: 1.0,
            queue_capacity: 256,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            write_timeout_ms: 750,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            error_cooldown_ms: 1_000,
            stop_timeout_ms: 5_000,
            outbox_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_use_documented_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.router.coalesce_window(), Duration::from_millis(50));
        assert_eq!(config.supervisor.backoff_max(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn should_fill_missing_fields_from_defaults() {
        let config: HubConfig = toml::from_str(
            r"
            heartbeat_timeout_ms = 10000

            [router]
            coalesce_window_ms = 120
            ",
        )
        .unwrap();
        assert_eq!(config.router.coalesce_window_ms, 120);
        assert_eq!(config.router.min_interval_ms, 50);
        assert_eq!(config.heartbeat_timeout_ms, 10_000);
        assert_eq!(config.supervisor, SupervisorConfig::default());
    }

    #[test]
    fn should_clamp_max_intensity() {
        let config = RouterConfig {
            max_intensity: 3.0,
            ..RouterConfig::default()
        };
        assert_eq!(config.max_intensity(), Intensity::FULL);
    }
}
