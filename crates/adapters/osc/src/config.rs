//! OSC adapter configuration.

use std::net::SocketAddr;

use serde::Deserialize;

use vibelink_domain::actuation::ChannelRange;

use crate::error::OscError;
use crate::speed;

/// Configuration for the OSC listener and its output targets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    pub enabled: bool,
    /// Local address of the UDP listener.
    pub bind: SocketAddr,
    /// Where delivered state is mirrored as `/vibelink/state` messages.
    /// Mirroring is off when unset.
    pub feedback: Option<SocketAddr>,
    /// How often owned OSC targets are marked alive, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How often velocity bindings are re-evaluated while their parameter
    /// is idle, in milliseconds.
    pub velocity_tick_ms: u64,
    pub bindings: Vec<BindingConfig>,
    pub targets: Vec<TargetConfig>,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 9001)),
            feedback: None,
            heartbeat_interval_ms: 10_000,
            velocity_tick_ms: 50,
            bindings: Vec::new(),
            targets: Vec::new(),
        }
    }
}

impl OscConfig {
    /// Reject bindings and targets that cannot produce a usable intensity.
    ///
    /// # Errors
    ///
    /// Returns [`OscError::Config`] naming the offending entry.
    pub fn validate(&self) -> Result<(), OscError> {
        for binding in &self.bindings {
            binding.validate()?;
        }
        for target in &self.targets {
            target.validate()?;
        }
        Ok(())
    }
}

/// How a bound parameter turns into an intensity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    /// The remapped value is the intensity.
    #[default]
    Level,
    /// The smoothed rate of change of the remapped value is the intensity.
    Velocity,
}

/// Maps OSC parameter addresses onto one device channel.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingConfig {
    /// Glob pattern over OSC addresses (`*`, `?`).
    pub address: String,
    pub device: String,
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub mode: BindingMode,
    #[serde(default)]
    pub range_start: f64,
    #[serde(default = "default_range_end")]
    pub range_end: f64,
    #[serde(default = "default_alpha")]
    pub smoothing: f64,
    #[serde(default = "default_ceiling")]
    pub velocity_ceiling: f64,
}

impl BindingConfig {
    /// A level binding over `[0, 1]`.
    #[must_use]
    pub fn level(address: impl Into<String>, device: impl Into<String>, channel: u32) -> Self {
        Self {
            address: address.into(),
            device: device.into(),
            channel,
            mode: BindingMode::Level,
            range_start: 0.0,
            range_end: default_range_end(),
            smoothing: default_alpha(),
            velocity_ceiling: default_ceiling(),
        }
    }

    #[allow(clippy::float_cmp)]
    fn validate(&self) -> Result<(), OscError> {
        let invalid = |reason: &str| OscError::Config {
            name: self.address.clone(),
            reason: reason.to_string(),
        };
        if self.address.trim().is_empty() {
            return Err(invalid("empty address pattern"));
        }
        if self.device.trim().is_empty() {
            return Err(invalid("empty device id"));
        }
        if !self.range_start.is_finite()
            || !self.range_end.is_finite()
            || self.range_start == self.range_end
        {
            return Err(invalid("input range is empty"));
        }
        if self.mode == BindingMode::Velocity && self.velocity_ceiling <= 0.0 {
            return Err(invalid("velocity ceiling must be positive"));
        }
        Ok(())
    }
}

/// An OSC endpoint driven as a device owned by the OSC adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Registered as device `osc:{name}`.
    pub name: String,
    pub address: SocketAddr,
    /// OSC address per channel; `{channel}` is replaced by the index.
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_channels")]
    pub channels: Vec<u32>,
    #[serde(default)]
    pub range: TargetRange,
}

impl TargetConfig {
    #[must_use]
    pub fn device_id(&self) -> String {
        format!("osc:{}", self.name)
    }

    #[must_use]
    pub fn path_for(&self, channel: u32) -> String {
        self.path.replace("{channel}", &channel.to_string())
    }

    fn validate(&self) -> Result<(), OscError> {
        let invalid = |reason: String| OscError::Config {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty target name".into()));
        }
        if self.channels.is_empty() {
            return Err(invalid("no channels".into()));
        }
        self.range
            .to_channel_range()
            .map(|_| ())
            .map_err(|err| invalid(err.to_string()))
    }
}

/// Value range a target expects, sent as an OSC float.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
    pub resolution: f64,
}

impl Default for TargetRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            resolution: 0.001,
        }
    }
}

impl TargetRange {
    /// # Errors
    ///
    /// Returns the domain validation error for an empty range or a
    /// non-positive resolution.
    pub fn to_channel_range(
        self,
    ) -> Result<ChannelRange, vibelink_domain::error::ValidationError> {
        ChannelRange::new(self.min, self.max, self.resolution)
    }
}

fn default_range_end() -> f64 {
    1.0
}

fn default_alpha() -> f64 {
    speed::DEFAULT_ALPHA
}

fn default_ceiling() -> f64 {
    speed::DEFAULT_CEILING
}

fn default_path() -> String {
    "/{channel}".to_string()
}

fn default_channels() -> Vec<u32> {
    vec![0]
}
