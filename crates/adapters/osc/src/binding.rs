//! Parameter bindings: glob-matched OSC addresses turned into commands.

use glob_match::glob_match;
use rosc::OscMessage;
use tokio::time::Instant;

use vibelink_domain::command::{Command, CommandSource};
use vibelink_domain::protocol::Protocol;

use crate::codec;
use crate::config::{BindingConfig, BindingMode};
use crate::speed::SpeedFilter;

/// Velocity intensities below this are reported as a full stop.
const SETTLED: f64 = 1e-3;

/// One configured binding and, for velocity bindings, its filter state.
#[derive(Debug)]
pub(crate) struct Binding {
    config: BindingConfig,
    filter: Option<SpeedFilter>,
    /// Last velocity intensity handed to the router.
    emitted: Option<f64>,
}

impl Binding {
    pub(crate) fn new(config: BindingConfig) -> Self {
        let filter = (config.mode == BindingMode::Velocity)
            .then(|| SpeedFilter::new(config.smoothing, config.velocity_ceiling));
        Self {
            config,
            filter,
            emitted: None,
        }
    }

    pub(crate) fn matches(&self, addr: &str) -> bool {
        glob_match(&self.config.address, addr)
    }

    /// Remap a raw parameter value from `[range_start, range_end]` onto
    /// `[0, 1]`. Reversed ranges invert the direction.
    pub(crate) fn remap(&self, value: f64) -> f64 {
        let span = self.config.range_end - self.config.range_start;
        if span == 0.0 {
            return 0.0;
        }
        ((value - self.config.range_start) / span).clamp(0.0, 1.0)
    }

    fn intensity(&mut self, value: f64, at: Instant) -> f64 {
        let remapped = self.remap(value);
        match self.filter.as_mut() {
            Some(filter) => {
                let raw = filter.intensity(remapped, at);
                let intensity = settle(filter, raw);
                self.emitted = Some(intensity);
                intensity
            }
            None => remapped,
        }
    }

    /// Decayed command for an idle velocity binding, until it has reported
    /// a full stop.
    fn decay(&mut self, at: Instant) -> Option<Command> {
        let filter = self.filter.as_mut()?;
        if self.emitted.is_none_or(|last| last <= 0.0) {
            return None;
        }
        let raw = filter.idle_intensity(at)?;
        let intensity = settle(filter, raw);
        self.emitted = Some(intensity);
        Some(self.command_for(intensity))
    }

    fn command(&mut self, value: f64, at: Instant) -> Command {
        let intensity = self.intensity(value, at);
        self.command_for(intensity)
    }

    fn command_for(&self, intensity: f64) -> Command {
        Command::new(
            self.config.device.as_str(),
            self.config.channel,
            intensity,
            CommandSource::Adapter(Protocol::Osc),
        )
    }
}

fn settle(filter: &mut SpeedFilter, intensity: f64) -> f64 {
    if intensity < SETTLED {
        filter.settle();
        0.0
    } else {
        intensity
    }
}

/// All bindings of one listener, evaluated in configuration order.
#[derive(Debug, Default)]
pub(crate) struct BindingSet {
    bindings: Vec<Binding>,
}

impl BindingSet {
    pub(crate) fn new(configs: &[BindingConfig]) -> Self {
        Self {
            bindings: configs.iter().cloned().map(Binding::new).collect(),
        }
    }

    /// Commands produced by every binding whose pattern matches the
    /// message address. Messages without a numeric first argument yield
    /// nothing.
    pub(crate) fn commands(&mut self, msg: &OscMessage, at: Instant) -> Vec<Command> {
        let mut matching = self
            .bindings
            .iter_mut()
            .filter(|b| b.matches(&msg.addr))
            .peekable();
        if matching.peek().is_none() {
            return Vec::new();
        }
        let Some(value) = codec::first_value(msg) else {
            tracing::debug!(addr = %msg.addr, "bound OSC parameter has no numeric argument");
            return Vec::new();
        };
        matching.map(|b| b.command(value, at)).collect()
    }

    pub(crate) fn has_velocity(&self) -> bool {
        self.bindings.iter().any(|b| b.filter.is_some())
    }

    /// Decayed commands for velocity bindings whose parameter stopped
    /// changing.
    pub(crate) fn decay(&mut self, at: Instant) -> Vec<Command> {
        self.bindings.iter_mut().filter_map(|b| b.decay(at)).collect()
    }
}
