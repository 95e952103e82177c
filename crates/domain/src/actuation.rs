//! Actuation model — the protocol-independent command vocabulary.
//!
//! An [`Intensity`] is always an absolute fraction of a channel's declared
//! [`ChannelRange`], never a raw protocol unit. Adapters convert with
//! [`normalize`] and [`denormalize`], which are pure and total.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind of physical output a channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuationKind {
    #[default]
    Vibration,
    Rotation,
    Linear,
}

impl fmt::Display for ActuationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vibration => f.write_str("vibration"),
            Self::Rotation => f.write_str("rotation"),
            Self::Linear => f.write_str("linear"),
        }
    }
}

/// A normalized intensity, always within `[0.0, 1.0]`.
///
/// The only constructor clamps, so no value of this type can be out of range.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Intensity(f64);

impl Intensity {
    /// Actuator off.
    pub const ZERO: Self = Self(0.0);
    /// Actuator at the top of its range.
    pub const FULL: Self = Self(1.0);

    /// Clamp an arbitrary fraction into `[0.0, 1.0]`. `NaN` maps to zero.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// The fraction as a float.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Scale by another fraction (e.g. a global maximum intensity).
    #[must_use]
    pub fn scale(self, factor: Self) -> Self {
        Self(self.0 * factor.0)
    }

    /// Whether the intensity switches the actuator off.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl From<f64> for Intensity {
    fn from(value: f64) -> Self {
        Self::clamped(value)
    }
}

impl From<Intensity> for f64 {
    fn from(value: Intensity) -> Self {
        value.0
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Declared value range of a channel, in protocol units.
///
/// `resolution` is the smallest step the device distinguishes; denormalized
/// values are snapped to the `min + k * resolution` grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub min: f64,
    pub max: f64,
    pub resolution: f64,
}

impl ChannelRange {
    /// Build a validated range.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyRange`] when `max <= min` and
    /// [`ValidationError::InvalidResolution`] when `resolution` is not a
    /// positive finite number.
    pub fn new(min: f64, max: f64, resolution: f64) -> Result<Self, ValidationError> {
        let range = Self {
            min,
            max,
            resolution,
        };
        range.validate()?;
        Ok(range)
    }

    /// Integer range `[0, max]` with unit steps, the common shape of
    /// level-based toys.
    #[must_use]
    pub fn steps(max: u32) -> Self {
        Self {
            min: 0.0,
            max: f64::from(max),
            resolution: 1.0,
        }
    }

    /// Check the range invariants.
    ///
    /// # Errors
    ///
    /// See [`ChannelRange::new`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.max <= self.min {
            return Err(ValidationError::EmptyRange {
                min: self.min,
                max: self.max,
            });
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(ValidationError::InvalidResolution(self.resolution));
        }
        Ok(())
    }

    fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Map a protocol value onto `[0, 1]`. Values outside the range clamp.
    #[must_use]
    pub fn normalize(&self, value: f64) -> Intensity {
        let span = self.span();
        if !(span.is_finite() && span > 0.0) {
            return Intensity::ZERO;
        }
        Intensity::clamped((value - self.min) / span)
    }

    /// Map an intensity back onto the protocol grid. Saturates at the range
    /// bounds; never fails.
    #[must_use]
    pub fn denormalize(&self, intensity: Intensity) -> f64 {
        let span = self.span();
        if !(span.is_finite() && span > 0.0) {
            return self.min;
        }
        let offset = intensity.value() * span;
        let snapped = if self.resolution.is_finite() && self.resolution > 0.0 {
            (offset / self.resolution).round() * self.resolution
        } else {
            offset
        };
        (self.min + snapped).clamp(self.min, self.max)
    }

    /// [`denormalize`](Self::denormalize) rounded to a non-negative integer,
    /// for protocols that speak in discrete levels.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn denormalize_level(&self, intensity: Intensity) -> u32 {
        let value = self.denormalize(intensity).round();
        if value <= 0.0 {
            0
        } else if value >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            value as u32
        }
    }
}

impl Default for ChannelRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            resolution: 0.001,
        }
    }
}

/// Map a protocol value onto a normalized intensity.
#[must_use]
pub fn normalize(protocol_value: f64, range: &ChannelRange) -> Intensity {
    range.normalize(protocol_value)
}

/// Map a (possibly out-of-range) intensity onto a protocol value, saturating.
#[must_use]
pub fn denormalize(intensity: f64, range: &ChannelRange) -> f64 {
    range.denormalize(Intensity::clamped(intensity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_range() -> ChannelRange {
        ChannelRange::steps(20)
    }

    #[test]
    fn should_map_half_intensity_to_midpoint() {
        assert!((denormalize(0.5, &toy_range()) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_saturate_when_intensity_above_one() {
        assert!((denormalize(1.5, &toy_range()) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_saturate_when_intensity_below_zero() {
        assert!(denormalize(-0.3, &toy_range()).abs() < f64::EPSILON);
    }

    #[test]
    fn should_treat_nan_as_zero() {
        assert_eq!(Intensity::clamped(f64::NAN), Intensity::ZERO);
        assert!(denormalize(f64::NAN, &toy_range()).abs() < f64::EPSILON);
    }

    #[test]
    fn should_clamp_normalized_values_outside_range() {
        assert_eq!(normalize(35.0, &toy_range()), Intensity::FULL);
        assert_eq!(normalize(-4.0, &toy_range()), Intensity::ZERO);
    }

    #[test]
    fn should_roundtrip_every_integer_level() {
        let range = toy_range();
        for level in 0..=20 {
            let x = f64::from(level);
            let back = denormalize(normalize(x, &range).value(), &range);
            assert!((back - x).abs() < f64::EPSILON, "level {level} came back as {back}");
        }
    }

    #[test]
    fn should_roundtrip_within_resolution_on_fractional_grid() {
        let range = ChannelRange::new(-1.0, 1.0, 0.25).unwrap();
        for step in 0..=8 {
            let x = -1.0 + f64::from(step) * 0.25;
            let back = denormalize(normalize(x, &range).value(), &range);
            assert!((back - x).abs() <= range.resolution / 2.0);
        }
    }

    #[test]
    fn should_snap_to_nearest_step() {
        let range = ChannelRange::steps(7);
        assert_eq!(range.denormalize_level(Intensity::clamped(0.5)), 4);
        assert_eq!(range.denormalize_level(Intensity::clamped(0.07)), 0);
        assert_eq!(range.denormalize_level(Intensity::FULL), 7);
    }

    #[test]
    fn should_reject_empty_range() {
        assert!(matches!(
            ChannelRange::new(5.0, 5.0, 1.0),
            Err(ValidationError::EmptyRange { .. })
        ));
    }

    #[test]
    fn should_reject_non_positive_resolution() {
        assert!(matches!(
            ChannelRange::new(0.0, 1.0, 0.0),
            Err(ValidationError::InvalidResolution(_))
        ));
    }

    #[test]
    fn should_stay_total_on_degenerate_range() {
        let range = ChannelRange {
            min: 3.0,
            max: 3.0,
            resolution: 1.0,
        };
        assert_eq!(range.normalize(3.0), Intensity::ZERO);
        assert!((range.denormalize(Intensity::FULL) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_scale_by_fraction() {
        let scaled = Intensity::clamped(0.8).scale(Intensity::clamped(0.5));
        assert!((scaled.value() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn should_clamp_when_deserializing_intensity() {
        let parsed: Intensity = serde_json::from_str("1.7").unwrap();
        assert_eq!(parsed, Intensity::FULL);
    }
}
