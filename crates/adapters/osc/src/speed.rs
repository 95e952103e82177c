//! Rate-of-change smoothing for velocity bindings.

use tokio::time::Instant;

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Default speed (remapped units per second) that maps to full intensity.
pub const DEFAULT_CEILING: f64 = 5.0;

/// Exponentially smoothed absolute speed of a sampled value.
///
/// `smoothed = alpha * |dv/dt| + (1 - alpha) * smoothed`
#[derive(Debug, Clone)]
pub struct SpeedFilter {
    alpha: f64,
    ceiling: f64,
    smoothed: f64,
    last: Option<(f64, Instant)>,
}

impl SpeedFilter {
    #[must_use]
    pub fn new(alpha: f64, ceiling: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            ceiling,
            smoothed: 0.0,
            last: None,
        }
    }

    /// Feed a sample and return the smoothed speed.
    ///
    /// The first sample only primes the filter. Samples that do not move
    /// the clock forward leave the estimate unchanged.
    pub fn update(&mut self, value: f64, at: Instant) -> f64 {
        let Some((prev_value, prev_at)) = self.last.replace((value, at)) else {
            return self.smoothed;
        };
        let dt = at.saturating_duration_since(prev_at).as_secs_f64();
        if dt <= 0.0 {
            return self.smoothed;
        }
        let speed = (value - prev_value).abs() / dt;
        self.smoothed = self.alpha * speed + (1.0 - self.alpha) * self.smoothed;
        self.smoothed
    }

    /// Feed a sample and return it as a fraction of the ceiling.
    pub fn intensity(&mut self, value: f64, at: Instant) -> f64 {
        let speed = self.update(value, at);
        if self.ceiling <= 0.0 {
            return 0.0;
        }
        speed.clamp(0.0, self.ceiling) / self.ceiling
    }

    /// Re-feed the last sample at `at`, so the estimate decays while the
    /// input is idle. `None` until the filter has seen a sample.
    pub fn idle_intensity(&mut self, at: Instant) -> Option<f64> {
        let (value, _) = self.last?;
        Some(self.intensity(value, at))
    }

    /// Drop what is left of the speed estimate, keeping the last sample.
    pub fn settle(&mut self) {
        self.smoothed = 0.0;
    }
}

impl Default for SpeedFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn should_return_zero_on_first_sample() {
        let mut filter = SpeedFilter::default();
        assert!(filter.update(0.7, Instant::now()).abs() < f64::EPSILON);
    }

    #[test]
    fn should_smooth_speed_with_alpha() {
        let mut filter = SpeedFilter::new(0.5, 5.0);
        let t0 = Instant::now();
        filter.update(0.0, t0);

        // 1.0 unit over 0.5 s = 2.0 units/s, half of it kept.
        let speed = filter.update(1.0, t0 + Duration::from_millis(500));
        assert!((speed - 1.0).abs() < 1e-9);

        // no movement decays the estimate by (1 - alpha)
        let speed = filter.update(1.0, t0 + Duration::from_millis(1000));
        assert!((speed - 0.5).abs() < 1e-9);
    }

    #[test]
    fn should_ignore_samples_without_elapsed_time() {
        let mut filter = SpeedFilter::new(1.0, 5.0);
        let t0 = Instant::now();
        filter.update(0.0, t0);
        filter.update(0.5, t0 + Duration::from_secs(1));

        let speed = filter.update(1.0, t0 + Duration::from_secs(1));
        assert!((speed - 0.5).abs() < 1e-9);
    }

    #[test]
    fn should_saturate_intensity_at_ceiling() {
        let mut filter = SpeedFilter::new(1.0, 5.0);
        let t0 = Instant::now();
        filter.intensity(0.0, t0);

        let intensity = filter.intensity(1.0, t0 + Duration::from_millis(10));
        assert!((intensity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_scale_intensity_by_ceiling() {
        let mut filter = SpeedFilter::new(1.0, 4.0);
        let t0 = Instant::now();
        filter.intensity(0.0, t0);

        let intensity = filter.intensity(1.0, t0 + Duration::from_secs(1));
        assert!((intensity - 0.25).abs() < 1e-9);
    }

    #[test]
    fn should_decay_while_idle() {
        let mut filter = SpeedFilter::new(0.5, 1.0);
        let t0 = Instant::now();
        assert!(filter.idle_intensity(t0).is_none());
        filter.update(0.0, t0);
        filter.update(1.0, t0 + Duration::from_secs(1));

        let first = filter.idle_intensity(t0 + Duration::from_secs(2)).unwrap();
        let second = filter.idle_intensity(t0 + Duration::from_secs(3)).unwrap();
        assert!((first - 0.25).abs() < 1e-9);
        assert!((second - 0.125).abs() < 1e-9);
    }

    #[test]
    fn should_keep_last_sample_when_settled() {
        let mut filter = SpeedFilter::new(1.0, 5.0);
        let t0 = Instant::now();
        filter.update(0.0, t0);
        filter.update(1.0, t0 + Duration::from_secs(1));

        filter.settle();

        assert!(filter.idle_intensity(t0 + Duration::from_secs(2)).unwrap().abs() < f64::EPSILON);
        let speed = filter.update(2.0, t0 + Duration::from_secs(3));
        assert!((speed - 1.0).abs() < 1e-9);
    }
}
