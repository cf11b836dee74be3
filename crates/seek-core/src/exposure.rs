//! Exposure: the value window mapped onto 8-bit intensity.

use std::fmt;

use tracing::debug;

use crate::config::{DeviceConfig, SharedConfig};
use crate::radiometry::ThermalMatrix;

/// A `(min, max)` window with `min < max` guaranteed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRange {
    min: f32,
    max: f32,
}

impl ExposureRange {
    /// Build a range, ordering the bounds. A zero-width range becomes
    /// `[min, min + 1]` so mapping never divides by zero.
    pub fn new(a: f32, b: f32) -> Self {
        let (a, b) = match (a.is_finite(), b.is_finite()) {
            (true, true) => (a, b),
            (true, false) => (a, a),
            (false, true) => (b, b),
            (false, false) => (0.0, 0.0),
        };
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        if max > min {
            Self { min, max }
        } else {
            Self {
                min,
                max: min + 1.0,
            }
        }
    }

    /// Observed range of a frame. `trim` clips that fraction of pixels at
    /// each end; 0 uses the raw extrema.
    pub fn observe(matrix: &ThermalMatrix, trim: f32) -> Self {
        let mut values: Vec<f32> = matrix.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Self::new(0.0, 0.0);
        }

        if trim <= 0.0 {
            let (lo, hi) = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            return Self::new(lo, hi);
        }

        let n = values.len();
        let k = ((n as f32 * trim.min(0.49)) as usize).min(n - 1);
        let lo = *values.select_nth_unstable_by(k, f32::total_cmp).1;
        let hi = *values.select_nth_unstable_by(n - 1 - k, f32::total_cmp).1;
        Self::new(lo, hi)
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Position of `value` inside the window, clamped to [0, 1].
    pub fn normalize(&self, value: f32) -> f32 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// 8-bit intensity of `value`.
    pub fn intensity(&self, value: f32) -> u8 {
        (self.normalize(value) * 255.0).round() as u8
    }
}

impl fmt::Display for ExposureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.1}, {:.1}]", self.min, self.max)
    }
}

/// Where the exposure window comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    /// Recomputed from every frame.
    Auto,
    /// Fixed to the stored thresholds.
    Locked,
}

impl ExposureMode {
    pub fn from_config(config: &DeviceConfig) -> Self {
        if config.lock_exposure {
            ExposureMode::Locked
        } else {
            ExposureMode::Auto
        }
    }
}

/// Chooses the exposure window per frame and remembers the last observation.
#[derive(Debug, Default)]
pub struct ExposureController {
    last_observed: Option<ExposureRange>,
}

impl ExposureController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window to use for `matrix` under `config`.
    pub fn range_for(&mut self, matrix: &ThermalMatrix, config: &DeviceConfig) -> ExposureRange {
        let observed = ExposureRange::observe(matrix, config.exposure_trim);
        self.last_observed = Some(observed);
        match ExposureMode::from_config(config) {
            ExposureMode::Auto => observed,
            ExposureMode::Locked => ExposureRange::new(config.exposure_min, config.exposure_max),
        }
    }

    pub fn last_observed(&self) -> Option<ExposureRange> {
        self.last_observed
    }

    /// Store the most recent observed range as the locked thresholds.
    /// Returns `None` before the first frame.
    pub fn reset_thresholds(&self, config: &SharedConfig) -> Option<ExposureRange> {
        let range = self.last_observed?;
        config.update(|c| {
            c.exposure_min = range.min();
            c.exposure_max = range.max();
        });
        debug!(range = %range, "Exposure thresholds reset");
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_range_ordering_and_degenerate() {
        let r = ExposureRange::new(10.0, 2.0);
        assert_eq!((r.min(), r.max()), (2.0, 10.0));

        let flat = ExposureRange::observe(&Array2::from_elem((4, 4), 7.5), 0.0);
        assert_eq!((flat.min(), flat.max()), (7.5, 8.5));
        assert_eq!(flat.intensity(7.5), 0);

        let nan = ExposureRange::new(f32::NAN, f32::NAN);
        assert!(nan.min() < nan.max());
    }

    #[test]
    fn test_observe_extrema_and_trim() {
        let mut m = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32);
        m[[0, 0]] = -1000.0;
        m[[9, 9]] = 1000.0;

        let raw = ExposureRange::observe(&m, 0.0);
        assert_eq!((raw.min(), raw.max()), (-1000.0, 1000.0));

        let trimmed = ExposureRange::observe(&m, 0.05);
        assert!(trimmed.min() > -1000.0 && trimmed.max() < 1000.0);
        assert!(trimmed.min() <= trimmed.max());
    }

    #[test]
    fn test_reset_then_lock_uses_computed_values() {
        let shared = SharedConfig::new(DeviceConfig::default());
        let mut exposure = ExposureController::new();
        assert!(exposure.reset_thresholds(&shared).is_none());

        let frame = Array2::from_shape_fn((3, 3), |(r, c)| (r + c) as f32 * 10.0);
        exposure.range_for(&frame, &shared.snapshot());
        let stored = exposure.reset_thresholds(&shared).unwrap();
        assert_eq!((stored.min(), stored.max()), (0.0, 40.0));

        shared.update(|c| c.lock_exposure = true);
        let other = Array2::from_elem((3, 3), 500.0);
        let used = exposure.range_for(&other, &shared.snapshot());
        assert_eq!(used, stored);
    }
}
