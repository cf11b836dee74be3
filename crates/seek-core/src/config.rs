//! Device configuration shared between the consumer and the acquisition loop.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::pipeline::colormap::Colormap;
use crate::shutter::ShutterMode;

/// Tunable parameters of the camera and the image pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Shutter behaviour. Changing it makes the worker send SHUTTER_CONTROL.
    pub shutter_mode: ShutterMode,
    /// Output size multiplier, 1.0 keeps the sensor size.
    pub scale_factor: f32,
    /// Gaussian blur sigma in output pixels, 0 disables blurring.
    pub blur_factor: f32,
    /// Unsharp mask amount, 0 disables sharpening.
    pub sharpen_factor: f32,
    /// Pseudocolor lookup applied after exposure mapping.
    pub colormap: Colormap,
    /// Use `exposure_min`/`exposure_max` instead of the per-frame range.
    pub lock_exposure: bool,
    pub exposure_min: f32,
    pub exposure_max: f32,
    /// Fraction of pixels clipped at each end of the auto exposure range.
    pub exposure_trim: f32,
    /// Overlay edges found in the 8-bit intensity image.
    pub edge_detection: bool,
    /// Hysteresis thresholds on gradient magnitude.
    pub edge_min: f32,
    pub edge_max: f32,
    /// Sobel aperture: 3, 5 or 7.
    pub edge_perimeter_size: u32,
    /// Run one 3x3 erosion over the final bitmap.
    pub last_pass_erosion: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            shutter_mode: ShutterMode::Auto,
            scale_factor: 1.0,
            blur_factor: 0.0,
            sharpen_factor: 0.0,
            colormap: Colormap::Inferno,
            lock_exposure: false,
            exposure_min: 0.0,
            exposure_max: 1.0,
            exposure_trim: 0.0,
            edge_detection: false,
            edge_min: 50.0,
            edge_max: 150.0,
            edge_perimeter_size: 3,
            last_pass_erosion: false,
        }
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Copy with every parameter pulled into the range the pipeline accepts.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        let finite_or = |v: f32, default: f32| if v.is_finite() { v } else { default };

        cfg.scale_factor = finite_or(cfg.scale_factor, 1.0).clamp(0.1, 8.0);
        cfg.blur_factor = finite_or(cfg.blur_factor, 0.0).max(0.0);
        cfg.sharpen_factor = finite_or(cfg.sharpen_factor, 0.0).max(0.0);
        cfg.exposure_trim = finite_or(cfg.exposure_trim, 0.0).clamp(0.0, 0.49);

        cfg.exposure_min = finite_or(cfg.exposure_min, 0.0);
        cfg.exposure_max = finite_or(cfg.exposure_max, 1.0);
        if cfg.exposure_min > cfg.exposure_max {
            std::mem::swap(&mut cfg.exposure_min, &mut cfg.exposure_max);
        }

        cfg.edge_min = finite_or(cfg.edge_min, 0.0).max(0.0);
        cfg.edge_max = finite_or(cfg.edge_max, 0.0).max(0.0);
        if cfg.edge_min > cfg.edge_max {
            std::mem::swap(&mut cfg.edge_min, &mut cfg.edge_max);
        }
        cfg.edge_perimeter_size = match cfg.edge_perimeter_size {
            0..=3 => 3,
            4 | 5 => 5,
            _ => 7,
        };
        cfg
    }
}

/// Handle to a `DeviceConfig` shared across threads.
///
/// Readers always get a whole copy, so a min/max pair is never observed half
/// updated.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<DeviceConfig>>,
}

impl SharedConfig {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> DeviceConfig {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply a change atomically with respect to `snapshot`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut DeviceConfig),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_roundtrip_with_defaults() {
        let cfg: DeviceConfig = toml::from_str(
            r#"
            scale_factor = 2.0
            colormap = "Jet"
            lock_exposure = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scale_factor, 2.0);
        assert_eq!(cfg.colormap, Colormap::Jet);
        assert!(cfg.lock_exposure);
        assert_eq!(cfg.edge_perimeter_size, 3);

        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: DeviceConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_sanitized() {
        let cfg = DeviceConfig {
            scale_factor: f32::NAN,
            blur_factor: -1.0,
            exposure_min: 10.0,
            exposure_max: 2.0,
            edge_min: 200.0,
            edge_max: 100.0,
            edge_perimeter_size: 4,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.scale_factor, 1.0);
        assert_eq!(cfg.blur_factor, 0.0);
        assert_eq!((cfg.exposure_min, cfg.exposure_max), (2.0, 10.0));
        assert_eq!((cfg.edge_min, cfg.edge_max), (100.0, 200.0));
        assert_eq!(cfg.edge_perimeter_size, 5);
    }

    #[test]
    fn test_shared_update_visible() {
        let shared = SharedConfig::new(DeviceConfig::default());
        let other = shared.clone();
        other.update(|c| {
            c.exposure_min = 20.0;
            c.exposure_max = 30.0;
        });
        let snap = shared.snapshot();
        assert_eq!((snap.exposure_min, snap.exposure_max), (20.0, 30.0));
    }
}
