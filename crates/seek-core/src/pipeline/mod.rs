//! Image post-processing: thermal matrix in, RGB bitmap out.
//!
//! Stages run in a fixed order, each a pure function of its input and the
//! config snapshot taken for the frame:
//!
//! 1. scale
//! 2. blur
//! 3. sharpen
//! 4. exposure mapping to 8-bit
//! 5. colormap
//! 6. edges: optional erosion of the bitmap, then the edge overlay

pub mod colormap;
pub mod edges;
pub mod filters;

use image::RgbImage;
use ndarray::Array2;

use crate::calibration::CalibrationPayload;
use crate::config::DeviceConfig;
use crate::exposure::ExposureRange;
use crate::radiometry::ThermalMatrix;

pub use colormap::Colormap;

/// Finished bitmap handed to the observer. Not retained after dispatch.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub image: RgbImage,
    /// Monotonic sequence number of the source frame.
    pub sequence: u64,
    /// Raw device counter of the source frame.
    pub frame_count: u16,
    /// False when calibration was not yet complete.
    pub corrected: bool,
    /// Window used for the 8-bit mapping.
    pub exposure: ExposureRange,
}

impl ProcessedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Multiplier applied to `sharpen_factor` from the sharpness calibration
/// frame: `0.5 + mean / max`, in [0.5, 1.5]. 1.0 without data.
pub fn sharpness_gain(payload: Option<&CalibrationPayload>) -> f32 {
    let Some(payload) = payload else {
        return 1.0;
    };
    let max = payload.pixels.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return 1.0;
    }
    let mean = payload.pixels.iter().map(|&v| v as f64).sum::<f64>() / payload.pixels.len() as f64;
    0.5 + (mean / max as f64) as f32
}

/// Spatial stages: scale, blur and sharpen.
pub fn filter(matrix: &ThermalMatrix, config: &DeviceConfig, sharpness: f32) -> ThermalMatrix {
    let scaled = filters::scale(matrix, config.scale_factor);
    let blurred = filters::blur(&scaled, config.blur_factor);
    filters::sharpen(&blurred, config.sharpen_factor * sharpness)
}

/// Map the matrix into 8-bit intensity through `range`.
pub fn map_exposure(matrix: &ThermalMatrix, range: ExposureRange) -> Array2<u8> {
    matrix.mapv(|v| range.intensity(v))
}

/// Color stages: colormap, then optionally edges. Erosion belongs to the
/// edge stage: it runs over the colormapped bitmap and the one-pixel edge
/// lines are painted afterwards so they survive it.
pub fn colorize(intensity: &Array2<u8>, config: &DeviceConfig) -> RgbImage {
    let mut image = config.colormap.apply(intensity);
    if config.edge_detection {
        let mask = edges::canny(
            intensity,
            config.edge_min,
            config.edge_max,
            config.edge_perimeter_size,
        );
        if config.last_pass_erosion {
            image = edges::erode(&image);
        }
        edges::overlay(&mut image, &mask);
    }
    image
}
