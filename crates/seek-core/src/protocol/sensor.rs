//! Sensor variants and their frame geometry.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::*;

/// Rectangle of the raw frame that carries thermal pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Supported Seek sensor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorModel {
    /// 0x0010, 208x154 raw frames.
    S104SP,
    /// 0x0011, Mosaic core, 342x260 raw frames with a 320x240 image.
    Mosaic,
}

impl SensorModel {
    pub fn from_product_id(pid: u16) -> Option<Self> {
        match pid {
            SEEK_S104SP_PRODUCT_ID => Some(Self::S104SP),
            SEEK_MOSAIC_PRODUCT_ID => Some(Self::Mosaic),
            _ => None,
        }
    }

    pub fn product_id(&self) -> u16 {
        match self {
            Self::S104SP => SEEK_S104SP_PRODUCT_ID,
            Self::Mosaic => SEEK_MOSAIC_PRODUCT_ID,
        }
    }

    /// Raw frame dimensions as (width, height) in words.
    pub fn raw_dimensions(&self) -> (usize, usize) {
        match self {
            Self::S104SP => (S104SP_FRAME_WIDTH, S104SP_FRAME_HEIGHT),
            Self::Mosaic => (MOSAIC_FRAME_RAW_WIDTH, MOSAIC_FRAME_RAW_HEIGHT),
        }
    }

    /// Part of the raw frame holding image pixels. The rows above it carry the
    /// header and telemetry words, the columns to its right carry status words.
    pub fn image_region(&self) -> ImageRegion {
        match self {
            Self::S104SP => ImageRegion {
                x: 0,
                y: 1,
                width: S104SP_FRAME_WIDTH - 2,
                height: S104SP_FRAME_HEIGHT - 1,
            },
            Self::Mosaic => ImageRegion {
                x: 0,
                y: 4,
                width: MOSAIC_FRAME_WIDTH,
                height: MOSAIC_FRAME_HEIGHT,
            },
        }
    }

    pub fn frame_words(&self) -> usize {
        let (w, h) = self.raw_dimensions();
        w * h
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_words() * FRAME_WORD_SIZE
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorModel::S104SP => write!(f, "S104SP"),
            SensorModel::Mosaic => write!(f, "Mosaic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_pid() {
        assert_eq!(SensorModel::from_product_id(0x0010), Some(SensorModel::S104SP));
        assert_eq!(SensorModel::from_product_id(0x0011), Some(SensorModel::Mosaic));
        assert_eq!(SensorModel::from_product_id(0x1234), None);
    }

    #[test]
    fn test_image_region_fits_raw_frame() {
        for model in [SensorModel::S104SP, SensorModel::Mosaic] {
            let (w, h) = model.raw_dimensions();
            let roi = model.image_region();
            assert!(roi.x + roi.width <= w);
            assert!(roi.y + roi.height <= h);
            // Header words must stay outside the image.
            assert!(roi.y >= 1);
        }
        assert_eq!(SensorModel::S104SP.frame_bytes(), 208 * 154 * 2);
    }
}
