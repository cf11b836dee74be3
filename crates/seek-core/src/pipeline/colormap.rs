//! Pseudocolor lookup tables.
//!
//! Ids follow OpenCV's `COLORMAP_*` numbering so values saved by other Seek
//! viewers keep their meaning. Tables are piecewise-linear approximations
//! through a handful of anchor colors.

use std::str::FromStr;

use image::{Rgb, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Colormap {
    Grayscale,
    Autumn,
    Bone,
    Jet,
    Winter,
    Rainbow,
    Ocean,
    Summer,
    Spring,
    Cool,
    Hot,
    Magma,
    #[default]
    Inferno,
    Plasma,
    Viridis,
}

type Anchor = (f32, [u8; 3]);

impl Colormap {
    pub const ALL: [Colormap; 15] = [
        Colormap::Grayscale,
        Colormap::Autumn,
        Colormap::Bone,
        Colormap::Jet,
        Colormap::Winter,
        Colormap::Rainbow,
        Colormap::Ocean,
        Colormap::Summer,
        Colormap::Spring,
        Colormap::Cool,
        Colormap::Hot,
        Colormap::Magma,
        Colormap::Inferno,
        Colormap::Plasma,
        Colormap::Viridis,
    ];

    /// OpenCV colormap id. Grayscale has no OpenCV id and reports -1.
    pub fn id(&self) -> i32 {
        match self {
            Self::Grayscale => -1,
            Self::Autumn => 0,
            Self::Bone => 1,
            Self::Jet => 2,
            Self::Winter => 3,
            Self::Rainbow => 4,
            Self::Ocean => 5,
            Self::Summer => 6,
            Self::Spring => 7,
            Self::Cool => 8,
            Self::Hot => 11,
            Self::Magma => 13,
            Self::Inferno => 14,
            Self::Plasma => 15,
            Self::Viridis => 16,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.id() == id)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Grayscale => "Grayscale",
            Self::Autumn => "Autumn",
            Self::Bone => "Bone",
            Self::Jet => "Jet",
            Self::Winter => "Winter",
            Self::Rainbow => "Rainbow",
            Self::Ocean => "Ocean",
            Self::Summer => "Summer",
            Self::Spring => "Spring",
            Self::Cool => "Cool",
            Self::Hot => "Hot",
            Self::Magma => "Magma",
            Self::Inferno => "Inferno",
            Self::Plasma => "Plasma",
            Self::Viridis => "Viridis",
        }
    }

    fn anchors(&self) -> &'static [Anchor] {
        match self {
            Self::Grayscale => &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])],
            Self::Autumn => &[(0.0, [255, 0, 0]), (1.0, [255, 255, 0])],
            Self::Bone => &[
                (0.0, [0, 0, 0]),
                (0.375, [84, 84, 116]),
                (0.75, [166, 198, 198]),
                (1.0, [255, 255, 255]),
            ],
            Self::Jet => &[
                (0.0, [0, 0, 128]),
                (0.11, [0, 0, 255]),
                (0.34, [0, 255, 255]),
                (0.65, [255, 255, 0]),
                (0.89, [255, 0, 0]),
                (1.0, [128, 0, 0]),
            ],
            Self::Winter => &[(0.0, [0, 0, 255]), (1.0, [0, 255, 128])],
            Self::Rainbow => &[
                (0.0, [255, 0, 0]),
                (0.2, [255, 255, 0]),
                (0.4, [0, 255, 0]),
                (0.6, [0, 255, 255]),
                (0.8, [0, 0, 255]),
                (1.0, [255, 0, 255]),
            ],
            Self::Ocean => &[
                (0.0, [0, 128, 0]),
                (0.33, [0, 0, 85]),
                (0.66, [0, 128, 170]),
                (1.0, [255, 255, 255]),
            ],
            Self::Summer => &[(0.0, [0, 128, 102]), (1.0, [255, 255, 102])],
            Self::Spring => &[(0.0, [255, 0, 255]), (1.0, [255, 255, 0])],
            Self::Cool => &[(0.0, [0, 255, 255]), (1.0, [255, 0, 255])],
            Self::Hot => &[
                (0.0, [0, 0, 0]),
                (0.375, [255, 0, 0]),
                (0.75, [255, 255, 0]),
                (1.0, [255, 255, 255]),
            ],
            Self::Magma => &[
                (0.0, [0, 0, 4]),
                (0.25, [81, 18, 124]),
                (0.5, [183, 55, 121]),
                (0.75, [252, 137, 97]),
                (1.0, [252, 253, 191]),
            ],
            Self::Inferno => &[
                (0.0, [0, 0, 4]),
                (0.25, [87, 16, 110]),
                (0.5, [188, 55, 84]),
                (0.75, [249, 142, 9]),
                (1.0, [252, 255, 164]),
            ],
            Self::Plasma => &[
                (0.0, [13, 8, 135]),
                (0.25, [126, 3, 168]),
                (0.5, [204, 71, 120]),
                (0.75, [248, 149, 64]),
                (1.0, [240, 249, 33]),
            ],
            Self::Viridis => &[
                (0.0, [68, 1, 84]),
                (0.25, [59, 82, 139]),
                (0.5, [33, 145, 140]),
                (0.75, [94, 201, 98]),
                (1.0, [253, 231, 37]),
            ],
        }
    }

    /// 256-entry table for 8-bit intensities.
    pub fn lut(&self) -> [[u8; 3]; 256] {
        let anchors = self.anchors();
        let mut table = [[0u8; 3]; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let t = i as f32 / 255.0;
            let upper = anchors
                .iter()
                .position(|(pos, _)| *pos >= t)
                .unwrap_or(anchors.len() - 1);
            let (p1, c1) = anchors[upper];
            let (p0, c0) = anchors[upper.saturating_sub(1)];
            let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
            for ch in 0..3 {
                let v = c0[ch] as f32 + (c1[ch] as f32 - c0[ch] as f32) * f;
                entry[ch] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        table
    }

    /// Map an intensity image through the table.
    pub fn apply(&self, intensity: &Array2<u8>) -> RgbImage {
        let lut = self.lut();
        let (rows, cols) = intensity.dim();
        RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
            Rgb(lut[intensity[[y as usize, x as usize]] as usize])
        })
    }
}

/// Accepts a name (case-insensitive) or an OpenCV id.
impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.trim().parse::<i32>() {
            return Colormap::from_id(id).ok_or_else(|| format!("unknown colormap id {id}"));
        }
        Colormap::ALL
            .iter()
            .copied()
            .find(|m| m.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown colormap '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opencv_ids_roundtrip() {
        for map in Colormap::ALL {
            assert_eq!(Colormap::from_id(map.id()), Some(map));
        }
        assert_eq!(Colormap::from_id(2), Some(Colormap::Jet));
        assert_eq!(Colormap::from_id(9), None);
    }

    #[test]
    fn test_lut_endpoints() {
        for map in Colormap::ALL {
            let lut = map.lut();
            let anchors = map.anchors();
            assert_eq!(lut[0], anchors[0].1, "{}", map.label());
            assert_eq!(lut[255], anchors[anchors.len() - 1].1, "{}", map.label());
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("viridis".parse::<Colormap>(), Ok(Colormap::Viridis));
        assert_eq!("11".parse::<Colormap>(), Ok(Colormap::Hot));
        assert!("sepia".parse::<Colormap>().is_err());
    }

    #[test]
    fn test_grayscale_is_identity() {
        let lut = Colormap::Grayscale.lut();
        for (i, rgb) in lut.iter().enumerate() {
            assert_eq!(*rgb, [i as u8; 3]);
        }
    }
}
