//! Radiometric correction of image frames.
//!
//! Per live pixel `p`:
//!
//! ```text
//! value[p] = raw[p] - fsc[p] - (gradient[p] - mean(gradient))
//! ```
//!
//! The FSC frame is the shutter-closed reference, so subtracting it removes
//! the per-pixel offset. The gradient frame is applied as a zero-mean spatial
//! correction. Pixels flagged in the dead-pixel map (word value 0) are replaced
//! by the mean of the live pixels around them.

use ndarray::{Array2, Zip};
use tracing::warn;

use crate::calibration::CalibrationSet;
use crate::protocol::CalibrationKind;

/// Corrected, temperature-proportional values in sensor layout.
pub type ThermalMatrix = Array2<f32>;

/// Largest neighbourhood radius searched for live pixels.
const MAX_DEAD_PIXEL_RADIUS: usize = 2;

/// Output of the correction stage.
#[derive(Debug, Clone)]
pub struct Correction {
    pub matrix: ThermalMatrix,
    /// False when calibration was not available and raw values were forwarded.
    pub corrected: bool,
}

/// Dead pixels are the zero words of the dead-pixel calibration frame.
pub fn dead_pixel_mask(map: &Array2<u16>) -> Array2<bool> {
    map.mapv(|w| w == 0)
}

/// Apply calibration to one image. Falls back to the raw values when the set
/// is incomplete or does not match the image geometry.
pub fn correct(image: &Array2<u16>, calibration: &CalibrationSet) -> Correction {
    let uncorrected = || Correction {
        matrix: image.mapv(|v| v as f32),
        corrected: false,
    };

    if !calibration.is_complete() {
        return uncorrected();
    }

    let (Some(fsc), Some(gradient), Some(dead)) = (
        calibration.get(CalibrationKind::Fsc),
        calibration.get(CalibrationKind::Gradient),
        calibration.get(CalibrationKind::DeadPixel),
    ) else {
        return uncorrected();
    };

    let dim = image.dim();
    if fsc.pixels.dim() != dim || gradient.pixels.dim() != dim || dead.pixels.dim() != dim {
        warn!(
            image = ?dim,
            fsc = ?fsc.pixels.dim(),
            gradient = ?gradient.pixels.dim(),
            dead_pixel = ?dead.pixels.dim(),
            "Calibration geometry does not match image, skipping correction"
        );
        return uncorrected();
    }

    let mask = dead_pixel_mask(&dead.pixels);
    let gradient_mean = live_mean(&gradient.pixels.mapv(|v| v as f32), &mask);

    let mut matrix = Array2::<f32>::zeros(dim);
    Zip::from(&mut matrix)
        .and(image)
        .and(&fsc.pixels)
        .and(&gradient.pixels)
        .for_each(|out, &raw, &offset, &grad| {
            *out = raw as f32 - offset as f32 - (grad as f32 - gradient_mean);
        });

    replace_dead_pixels(&mut matrix, &mask);

    Correction {
        matrix,
        corrected: true,
    }
}

fn live_mean(values: &Array2<f32>, dead: &Array2<bool>) -> f32 {
    let (sum, count) = values
        .iter()
        .zip(dead.iter())
        .filter(|(_, d)| !**d)
        .fold((0.0f64, 0usize), |(s, c), (v, _)| (s + *v as f64, c + 1));
    if count == 0 { 0.0 } else { (sum / count as f64) as f32 }
}

/// Replace every dead pixel with the mean of the live pixels in the smallest
/// square neighbourhood that has any. Only live values feed the estimate, so
/// the result stays within the neighbourhood's range.
pub fn replace_dead_pixels(matrix: &mut Array2<f32>, dead: &Array2<bool>) {
    let (rows, cols) = matrix.dim();
    let fallback = live_mean(matrix, dead);
    let source = matrix.clone();

    for ((row, col), &is_dead) in dead.indexed_iter() {
        if !is_dead {
            continue;
        }
        let mut estimate = None;
        for radius in 1..=MAX_DEAD_PIXEL_RADIUS {
            let r0 = row.saturating_sub(radius);
            let r1 = (row + radius).min(rows - 1);
            let c0 = col.saturating_sub(radius);
            let c1 = (col + radius).min(cols - 1);

            let mut sum = 0.0f64;
            let mut count = 0usize;
            for r in r0..=r1 {
                for c in c0..=c1 {
                    if !dead[[r, c]] {
                        sum += source[[r, c]] as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                estimate = Some((sum / count as f64) as f32);
                break;
            }
        }
        matrix[[row, col]] = estimate.unwrap_or(fallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationPayload, CalibrationStore};

    fn payload(pixels: Array2<u16>) -> CalibrationPayload {
        CalibrationPayload {
            frame_count: 0,
            pixels,
        }
    }

    fn store_with(fsc: Array2<u16>, dead: Array2<u16>, gradient: Array2<u16>) -> CalibrationStore {
        let mut store = CalibrationStore::new();
        let dim = fsc.dim();
        store.record(CalibrationKind::Fsc, payload(fsc));
        store.record(CalibrationKind::DeadPixel, payload(dead));
        store.record(CalibrationKind::Gradient, payload(gradient));
        store.record(CalibrationKind::Sharpness, payload(Array2::from_elem(dim, 1)));
        store
    }

    #[test]
    fn test_uncorrected_without_calibration() {
        let image = Array2::from_elem((3, 3), 100u16);
        let out = correct(&image, &CalibrationSet::default());
        assert!(!out.corrected);
        assert!(out.matrix.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn test_offset_and_gradient() {
        let fsc = Array2::from_elem((2, 2), 1000u16);
        let dead = Array2::from_elem((2, 2), 1u16);
        // Gradient mean is 10: pixel (0,0) gets +5, (1,1) gets -5.
        let gradient = Array2::from_shape_vec((2, 2), vec![5u16, 10, 10, 15]).unwrap();
        let store = store_with(fsc, dead, gradient);

        let image = Array2::from_elem((2, 2), 1100u16);
        let out = correct(&image, &store.snapshot());
        assert!(out.corrected);
        assert_eq!(out.matrix[[0, 0]], 105.0);
        assert_eq!(out.matrix[[0, 1]], 100.0);
        assert_eq!(out.matrix[[1, 1]], 95.0);
    }

    #[test]
    fn test_monotonic_per_pixel() {
        let fsc = Array2::from_shape_fn((4, 4), |(r, c)| (r * 7 + c * 3) as u16 + 200);
        let dead = Array2::from_elem((4, 4), 1u16);
        let gradient = Array2::from_shape_fn((4, 4), |(r, c)| (r + c) as u16);
        let store = store_with(fsc, dead, gradient);
        let cal = store.snapshot();

        let low = correct(&Array2::from_elem((4, 4), 1000u16), &cal);
        let high = correct(&Array2::from_elem((4, 4), 1001u16), &cal);
        Zip::from(&low.matrix)
            .and(&high.matrix)
            .for_each(|a, b| assert!(b > a));
    }

    #[test]
    fn test_dead_pixel_within_neighbourhood_range() {
        let fsc = Array2::zeros((5, 5));
        let mut dead = Array2::from_elem((5, 5), 1u16);
        dead[[2, 2]] = 0;
        let gradient = Array2::zeros((5, 5));
        let store = store_with(fsc, dead, gradient);

        let mut image = Array2::from_shape_fn((5, 5), |(r, c)| 100 + (r * 5 + c) as u16);
        image[[2, 2]] = 60000; // stuck pixel
        let out = correct(&image, &store.snapshot());

        let neighbours: Vec<f32> = (1..=3)
            .flat_map(|r| (1..=3).map(move |c| (r, c)))
            .filter(|&(r, c)| (r, c) != (2, 2))
            .map(|(r, c)| out.matrix[[r, c]])
            .collect();
        let lo = neighbours.iter().cloned().fold(f32::INFINITY, f32::min);
        let hi = neighbours.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let v = out.matrix[[2, 2]];
        assert!(v >= lo && v <= hi, "{v} not in [{lo}, {hi}]");
    }

    #[test]
    fn test_geometry_mismatch_falls_back() {
        let store = store_with(
            Array2::zeros((2, 2)),
            Array2::from_elem((2, 2), 1),
            Array2::zeros((2, 2)),
        );
        let out = correct(&Array2::from_elem((3, 3), 7u16), &store.snapshot());
        assert!(!out.corrected);
    }
}
