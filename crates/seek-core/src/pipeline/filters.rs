//! Scale, blur and sharpen stages on float matrices.
//!
//! `image` clamps float samples to [0, 1] while resampling, so matrices are
//! normalized into that range around each call and mapped back afterwards.
//! Both resampling with a triangle filter and gaussian blur use non-negative
//! weights, so the round trip is exact up to rounding.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, Zip};

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

const IDENTITY_EPSILON: f32 = 1e-3;

/// Sigma of the blur used as the low-pass reference of the unsharp mask.
const SHARPEN_SIGMA: f32 = 1.0;

struct Normalized {
    image: GrayF32,
    offset: f32,
    span: f32,
}

fn normalize(matrix: &Array2<f32>) -> Normalized {
    let (lo, hi) = matrix
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let (offset, span) = if lo.is_finite() && hi > lo {
        (lo, hi - lo)
    } else if lo.is_finite() {
        (lo, 1.0)
    } else {
        (0.0, 1.0)
    };

    let (rows, cols) = matrix.dim();
    let image = GrayF32::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([(matrix[[y as usize, x as usize]] - offset) / span])
    });
    Normalized {
        image,
        offset,
        span,
    }
}

fn denormalize(image: &GrayF32, offset: f32, span: f32) -> Array2<f32> {
    let (w, h) = image.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
        image.get_pixel(c as u32, r as u32)[0] * span + offset
    })
}

/// Resize by `factor` with bilinear filtering. Identity at 1.0.
pub fn scale(matrix: &Array2<f32>, factor: f32) -> Array2<f32> {
    if (factor - 1.0).abs() < IDENTITY_EPSILON || matrix.is_empty() {
        return matrix.clone();
    }
    let (rows, cols) = matrix.dim();
    let width = ((cols as f32 * factor).round() as u32).max(1);
    let height = ((rows as f32 * factor).round() as u32).max(1);

    let n = normalize(matrix);
    let resized = imageops::resize(&n.image, width, height, FilterType::Triangle);
    denormalize(&resized, n.offset, n.span)
}

/// Gaussian blur with standard deviation `sigma`. Skipped at 0.
pub fn blur(matrix: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 || matrix.is_empty() {
        return matrix.clone();
    }
    let n = normalize(matrix);
    let blurred = imageops::blur(&n.image, sigma);
    denormalize(&blurred, n.offset, n.span)
}

/// Unsharp mask: `m + amount * (m - blur(m))`. Skipped at 0.
pub fn sharpen(matrix: &Array2<f32>, amount: f32) -> Array2<f32> {
    if amount <= 0.0 || matrix.is_empty() {
        return matrix.clone();
    }
    let low = blur(matrix, SHARPEN_SIGMA);
    let mut out = matrix.clone();
    Zip::from(&mut out).and(&low).for_each(|v, &l| {
        *v += amount * (*v - l);
    });
    out
}
