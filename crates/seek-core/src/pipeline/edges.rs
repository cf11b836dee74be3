//! Canny edge detection and the final erosion pass.

use image::{Rgb, RgbImage};
use ndarray::Array2;

fn sobel_kernels(aperture: u32) -> (&'static [f32], &'static [f32]) {
    match aperture {
        5 => (&[1.0, 4.0, 6.0, 4.0, 1.0], &[-1.0, -2.0, 0.0, 2.0, 1.0]),
        7 => (
            &[1.0, 6.0, 15.0, 20.0, 15.0, 6.0, 1.0],
            &[-1.0, -4.0, -5.0, 0.0, 5.0, 4.0, 1.0],
        ),
        _ => (&[1.0, 2.0, 1.0], &[-1.0, 0.0, 1.0]),
    }
}

/// Correlate along rows (`axis = 1`) or columns (`axis = 0`), replicating
/// the border.
fn convolve_axis(src: &Array2<f32>, kernel: &[f32], axis: usize) -> Array2<f32> {
    let (rows, cols) = src.dim();
    let half = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let d = i as isize - half;
                let (rr, cc) = if axis == 0 {
                    ((r as isize + d).clamp(0, rows as isize - 1) as usize, c)
                } else {
                    (r, (c as isize + d).clamp(0, cols as isize - 1) as usize)
                };
                k * src[[rr, cc]]
            })
            .sum()
    })
}

/// Horizontal and vertical Sobel derivatives.
pub fn sobel(image: &Array2<u8>, aperture: u32) -> (Array2<f32>, Array2<f32>) {
    let src = image.mapv(f32::from);
    let (smooth, deriv) = sobel_kernels(aperture);
    let gx = convolve_axis(&convolve_axis(&src, smooth, 0), deriv, 1);
    let gy = convolve_axis(&convolve_axis(&src, deriv, 0), smooth, 1);
    (gx, gy)
}

/// Edge mask of `image`. Pixels above `high` seed edges, pixels above `low`
/// extend them when 8-connected to a seed.
pub fn canny(image: &Array2<u8>, low: f32, high: f32, aperture: u32) -> Array2<bool> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Array2::from_elem((rows, cols), false);
    }
    let (gx, gy) = sobel(image, aperture);
    let magnitude = Array2::from_shape_fn((rows, cols), |p| gx[p].abs() + gy[p].abs());

    let at = |r: isize, c: isize| -> f32 {
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            0.0
        } else {
            magnitude[[r as usize, c as usize]]
        }
    };

    // Non-maximum suppression along the quantized gradient direction.
    let thin = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let m = magnitude[[r, c]];
        if m <= low {
            return 0.0;
        }
        let (dx, dy) = (gx[[r, c]], gy[[r, c]]);
        let angle = dy.atan2(dx).to_degrees().rem_euclid(180.0);
        let (dr, dc): (isize, isize) = if !(22.5..157.5).contains(&angle) {
            (0, 1)
        } else if angle < 67.5 {
            (1, 1)
        } else if angle < 112.5 {
            (1, 0)
        } else {
            (1, -1)
        };
        let (r, c) = (r as isize, c as isize);
        if m >= at(r + dr, c + dc) && m > at(r - dr, c - dc) {
            m
        } else {
            0.0
        }
    });

    let mut edges = Array2::from_elem((rows, cols), false);
    let mut stack: Vec<(usize, usize)> = thin
        .indexed_iter()
        .filter(|(_, m)| **m > high)
        .map(|(p, _)| p)
        .collect();
    for &p in &stack {
        edges[p] = true;
    }

    while let Some((r, c)) = stack.pop() {
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                let (nr, nc) = (r as isize + dr, c as isize + dc);
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let n = (nr as usize, nc as usize);
                if !edges[n] && thin[n] > low {
                    edges[n] = true;
                    stack.push(n);
                }
            }
        }
    }
    edges
}

/// Paint `mask` onto `image` in white.
pub fn overlay(image: &mut RgbImage, mask: &Array2<bool>) {
    for ((r, c), &edge) in mask.indexed_iter() {
        if edge && (c as u32) < image.width() && (r as u32) < image.height() {
            image.put_pixel(c as u32, r as u32, Rgb([255, 255, 255]));
        }
    }
}

/// One pass of 3x3 erosion, per channel.
pub fn erode(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let mut out = [u8::MAX; 3];
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let p = image.get_pixel(nx, ny);
                for ch in 0..3 {
                    out[ch] = out[ch].min(p[ch]);
                }
            }
        }
        Rgb(out)
    })
}
