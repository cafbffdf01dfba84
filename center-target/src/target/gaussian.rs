//! Gaussian kernels and the peak radius formula.

use crate::common::*;
use std::ops::Range;

/// Computes the largest center displacement that keeps the IoU between the
/// ground truth box and the displaced box above `min_overlap`.
///
/// It takes the minimum root of the three corner configurations, and is
/// never negative.
pub fn gaussian_radius(height: f64, width: f64, min_overlap: f64) -> f64 {
    let (h, w, o) = (height, width, min_overlap);

    let a1 = 1.0;
    let b1 = h + w;
    let c1 = w * h * (1.0 - o) / (1.0 + o);
    let r1 = (b1 + (b1 * b1 - 4.0 * a1 * c1).max(0.0).sqrt()) / 2.0;

    let a2 = 4.0;
    let b2 = 2.0 * (h + w);
    let c2 = (1.0 - o) * w * h;
    let r2 = (b2 + (b2 * b2 - 4.0 * a2 * c2).max(0.0).sqrt()) / 2.0;

    let a3 = 4.0 * o;
    let b3 = -2.0 * o * (h + w);
    let c3 = (o - 1.0) * w * h;
    let r3 = (b3 + (b3 * b3 - 4.0 * a3 * c3).max(0.0).sqrt()) / 2.0;

    r1.min(r2).min(r3).max(0.0)
}

/// Builds a `[2 * ry + 1, 2 * rx + 1]` axis-aligned Gaussian kernel with unit peak.
///
/// The `radius` and `sigma` are given in `[x, y]` order. Values below machine
/// epsilon relative to the peak are zeroed.
pub fn gaussian_2d(radius: [usize; 2], sigma: [f64; 2]) -> Array2<f32> {
    let [rx, ry] = radius;
    let [sx, sy] = sigma;

    Array2::from_shape_fn((2 * ry + 1, 2 * rx + 1), |(row, col)| {
        let dy = row as f64 - ry as f64;
        let dx = col as f64 - rx as f64;
        let value = (-(dx * dx / (2.0 * sx * sx) + dy * dy / (2.0 * sy * sy))).exp();
        if value < f64::EPSILON {
            0.0
        } else {
            value as f32
        }
    })
}

/// The kernel of a Gaussian whose sigma is one sixth of its diameter.
fn diameter_kernel(radius: [usize; 2]) -> Array2<f32> {
    let [rx, ry] = radius;
    let sigma = [(2 * rx + 1) as f64 / 6.0, (2 * ry + 1) as f64 / 6.0];
    gaussian_2d(radius, sigma)
}

/// Stamps a circular Gaussian peak of `radius` at `center` (`[x, y]`).
pub fn draw_gaussian(heatmap: ArrayViewMut2<f32>, center: [usize; 2], radius: usize) {
    draw_ellipse_gaussian(heatmap, center, [radius, radius]);
}

/// Stamps an axis-aligned elliptical Gaussian peak with per-axis radii (`[x, y]`).
///
/// Overlapping peaks are merged by pointwise maximum.
pub fn draw_ellipse_gaussian(heatmap: ArrayViewMut2<f32>, center: [usize; 2], radius: [usize; 2]) {
    let kernel = diameter_kernel(radius);
    stamp_max(heatmap, center, radius, kernel.view());
}

/// Stamps a Gaussian peak of standard deviation `sigma` spanning three sigmas
/// on each side of `center`.
pub fn draw_msra_gaussian(heatmap: ArrayViewMut2<f32>, center: [usize; 2], sigma: usize) {
    let radius = sigma * 3;
    let kernel = if sigma == 0 {
        Array2::ones((1, 1))
    } else {
        gaussian_2d([radius, radius], [sigma as f64, sigma as f64])
    };
    stamp_max(heatmap, center, [radius, radius], kernel.view());
}

/// Paints `value` into the `[2, H, W]` map wherever the object's peak
/// dominates the merged `heatmap` inside its footprint.
pub fn draw_dense_reg(
    regmap: &mut Array3<f32>,
    heatmap: ArrayView2<f32>,
    center: [usize; 2],
    value: [f32; 2],
    radius: usize,
) {
    let kernel = diameter_kernel([radius, radius]);
    let Window {
        map_y,
        map_x,
        kernel_y,
        kernel_x,
    } = match Window::new(center, [radius, radius], heatmap.dim()) {
        Some(window) => window,
        None => return,
    };

    let kernel = kernel.slice(s![kernel_y, kernel_x]);
    let heatmap = heatmap.slice(s![map_y.clone(), map_x.clone()]);

    izip!(0..regmap.len_of(Axis(0)), value).for_each(|(channel, value)| {
        let mut plane = regmap.slice_mut(s![channel, map_y.clone(), map_x.clone()]);
        Zip::from(&mut plane)
            .and(&kernel)
            .and(&heatmap)
            .for_each(|dst, &gauss, &peak| {
                if gauss >= peak {
                    *dst = value;
                }
            });
    });
}

fn stamp_max(
    mut heatmap: ArrayViewMut2<f32>,
    center: [usize; 2],
    radius: [usize; 2],
    kernel: ArrayView2<f32>,
) {
    let Window {
        map_y,
        map_x,
        kernel_y,
        kernel_x,
    } = match Window::new(center, radius, heatmap.dim()) {
        Some(window) => window,
        None => return,
    };

    Zip::from(heatmap.slice_mut(s![map_y, map_x]))
        .and(kernel.slice(s![kernel_y, kernel_x]))
        .for_each(|dst, &src| {
            if src > *dst {
                *dst = src;
            }
        });
}

/// The overlap of a centered kernel with the map, in both coordinate frames.
struct Window {
    map_y: Range<usize>,
    map_x: Range<usize>,
    kernel_y: Range<usize>,
    kernel_x: Range<usize>,
}

impl Window {
    fn new(center: [usize; 2], radius: [usize; 2], (height, width): (usize, usize)) -> Option<Self> {
        let [x, y] = center;
        let [rx, ry] = radius;
        if x >= width || y >= height {
            return None;
        }

        let left = x.min(rx);
        let right = (width - x).min(rx + 1);
        let top = y.min(ry);
        let bottom = (height - y).min(ry + 1);

        Some(Self {
            map_y: (y - top)..(y + bottom),
            map_x: (x - left)..(x + right),
            kernel_y: (ry - top)..(ry + bottom),
            kernel_x: (rx - left)..(rx + right),
        })
    }
}
