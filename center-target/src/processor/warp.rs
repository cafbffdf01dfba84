//! Affine resampling of images and masks.

use crate::common::*;
use bbox::{Affine, HW};

/// Warps an `[H, W, C]` image onto a `size` grid with bilinear sampling.
///
/// Destination pixels that sample outside the source are zero.
pub fn warp_image(src: ArrayView3<f32>, affine: &Affine, size: &HW<usize>) -> Result<Array3<f32>> {
    let inverse = affine
        .inverse()
        .ok_or_else(|| format_err!("the affine transform is not invertible"))?;
    let (src_h, src_w, channels) = src.dim();
    let mut dst = Array3::zeros((size.h(), size.w(), channels));

    for ((y, x), mut pixel) in dst
        .lanes_mut(Axis(2))
        .into_iter()
        .enumerate()
        .map(|(index, lane)| ((index / size.w(), index % size.w()), lane))
    {
        let [sx, sy] = inverse.apply([x as f64, y as f64]);
        let taps = bilinear_taps(sx, sy, src_h, src_w);
        taps.iter()
            .flatten()
            .for_each(|&(ty, tx, weight)| {
                pixel
                    .iter_mut()
                    .zip(src.slice(s![ty, tx, ..]))
                    .for_each(|(out, &value)| *out += weight * value);
            });
    }

    Ok(dst)
}

/// Warps a binary `[H, W]` mask onto a `size` grid.
///
/// Values are interpolated bilinearly and re-binarized at one half.
pub fn warp_mask(src: ArrayView2<u8>, affine: &Affine, size: &HW<usize>) -> Result<Array2<u8>> {
    let inverse = affine
        .inverse()
        .ok_or_else(|| format_err!("the affine transform is not invertible"))?;
    let (src_h, src_w) = src.dim();

    let dst = Array2::from_shape_fn((size.h(), size.w()), |(y, x)| {
        let [sx, sy] = inverse.apply([x as f64, y as f64]);
        let value: f32 = bilinear_taps(sx, sy, src_h, src_w)
            .iter()
            .flatten()
            .map(|&(ty, tx, weight)| weight * src[[ty, tx]] as f32)
            .sum();
        u8::from(value >= 0.5)
    });

    Ok(dst)
}

/// Mirrors the columns of an `[H, W, ...]` array.
pub fn hflip_image(src: ArrayView3<u8>) -> Array3<u8> {
    src.slice(s![.., ..;-1, ..]).as_standard_layout().into_owned()
}

pub fn hflip_mask(src: ArrayView2<u8>) -> Array2<u8> {
    src.slice(s![.., ..;-1]).as_standard_layout().into_owned()
}

/// The four neighbours of `(sx, sy)` with their bilinear weights.
/// Neighbours outside the source are `None`.
fn bilinear_taps(
    sx: f64,
    sy: f64,
    src_h: usize,
    src_w: usize,
) -> [Option<(usize, usize, f32)>; 4] {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = (sx - x0) as f32;
    let fy = (sy - y0) as f32;

    let tap = |dy: f64, dx: f64, weight: f32| {
        let ty = y0 + dy;
        let tx = x0 + dx;
        let inside = ty >= 0.0 && tx >= 0.0 && ty < src_h as f64 && tx < src_w as f64;
        (inside && weight > 0.0).then(|| (ty as usize, tx as usize, weight))
    };

    [
        tap(0.0, 0.0, (1.0 - fx) * (1.0 - fy)),
        tap(0.0, 1.0, fx * (1.0 - fy)),
        tap(1.0, 0.0, (1.0 - fx) * fy),
        tap(1.0, 1.0, fx * fy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use bbox::Scale;

    #[test]
    fn warp_identity() -> Result<()> {
        let src = Array3::from_shape_fn((4, 5, 3), |(y, x, c)| (y * 100 + x * 10 + c) as f32);
        let size = HW::from_hw([4, 5]);
        let dst = warp_image(src.view(), &Affine::identity(), &size)?;
        assert_eq!(dst, src);
        Ok(())
    }

    #[test]
    fn warp_downsample_interpolates() -> Result<()> {
        // half resolution samples at even source pixels
        let src = Array3::from_shape_fn((8, 8, 1), |(_, x, _)| x as f32);
        let affine = Affine::from_center_scale([4.0, 4.0], Scale::Isotropic(8.0), 0.0, &HW::from_hw([4, 4]));
        let dst = warp_image(src.view(), &affine, &HW::from_hw([4, 4]))?;
        assert_abs_diff_eq!(dst[[1, 0, 0]], 0.0);
        assert_abs_diff_eq!(dst[[1, 3, 0]], 6.0);
        Ok(())
    }

    #[test]
    fn warp_mask_outside_is_zero() -> Result<()> {
        let src = Array2::<u8>::ones((4, 4));
        let affine = Affine::from_matrix([[1.0, 0.0, 10.0], [0.0, 1.0, 0.0]]);
        let dst = warp_mask(src.view(), &affine, &HW::from_hw([4, 4]))?;
        assert!(dst.iter().all(|&value| value == 0));

        let shifted = Affine::from_matrix([[1.0, 0.0, 2.0], [0.0, 1.0, 0.0]]);
        let dst = warp_mask(src.view(), &shifted, &HW::from_hw([4, 4]))?;
        assert_eq!(dst.column(1).sum(), 0);
        assert_eq!(dst.column(2).sum(), 4);
        Ok(())
    }

    #[test]
    fn hflip_reverses_columns() {
        let mask = ndarray::arr2(&[[1u8, 0, 0], [0, 1, 1]]);
        assert_eq!(hflip_mask(mask.view()), ndarray::arr2(&[[0u8, 0, 1], [1, 1, 0]]));
    }

    #[test]
    fn singular_transform_is_an_error() {
        let src = Array2::<u8>::ones((2, 2));
        let affine = Affine::from_matrix([[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert!(warp_mask(src.view(), &affine, &HW::from_hw([2, 2])).is_err());
    }
}
