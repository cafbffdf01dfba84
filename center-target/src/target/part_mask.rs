//! The 3x3 part grid and size level mask channels.

use crate::common::*;
use bbox::HW;
use std::ops::Range;

/// The number of part cell channels, top row first.
pub const NUM_PART_CHANNELS: usize = 9;

/// The size level of a mask box of `roi_area` inside a grid of `output_area`.
///
/// It is the largest `k` with `roi_area * 4^k <= output_area`, capped so that
/// the pair `k, k + 1` stays within `num_levels` channels.
pub fn size_level(roi_area: usize, output_area: usize, num_levels: usize) -> usize {
    let max_level = num_levels.saturating_sub(2);
    let mut level = 0;
    let mut area = roi_area.max(1);

    while level < max_level && area.saturating_mul(4) <= output_area {
        area *= 4;
        level += 1;
    }
    level
}

/// The row and column ranges of the nine overlapping cells of a `roi_h` by
/// `roi_w` box, relative to its top-left corner, in channel order.
pub fn part_cells(roi_h: usize, roi_w: usize) -> [(Range<usize>, Range<usize>); NUM_PART_CHANNELS] {
    let rows = cell_bands(roi_h);
    let cols = cell_bands(roi_w);

    let mut cells: [(Range<usize>, Range<usize>); NUM_PART_CHANNELS] = Default::default();
    iproduct!(0..3, 0..3).for_each(|(row, col)| {
        cells[row * 3 + col] = (rows[row].clone(), cols[col].clone());
    });
    cells
}

/// Splits `size` pixels into three bands around the middle with overlapping margins.
fn cell_bands(size: usize) -> [Range<usize>; 3] {
    let len = size as isize;
    let mid = len / 2;
    let cell = (len + 5) / 6;
    let margin = (cell / 4).max(6);

    let clamp = |value: isize| value.max(0).min(len) as usize;
    let band = |start: isize, end: isize| clamp(start)..clamp(end).max(clamp(start));

    [
        band(0, mid - cell + margin),
        band(mid - cell - margin, mid + cell + margin),
        band(mid + cell - margin, len),
    ]
}

/// Accumulates object masks into `[9 + L, H, W]` binary channels.
///
/// Every write is a logical OR, so the result does not depend on the object order.
#[derive(Debug, Clone)]
pub struct PartMaskGrid {
    num_levels: usize,
    min_roi: usize,
    channels: Array3<u8>,
}

impl PartMaskGrid {
    pub fn new(num_levels: usize, min_roi: usize, output_size: &HW<usize>) -> Result<Self> {
        ensure!(
            num_levels >= 2,
            "num_levels must be at least 2, but get {}",
            num_levels
        );
        let channels = Array3::zeros((
            NUM_PART_CHANNELS + num_levels,
            output_size.h(),
            output_size.w(),
        ));

        Ok(Self {
            num_levels,
            min_roi,
            channels,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len_of(Axis(0))
    }

    /// Adds an object mask warped to the output grid, cropped to the box
    /// `roi = [l, t, r, b]` with exclusive right and bottom ends.
    ///
    /// Returns false when the box is too small and nothing is written.
    pub fn accumulate(&mut self, mask: ArrayView2<u8>, roi: [usize; 4]) -> Result<bool> {
        let (_, out_h, out_w) = self.channels.dim();
        ensure!(
            mask.dim() == (out_h, out_w),
            "mask size {:?} does not match the output size {:?}",
            mask.dim(),
            (out_h, out_w)
        );

        let [l, t, r, b] = roi;
        ensure!(
            l <= r && t <= b && r <= out_w && b <= out_h,
            "invalid mask box {:?}",
            roi
        );
        let (roi_h, roi_w) = (b - t, r - l);
        if roi_h < self.min_roi || roi_w < self.min_roi {
            return Ok(false);
        }

        let level = size_level(roi_h * roi_w, out_h * out_w, self.num_levels);
        for channel in [NUM_PART_CHANNELS + level, NUM_PART_CHANNELS + level + 1] {
            let mut plane = self.channels.index_axis_mut(Axis(0), channel);
            plane.zip_mut_with(&mask, |dst, &src| *dst |= src);
        }

        let roi_mask = mask.slice(s![t..b, l..r]);
        part_cells(roi_h, roi_w)
            .into_iter()
            .enumerate()
            .for_each(|(channel, (rows, cols))| {
                let ys = (t + rows.start)..(t + rows.end);
                let xs = (l + cols.start)..(l + cols.end);
                let mut dst = self.channels.slice_mut(s![channel, ys, xs]);
                dst.zip_mut_with(&roi_mask.slice(s![rows, cols]), |dst, &src| *dst |= src);
            });

        Ok(true)
    }

    pub fn channels(&self) -> &Array3<u8> {
        &self.channels
    }

    /// The channels as a float array, for the target bundle.
    pub fn into_array(self) -> Array3<f32> {
        self.channels.mapv(f32::from)
    }
}
