//! Per-object regression targets.

use super::{gaussian::draw_dense_reg, WhTarget};
use crate::{common::*, config::WhMode};
use bbox::HW;

/// Fixed-capacity per-object slots and the width/height layout chosen by [WhMode].
///
/// Objects beyond the capacity are never recorded. Their loss is deliberate,
/// as the network gathers a fixed number of predictions per sample.
#[derive(Debug, Clone)]
pub struct RegressionTargets {
    num_classes: usize,
    output_size: HW<usize>,
    wh: WhTarget,
    reg: Array2<f32>,
    ind: Array1<i64>,
    reg_mask: Array1<u8>,
}

/// The finished regression arrays.
#[derive(Debug, Clone)]
pub struct RegressionArrays {
    pub wh: WhTarget,
    /// `[M, 2]` sub-pixel center offset.
    pub reg: Array2<f32>,
    /// `[M]` flat grid index `y * W + x`.
    pub ind: Array1<i64>,
    /// `[M]` slot validity.
    pub reg_mask: Array1<u8>,
    /// The number of recorded objects.
    pub num_objects: usize,
}

impl RegressionTargets {
    pub fn new(
        mode: WhMode,
        max_objects: usize,
        num_classes: usize,
        output_size: HW<usize>,
    ) -> Self {
        let (out_h, out_w) = (output_size.h(), output_size.w());
        let wh = match mode {
            WhMode::Plain => WhTarget::Plain {
                wh: Array2::zeros((max_objects, 2)),
            },
            WhMode::CategorySpecific => WhTarget::CategorySpecific {
                wh: Array2::zeros((max_objects, num_classes * 2)),
                mask: Array2::zeros((max_objects, num_classes * 2)),
            },
            WhMode::Dense => WhTarget::Dense {
                wh: Array3::zeros((2, out_h, out_w)),
                mask: Array3::zeros((2, out_h, out_w)),
            },
        };

        Self {
            num_classes,
            output_size,
            wh,
            reg: Array2::zeros((max_objects, 2)),
            ind: Array1::zeros(max_objects),
            reg_mask: Array1::zeros(max_objects),
        }
    }

    pub fn max_objects(&self) -> usize {
        self.reg_mask.len()
    }

    /// Records the object in `slot` with its center (`[x, y]`) and size in output pixels.
    pub fn record(
        &mut self,
        slot: usize,
        class: usize,
        center: [f64; 2],
        width: f64,
        height: f64,
    ) -> Result<()> {
        ensure!(
            slot < self.max_objects(),
            "slot {} exceeds the capacity {}",
            slot,
            self.max_objects()
        );
        ensure!(
            class < self.num_classes,
            "class index {} is out of range for {} classes",
            class,
            self.num_classes
        );
        ensure!(
            width > 0.0 && height > 0.0,
            "object size must be positive, but get {}x{}",
            height,
            width
        );

        let [cx, cy] = center;
        let (out_h, out_w) = (self.output_size.h(), self.output_size.w());
        let x = (cx.floor() as usize).min(out_w - 1);
        let y = (cy.floor() as usize).min(out_h - 1);

        self.ind[slot] = (y * out_w + x) as i64;
        self.reg[[slot, 0]] = (cx - x as f64) as f32;
        self.reg[[slot, 1]] = (cy - y as f64) as f32;
        self.reg_mask[slot] = 1;

        let (width, height) = (width as f32, height as f32);
        match &mut self.wh {
            WhTarget::Plain { wh } => {
                wh[[slot, 0]] = width;
                wh[[slot, 1]] = height;
            }
            WhTarget::CategorySpecific { wh, mask } => {
                let col = class * 2;
                wh[[slot, col]] = width;
                wh[[slot, col + 1]] = height;
                mask.slice_mut(s![slot, col..(col + 2)]).fill(1);
            }
            WhTarget::Dense { .. } => {}
        }

        Ok(())
    }

    /// Paints the dense width/height footprint of an object whose peak was just
    /// drawn into `hm`. Does nothing unless the layout is dense.
    pub fn paint_dense(
        &mut self,
        hm: &Array3<f32>,
        center: [usize; 2],
        width: f64,
        height: f64,
        radius: usize,
    ) {
        if let WhTarget::Dense { wh, .. } = &mut self.wh {
            let peak = peak_map(hm);
            draw_dense_reg(wh, peak.view(), center, [width as f32, height as f32], radius);
        }
    }

    /// Finishes the targets. The dense mask repeats the class maximum of `hm`.
    pub fn finish(self, hm: &Array3<f32>) -> RegressionArrays {
        let Self {
            mut wh,
            reg,
            ind,
            reg_mask,
            ..
        } = self;

        if let WhTarget::Dense { mask, .. } = &mut wh {
            let peak = peak_map(hm);
            mask.outer_iter_mut()
                .for_each(|mut plane| plane.assign(&peak));
        }

        let num_objects = reg_mask.iter().filter(|&&valid| valid != 0).count();

        RegressionArrays {
            wh,
            reg,
            ind,
            reg_mask,
            num_objects,
        }
    }
}

/// The maximum over classes of a `[C, H, W]` heatmap.
pub fn peak_map(hm: &Array3<f32>) -> Array2<f32> {
    hm.fold_axis(Axis(0), 0.0, |&max, &value| max.max(value))
}
