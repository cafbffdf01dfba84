//! The encoded training target of one sample.

use crate::common::*;
use bbox::Scale;
use ndarray::ArrayViewD;

/// The width/height target in the configured layout.
#[derive(Debug, Clone, PartialEq)]
pub enum WhTarget {
    /// `wh`: `[M, 2]`.
    Plain { wh: Array2<f32> },
    /// `cat_spec_wh` and `cat_spec_mask`: `[M, 2C]`.
    CategorySpecific { wh: Array2<f32>, mask: Array2<u8> },
    /// `dense_wh` and `dense_wh_mask`: `[2, H, W]`.
    Dense { wh: Array3<f32>, mask: Array3<f32> },
}

/// Sample geometry and ground truth kept for evaluation splits.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMeta {
    pub center: [f64; 2],
    pub scale: Scale,
    pub image_id: u64,
    /// `[N, 6]` rows of `[x1, y1, x2, y2, 1, class]` in output pixels.
    /// A single zero row when the sample has no object.
    pub gt_det: Array2<f32>,
}

/// A borrowed bundle entry.
#[derive(Debug, Clone)]
pub enum TargetArray<'a> {
    F32(ArrayViewD<'a, f32>),
    U8(ArrayViewD<'a, u8>),
    I64(ArrayViewD<'a, i64>),
}

impl<'a> TargetArray<'a> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(array) => array.shape(),
            Self::U8(array) => array.shape(),
            Self::I64(array) => array.shape(),
        }
    }
}

/// The dense arrays consumed by the detector losses.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBundle {
    /// `[3, in_h, in_w]` normalized input image.
    pub input: Array3<f32>,
    /// `[C, H, W]` class confidence peaks in `[0, 1]`.
    pub hm: Array3<f32>,
    /// `[M]` slot validity.
    pub reg_mask: Array1<u8>,
    /// `[M]` flat grid index.
    pub ind: Array1<i64>,
    pub wh: WhTarget,
    /// `[M, 2]` center offset, present when offset regression is enabled.
    pub reg: Option<Array2<f32>>,
    /// `[9 + L, H, W]` binary part and size level channels.
    pub allmask: Array3<f32>,
    pub meta: Option<SampleMeta>,
    /// The number of objects recorded in `reg_mask`.
    pub num_objects: usize,
}

impl TargetBundle {
    /// Lists the arrays by entry name.
    pub fn named_arrays(&self) -> IndexMap<&'static str, TargetArray<'_>> {
        let mut entries = IndexMap::new();

        entries.insert("input", TargetArray::F32(self.input.view().into_dyn()));
        entries.insert("hm", TargetArray::F32(self.hm.view().into_dyn()));
        entries.insert("reg_mask", TargetArray::U8(self.reg_mask.view().into_dyn()));
        entries.insert("ind", TargetArray::I64(self.ind.view().into_dyn()));

        match &self.wh {
            WhTarget::Plain { wh } => {
                entries.insert("wh", TargetArray::F32(wh.view().into_dyn()));
            }
            WhTarget::CategorySpecific { wh, mask } => {
                entries.insert("cat_spec_wh", TargetArray::F32(wh.view().into_dyn()));
                entries.insert("cat_spec_mask", TargetArray::U8(mask.view().into_dyn()));
            }
            WhTarget::Dense { wh, mask } => {
                entries.insert("dense_wh", TargetArray::F32(wh.view().into_dyn()));
                entries.insert("dense_wh_mask", TargetArray::F32(mask.view().into_dyn()));
            }
        }

        if let Some(reg) = &self.reg {
            entries.insert("reg", TargetArray::F32(reg.view().into_dyn()));
        }
        entries.insert("allmask", TargetArray::F32(self.allmask.view().into_dyn()));

        entries
    }

    /// The heatmap value at `[x, y]` maximized over classes.
    pub fn peak_at(&self, point: [usize; 2]) -> Option<f32> {
        let [x, y] = point;
        let (_, height, width) = self.hm.dim();
        (x < width && y < height).then(|| {
            self.hm
                .slice(s![.., y, x])
                .fold(0.0, |max: f32, &value| max.max(value))
        })
    }

    /// Converts the entries into tensors in the same order as [named_arrays](Self::named_arrays).
    #[cfg(feature = "with-tch")]
    pub fn to_tensors(&self) -> Result<IndexMap<&'static str, tch::Tensor>> {
        fn to_tensor<T>(array: &ArrayViewD<'_, T>) -> Result<tch::Tensor>
        where
            T: tch::kind::Element + Clone,
        {
            let shape: Vec<i64> = array.shape().iter().map(|&size| size as i64).collect();
            let array = array.as_standard_layout();
            let slice = array
                .as_slice()
                .ok_or_else(|| format_err!("array is not contiguous"))?;
            Ok(tch::Tensor::of_slice(slice).view(shape.as_slice()))
        }

        self.named_arrays()
            .into_iter()
            .map(|(name, array)| {
                let tensor = match &array {
                    TargetArray::F32(array) => to_tensor(array)?,
                    TargetArray::U8(array) => to_tensor(array)?,
                    TargetArray::I64(array) => to_tensor(array)?,
                };
                Ok((name, tensor))
            })
            .collect()
    }
}

/// The detection rows of `gt_det`, padded with a single zero row when empty.
pub fn gt_det_array(rows: &[[f32; 6]]) -> Array2<f32> {
    if rows.is_empty() {
        return Array2::zeros((1, 6));
    }
    Array2::from_shape_fn((rows.len(), 6), |(row, col)| rows[row][col])
}
