//! Encoder configuration format.

use crate::{common::*, ratio::Ratio};

/// The dataset split. Only the training split draws random augmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train)
    }
}

/// The loss the heatmap is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeatmapLoss {
    /// Focal loss: elliptical peaks with per-axis radii.
    Focal,
    /// Squared error: circular peaks of a fixed Gaussian sigma (4 unless given),
    /// or of the object's overlap radius when `sigma` is `null`.
    SquaredError {
        #[serde(default = "default_hm_gauss")]
        sigma: Option<usize>,
    },
}

/// The width/height regression target layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhMode {
    /// `[M, 2]` per-object width and height.
    Plain,
    /// `[M, 2C]` width and height written into the object's class columns.
    CategorySpecific,
    /// `[2, H, W]` width and height painted over each object's peak footprint.
    Dense,
}

/// The encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// The number of object classes.
    pub num_classes: NonZeroUsize,
    /// The model input height in pixels.
    #[serde(default = "default_input_side")]
    pub input_h: usize,
    /// The model input width in pixels.
    #[serde(default = "default_input_side")]
    pub input_w: usize,
    /// The ratio between input and output grid sizes.
    #[serde(default = "default_down_ratio")]
    pub down_ratio: NonZeroUsize,
    /// The batch size. The training resolution changes once per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    /// If set, the input keeps the native image resolution padded by `pad`.
    #[serde(default)]
    pub keep_resolution: bool,
    #[serde(default = "default_pad")]
    pub pad: usize,
    /// The probability to apply horizontal flip.
    #[serde(default = "default_flip_prob")]
    pub flip_prob: Ratio,
    /// The scale jitter magnitude when random cropping is disabled.
    #[serde(default = "default_scale")]
    pub scale: R64,
    /// The center shift magnitude when random cropping is disabled.
    #[serde(default = "default_shift")]
    pub shift: R64,
    /// Sample crop center and scale randomly at training time.
    #[serde(default = "default_true")]
    pub random_crop: bool,
    /// The image border excluded from crop center sampling.
    #[serde(default = "default_crop_border")]
    pub crop_border: usize,
    /// The maximum in-plane rotation in degrees.
    #[serde(default)]
    pub rotation: Option<R64>,
    /// The probability to apply rotation when `rotation` is set.
    #[serde(default = "default_rotation_prob")]
    pub rotation_prob: Ratio,
    /// Apply color augmentation at training time.
    #[serde(default = "default_true")]
    pub color_aug: bool,
    /// Per-channel mean in BGR order.
    #[serde(default = "default_mean")]
    pub mean: [R64; 3],
    /// Per-channel standard deviation in BGR order.
    #[serde(default = "default_std")]
    pub std: [R64; 3],
    #[serde(default = "default_loss")]
    pub loss: HeatmapLoss,
    #[serde(default = "default_wh_mode")]
    pub wh_mode: WhMode,
    /// Legacy toggle equivalent to `wh_mode: "dense"`.
    #[serde(default)]
    pub dense_wh: bool,
    /// Legacy toggle equivalent to `wh_mode: "category_specific"`.
    #[serde(default)]
    pub cat_spec_wh: bool,
    /// Emit the sub-pixel center offset target.
    #[serde(default = "default_true")]
    pub reg_offset: bool,
    /// The number of part channels. Only the 3x3 grid is supported.
    #[serde(default = "default_num_part_channels")]
    pub num_part_channels: usize,
    /// The number of size level channels.
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
    /// Masks whose box is narrower than this in output pixels skip the part-mask grid.
    #[serde(default = "default_min_mask_roi")]
    pub min_mask_roi: usize,
    /// The capacity of per-object targets.
    #[serde(default = "default_max_objects")]
    pub max_objects: NonZeroUsize,
    /// The minimum IoU kept by the peak radius formula.
    #[serde(default = "default_min_overlap")]
    pub min_overlap: Ratio,
    /// If set, sample `i` draws its randomness from a generator seeded by `seed + i`.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl EncoderConfig {
    /// Creates the default configuration for `num_classes` classes.
    pub fn new(num_classes: NonZeroUsize) -> Self {
        Self {
            num_classes,
            input_h: default_input_side(),
            input_w: default_input_side(),
            down_ratio: default_down_ratio(),
            batch_size: default_batch_size(),
            keep_resolution: false,
            pad: default_pad(),
            flip_prob: default_flip_prob(),
            scale: default_scale(),
            shift: default_shift(),
            random_crop: true,
            crop_border: default_crop_border(),
            rotation: None,
            rotation_prob: default_rotation_prob(),
            color_aug: true,
            mean: default_mean(),
            std: default_std(),
            loss: default_loss(),
            wh_mode: default_wh_mode(),
            dense_wh: false,
            cat_spec_wh: false,
            reg_offset: true,
            num_part_channels: default_num_part_channels(),
            num_levels: default_num_levels(),
            min_mask_roi: default_min_mask_roi(),
            max_objects: default_max_objects(),
            min_overlap: default_min_overlap(),
            seed: None,
        }
    }

    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Resolves the width/height layout from `wh_mode` and the legacy toggles.
    pub fn resolved_wh_mode(&self) -> Result<WhMode> {
        let mode = match (self.dense_wh, self.cat_spec_wh) {
            (true, true) => bail!("dense_wh and cat_spec_wh are mutually exclusive"),
            (true, false) => WhMode::Dense,
            (false, true) => WhMode::CategorySpecific,
            (false, false) => return Ok(self.wh_mode),
        };
        ensure!(
            matches!(self.wh_mode, WhMode::Plain) || self.wh_mode == mode,
            "wh_mode {:?} contradicts the legacy toggle selecting {:?}",
            self.wh_mode,
            mode
        );
        Ok(mode)
    }
}

fn default_true() -> bool {
    true
}

fn default_input_side() -> usize {
    512
}

fn default_down_ratio() -> NonZeroUsize {
    NonZeroUsize::new(4).unwrap()
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(32).unwrap()
}

fn default_pad() -> usize {
    31
}

fn default_flip_prob() -> Ratio {
    Ratio::try_from(0.5).unwrap()
}

fn default_scale() -> R64 {
    r64(0.4)
}

fn default_shift() -> R64 {
    r64(0.1)
}

fn default_crop_border() -> usize {
    128
}

fn default_rotation_prob() -> Ratio {
    Ratio::try_from(0.0).unwrap()
}

fn default_mean() -> [R64; 3] {
    [r64(0.40789654), r64(0.44719302), r64(0.47026115)]
}

fn default_std() -> [R64; 3] {
    [r64(0.28863828), r64(0.27408164), r64(0.27809835)]
}

fn default_loss() -> HeatmapLoss {
    HeatmapLoss::Focal
}

fn default_hm_gauss() -> Option<usize> {
    Some(4)
}

fn default_wh_mode() -> WhMode {
    WhMode::Plain
}

fn default_num_part_channels() -> usize {
    9
}

fn default_num_levels() -> usize {
    6
}

fn default_min_mask_roi() -> usize {
    6
}

fn default_max_objects() -> NonZeroUsize {
    NonZeroUsize::new(128).unwrap()
}

fn default_min_overlap() -> Ratio {
    Ratio::try_from(0.7).unwrap()
}
