//! Per-sample crop, scale, rotation and flip decisions.

use super::PatchSchedule;
use crate::{common::*, config::Split};
use bbox::{Affine, Scale, HW};
use rand_distr::StandardNormal;

/// Multiplicative scale perturbations for random cropping.
pub const SCALE_FACTORS: [f64; 8] = [0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3];

/// How the model input resolution is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A configured input size, replaced by the patch schedule at training time.
    Fixed(HW<usize>),
    /// The image size rounded up by `(side | pad) + 1`.
    Native { pad: usize },
}

/// The training time crop perturbation.
#[derive(Debug, Clone, PartialEq)]
pub enum CropJitter {
    /// Pick a scale factor from [SCALE_FACTORS] and a center away from the image border.
    RandomCrop { border: usize },
    /// Perturb center and scale by clipped Gaussian noise.
    Gaussian { scale: f64, shift: f64 },
}

/// Augmentation sampler initializer.
#[derive(Debug, Clone)]
pub struct AugmentSamplerInit {
    pub split: Split,
    pub resolution: Resolution,
    pub down_ratio: NonZeroUsize,
    pub jitter: CropJitter,
    pub flip_prob: f64,
    /// The maximum rotation in degrees and the probability to rotate.
    pub rotation: Option<(f64, f64)>,
    pub schedule: Option<Arc<PatchSchedule>>,
}

impl AugmentSamplerInit {
    pub fn build(self) -> Result<AugmentSampler> {
        let Self {
            split,
            resolution,
            down_ratio,
            jitter,
            flip_prob,
            rotation,
            schedule,
        } = self;

        match resolution {
            Resolution::Fixed(ref size) => {
                ensure!(
                    size.h() >= down_ratio.get() && size.w() >= down_ratio.get(),
                    "input size {}x{} is smaller than the down ratio {}",
                    size.h(),
                    size.w(),
                    down_ratio
                );
            }
            Resolution::Native { pad } => {
                ensure!(
                    (pad + 1).is_power_of_two(),
                    "pad must be one less than a power of two, but get {}",
                    pad
                );
                ensure!(
                    pad + 1 >= down_ratio.get(),
                    "padded size must not be smaller than the down ratio"
                );
                ensure!(
                    schedule.is_none(),
                    "the patch schedule cannot be used with native resolution"
                );
            }
        }

        if let CropJitter::Gaussian { scale, shift } = jitter {
            ensure!(
                (0.0..1.0).contains(&scale),
                "scale jitter must be in range [0.0, 1.0), but get {}",
                scale
            );
            ensure!(shift >= 0.0, "shift jitter must be non-negative");
        }

        ensure!(
            (0.0..=1.0).contains(&flip_prob),
            "flip_prob must be in range [0.0, 1.0]"
        );

        if let Some((max_degrees, prob)) = rotation {
            ensure!(max_degrees >= 0.0, "rotation must be non-negative");
            ensure!(
                (0.0..=1.0).contains(&prob),
                "rotation_prob must be in range [0.0, 1.0]"
            );
        }

        Ok(AugmentSampler {
            split,
            resolution,
            down_ratio: down_ratio.get(),
            jitter,
            flip_prob,
            rotation,
            schedule,
        })
    }
}

/// The geometry decided for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentParams {
    /// The crop center in source image pixels, after flipping.
    pub center: [f64; 2],
    pub scale: Scale,
    /// In-plane rotation in degrees.
    pub rotation: f64,
    pub flipped: bool,
    pub input_size: HW<usize>,
    pub output_size: HW<usize>,
}

impl AugmentParams {
    /// Source image to model input.
    pub fn input_transform(&self) -> Affine {
        Affine::from_center_scale(self.center, self.scale, self.rotation, &self.input_size)
    }

    /// Source image to the target grid.
    pub fn output_transform(&self) -> Affine {
        Affine::from_center_scale(self.center, self.scale, self.rotation, &self.output_size)
    }
}

/// Decides crop center, scale, rotation, flip and input size per sample.
#[derive(Debug, Clone)]
pub struct AugmentSampler {
    split: Split,
    resolution: Resolution,
    down_ratio: usize,
    jitter: CropJitter,
    flip_prob: f64,
    rotation: Option<(f64, f64)>,
    schedule: Option<Arc<PatchSchedule>>,
}

impl AugmentSampler {
    pub fn split(&self) -> Split {
        self.split
    }

    pub fn schedule(&self) -> Option<&PatchSchedule> {
        self.schedule.as_deref()
    }

    /// The deterministic geometry: image center, full extent, no rotation or flip.
    pub fn fixed(&self, image_size: &HW<usize>) -> Result<AugmentParams> {
        let (img_h, img_w) = (image_size.h(), image_size.w());
        ensure!(
            img_h > 0 && img_w > 0,
            "image size must be positive, but get {}x{}",
            img_h,
            img_w
        );

        let center = [img_w as f64 / 2.0, img_h as f64 / 2.0];
        let (scale, input_size) = match self.resolution {
            Resolution::Native { pad } => {
                let input_h = (img_h | pad) + 1;
                let input_w = (img_w | pad) + 1;
                let scale = Scale::Anisotropic {
                    w: input_w as f64,
                    h: input_h as f64,
                };
                (scale, HW::from_hw([input_h, input_w]))
            }
            Resolution::Fixed(size) => (Scale::Isotropic(img_h.max(img_w) as f64), size),
        };

        self.params(center, scale, 0.0, false, input_size)
    }

    /// Draws the geometry of one sample. Only the training split is randomized.
    pub fn sample<R>(&self, image_size: &HW<usize>, rng: &mut R) -> Result<AugmentParams>
    where
        R: Rng,
    {
        let fixed = self.fixed(image_size)?;
        if !self.split.is_train() {
            return Ok(fixed);
        }

        let (img_h, img_w) = (image_size.h(), image_size.w());
        let AugmentParams {
            mut center,
            mut scale,
            mut input_size,
            ..
        } = fixed;

        if let Some(schedule) = &self.schedule {
            let side = schedule.next_size();
            input_size = HW::from_hw([side, side]);
        }

        match self.jitter {
            CropJitter::RandomCrop { border } => {
                let factor = SCALE_FACTORS[rng.gen_range(0..SCALE_FACTORS.len())];
                scale = scale.scaled(factor);

                let w_border = crop_border(border, img_w);
                let h_border = crop_border(border, img_h);
                center[0] = rng.gen_range(w_border..(img_w - w_border)) as f64;
                center[1] = rng.gen_range(h_border..(img_h - h_border)) as f64;
            }
            CropJitter::Gaussian {
                scale: scale_jitter,
                shift,
            } => {
                let mut clipped_normal = |sigma: f64| {
                    let noise: f64 = rng.sample(StandardNormal);
                    (noise * sigma).max(-2.0 * sigma).min(2.0 * sigma)
                };
                center[0] += scale.w() * clipped_normal(shift);
                center[1] += scale.h() * clipped_normal(shift);

                let noise: f64 = rng.sample(StandardNormal);
                let factor = (noise * scale_jitter + 1.0)
                    .max(1.0 - scale_jitter)
                    .min(1.0 + scale_jitter);
                scale = scale.scaled(factor);
            }
        }

        let rotation = match self.rotation {
            Some((max_degrees, prob)) if rng.gen::<f64>() < prob => {
                rng.gen_range(-max_degrees..=max_degrees)
            }
            _ => 0.0,
        };

        let flipped = rng.gen::<f64>() < self.flip_prob;
        if flipped {
            center[0] = img_w as f64 - center[0] - 1.0;
        }

        self.params(center, scale, rotation, flipped, input_size)
    }

    fn params(
        &self,
        center: [f64; 2],
        scale: Scale,
        rotation: f64,
        flipped: bool,
        input_size: HW<usize>,
    ) -> Result<AugmentParams> {
        let output_size = input_size.div_floor(self.down_ratio);
        ensure!(
            output_size.h() > 0 && output_size.w() > 0,
            "input size {}x{} is too small for down ratio {}",
            input_size.h(),
            input_size.w(),
            self.down_ratio
        );

        Ok(AugmentParams {
            center,
            scale,
            rotation,
            flipped,
            input_size,
            output_size,
        })
    }
}

/// Halves `border` until the interval `[border, size - border)` is non-empty.
fn crop_border(border: usize, size: usize) -> usize {
    let mut border = border;
    while border > 0 && size <= border * 2 {
        border /= 2;
    }
    border
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sampler(split: Split, jitter: CropJitter, flip_prob: f64) -> AugmentSampler {
        AugmentSamplerInit {
            split,
            resolution: Resolution::Fixed(HW::from_hw([512, 512])),
            down_ratio: NonZeroUsize::new(4).unwrap(),
            jitter,
            flip_prob,
            rotation: None,
            schedule: None,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn crop_border_halving() {
        assert_eq!(crop_border(128, 640), 128);
        assert_eq!(crop_border(128, 256), 64);
        assert_eq!(crop_border(128, 100), 32);
        assert_eq!(crop_border(128, 1), 0);
    }

    #[test]
    fn eval_geometry_is_deterministic() -> Result<()> {
        let sampler = sampler(Split::Val, CropJitter::RandomCrop { border: 128 }, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        let params = sampler.sample(&HW::from_hw([480, 640]), &mut rng)?;

        assert_eq!(params.center, [320.0, 240.0]);
        assert_eq!(params.scale, Scale::Isotropic(640.0));
        assert_eq!(params.rotation, 0.0);
        assert!(!params.flipped);
        assert_eq!(params.input_size, HW::from_hw([512, 512]));
        assert_eq!(params.output_size, HW::from_hw([128, 128]));
        Ok(())
    }

    #[test]
    fn native_resolution_padding() -> Result<()> {
        let sampler = AugmentSamplerInit {
            split: Split::Test,
            resolution: Resolution::Native { pad: 31 },
            down_ratio: NonZeroUsize::new(4).unwrap(),
            jitter: CropJitter::RandomCrop { border: 128 },
            flip_prob: 0.0,
            rotation: None,
            schedule: None,
        }
        .build()?;
        let params = sampler.fixed(&HW::from_hw([480, 500]))?;

        assert_eq!(params.input_size, HW::from_hw([512, 512]));
        assert_eq!(params.output_size, HW::from_hw([128, 128]));
        assert_eq!(params.scale, Scale::Anisotropic { w: 512.0, h: 512.0 });
        Ok(())
    }

    #[test]
    fn random_crop_stays_inside_border() -> Result<()> {
        let sampler = sampler(Split::Train, CropJitter::RandomCrop { border: 128 }, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let size = HW::from_hw([300, 400]);

        for _ in 0..200 {
            let params = sampler.sample(&size, &mut rng)?;
            let [cx, cy] = params.center;
            assert!((128.0..272.0).contains(&cx));
            assert!((128.0..172.0).contains(&cy));

            let factor = params.scale.w() / 400.0;
            assert!(SCALE_FACTORS
                .iter()
                .any(|&expect| (expect - factor).abs() < 1e-9));
        }
        Ok(())
    }

    #[test]
    fn gaussian_jitter_is_clipped() -> Result<()> {
        let jitter = CropJitter::Gaussian {
            scale: 0.4,
            shift: 0.1,
        };
        let sampler = sampler(Split::Train, jitter, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let size = HW::from_hw([200, 200]);

        for _ in 0..200 {
            let params = sampler.sample(&size, &mut rng)?;
            let [cx, cy] = params.center;
            assert!((cx - 100.0).abs() <= 200.0 * 0.2 + 1e-9);
            assert!((cy - 100.0).abs() <= 200.0 * 0.2 + 1e-9);
            let factor = params.scale.w() / 200.0;
            assert!((0.6 - 1e-9..=1.4 + 1e-9).contains(&factor));
        }
        Ok(())
    }

    #[test]
    fn flip_mirrors_center() -> Result<()> {
        let jitter = CropJitter::Gaussian {
            scale: 0.0,
            shift: 0.0,
        };
        let sampler = sampler(Split::Train, jitter, 1.0);
        let mut rng = StdRng::seed_from_u64(5);
        let params = sampler.sample(&HW::from_hw([100, 200]), &mut rng)?;

        assert!(params.flipped);
        assert_abs_diff_eq!(params.center[0], 200.0 - 100.0 - 1.0);
        assert_abs_diff_eq!(params.center[1], 50.0);
        Ok(())
    }

    #[test]
    fn schedule_drives_training_resolution() -> Result<()> {
        let schedule = Arc::new(PatchSchedule::new(
            128,
            NonZeroUsize::new(1).unwrap(),
            1000,
        )?);
        let sampler = AugmentSamplerInit {
            split: Split::Train,
            resolution: Resolution::Fixed(HW::from_hw([128, 128])),
            down_ratio: NonZeroUsize::new(4).unwrap(),
            jitter: CropJitter::RandomCrop { border: 128 },
            flip_prob: 0.5,
            rotation: None,
            schedule: Some(schedule),
        }
        .build()?;
        let mut rng = StdRng::seed_from_u64(0);
        let size = HW::from_hw([300, 300]);

        let first = sampler.sample(&size, &mut rng)?;
        let second = sampler.sample(&size, &mut rng)?;
        assert_eq!(first.input_size, HW::from_hw([128, 128]));
        assert_eq!(second.input_size, HW::from_hw([256, 256]));
        assert_eq!(second.output_size, HW::from_hw([64, 64]));
        Ok(())
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        let sampler = sampler(Split::Train, CropJitter::RandomCrop { border: 128 }, 0.5);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sampler.sample(&HW::from_hw([0, 10]), &mut rng).is_err());
    }
}
