//! The per-sample target encoding pipeline.

use crate::{
    common::*,
    config::{EncoderConfig, Split, WhMode},
    dataset::{AnnotationStore, ImageDecoder, Sample},
    processor::{
        hflip_image, hflip_mask, warp_image, warp_mask, AugmentParams, AugmentSampler,
        AugmentSamplerInit, ColorAug, ColorAugInit, CropJitter, PatchSchedule, Resolution,
    },
    sink::{DebugSink, NoopSink},
    target::{
        gt_det_array, HeatmapRenderer, PartMaskGrid, RegressionArrays, RegressionTargets,
        SampleMeta, TargetBundle, NUM_PART_CHANNELS,
    },
};
use bbox::{prelude::*, HW};

/// Encoder initializer.
#[derive(Debug, Clone)]
pub struct TargetEncoderInit {
    pub config: EncoderConfig,
    pub split: Split,
    /// The number of samples per epoch, after which the patch schedule restarts.
    pub num_samples: usize,
}

impl TargetEncoderInit {
    /// Validates the configuration and builds the encoder.
    pub fn build(self) -> Result<TargetEncoder> {
        let Self {
            config,
            split,
            num_samples,
        } = self;

        ensure!(
            config.num_part_channels == NUM_PART_CHANNELS,
            "num_part_channels must be {}, but get {}",
            NUM_PART_CHANNELS,
            config.num_part_channels
        );
        ensure!(
            config.num_levels >= 2,
            "num_levels must be at least 2, but get {}",
            config.num_levels
        );
        ensure!(
            config.input_h > 0 && config.input_w > 0,
            "input size must be positive, but get {}x{}",
            config.input_h,
            config.input_w
        );
        ensure!(
            config.std.iter().all(|&std| std > 0.0),
            "std must be positive, but get {:?}",
            config.std
        );
        ensure!(config.min_mask_roi > 0, "min_mask_roi must be positive");
        let wh_mode = config.resolved_wh_mode()?;

        let resolution = if config.keep_resolution {
            Resolution::Native { pad: config.pad }
        } else {
            Resolution::Fixed(HW::try_positive([config.input_h, config.input_w])?)
        };

        let schedule = match (split, config.keep_resolution) {
            (Split::Train, false) => {
                let schedule = PatchSchedule::new(config.input_w, config.batch_size, num_samples)?;
                info!("training input sides {:?}", schedule.ladder());
                Some(Arc::new(schedule))
            }
            _ => None,
        };

        let jitter = if config.random_crop {
            CropJitter::RandomCrop {
                border: config.crop_border,
            }
        } else {
            CropJitter::Gaussian {
                scale: config.scale.raw(),
                shift: config.shift.raw(),
            }
        };

        let sampler = AugmentSamplerInit {
            split,
            resolution,
            down_ratio: config.down_ratio,
            jitter,
            flip_prob: config.flip_prob.to_f64(),
            rotation: config
                .rotation
                .map(|max_degrees| (max_degrees.raw(), config.rotation_prob.to_f64())),
            schedule,
        }
        .build()?;

        let renderer = HeatmapRenderer::new(config.loss.into(), config.min_overlap.to_f64())?;

        let color_aug = (split.is_train() && config.color_aug)
            .then(|| ColorAugInit::default().build())
            .transpose()?;

        let mean = config.mean.map(|value| value.raw() as f32);
        let std = config.std.map(|value| value.raw() as f32);

        Ok(TargetEncoder {
            config,
            split,
            wh_mode,
            sampler,
            renderer,
            color_aug,
            mean,
            std,
            sink: Arc::new(NoopSink),
        })
    }
}

/// Turns annotated samples into [TargetBundle]s.
pub struct TargetEncoder {
    config: EncoderConfig,
    split: Split,
    wh_mode: WhMode,
    sampler: AugmentSampler,
    renderer: HeatmapRenderer,
    color_aug: Option<ColorAug>,
    mean: [f32; 3],
    std: [f32; 3],
    sink: Arc<dyn DebugSink>,
}

impl TargetEncoder {
    /// Sets the sink that observes every finished bundle.
    pub fn with_sink(self, sink: Arc<dyn DebugSink>) -> Self {
        Self { sink, ..self }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn wh_mode(&self) -> WhMode {
        self.wh_mode
    }

    pub fn sampler(&self) -> &AugmentSampler {
        &self.sampler
    }

    pub fn schedule(&self) -> Option<&PatchSchedule> {
        self.sampler.schedule()
    }

    /// The random generator of sample `index`. It is seeded by `seed + index`
    /// if a seed is configured, and from entropy otherwise.
    pub fn rng_for(&self, index: usize) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Loads sample `index` from the store and encodes it.
    pub fn encode_index<S, D>(&self, store: &S, decoder: &D, index: usize) -> Result<TargetBundle>
    where
        S: AnnotationStore + ?Sized,
        D: ImageDecoder + ?Sized,
    {
        let sample = Sample::load(store, decoder, index, self.config.max_objects.get())
            .with_context(|| format!("unable to load sample {}", index))?;
        let mut rng = self.rng_for(index);
        self.encode(&sample, index, &mut rng)
            .with_context(|| format!("unable to encode image {}", sample.image_id))
    }

    /// Draws the sample geometry and encodes the sample.
    pub fn encode<R>(&self, sample: &Sample, index: usize, rng: &mut R) -> Result<TargetBundle>
    where
        R: Rng,
    {
        let params = self.sampler.sample(&sample.size(), rng)?;
        self.encode_with_params(sample, index, &params, rng)
    }

    /// Encodes the sample with the given geometry. The generator is only used
    /// by color augmentation.
    pub fn encode_with_params<R>(
        &self,
        sample: &Sample,
        index: usize,
        params: &AugmentParams,
        rng: &mut R,
    ) -> Result<TargetBundle>
    where
        R: Rng,
    {
        let image_size = sample.size();
        let (img_h, img_w) = (image_size.h(), image_size.w());
        ensure!(
            img_h > 0 && img_w > 0,
            "image {} is empty",
            sample.image_id
        );
        ensure!(
            sample.image.dim().2 == 3,
            "image {} must have 3 channels, but get {}",
            sample.image_id,
            sample.image.dim().2
        );

        let num_classes = self.config.num_classes.get();
        let max_objects = self.config.max_objects.get();
        let output_size = params.output_size;
        let (out_h, out_w) = (output_size.h(), output_size.w());
        let output_transform = params.output_transform();

        let input = self.prepare_input(sample, params, rng)?;

        let mut hm = Array3::<f32>::zeros((num_classes, out_h, out_w));
        let mut regression = RegressionTargets::new(self.wh_mode, max_objects, num_classes, output_size);
        let mut part_grid = PartMaskGrid::new(self.config.num_levels, self.config.min_mask_roi, &output_size)?;
        let mut gt_det = vec![];

        for (slot, object) in sample.objects.iter().enumerate().take(max_objects) {
            let class = object.label.class;
            ensure!(
                class < num_classes,
                "object {} of image {} has class index {}, but only {} classes are configured",
                slot,
                sample.image_id,
                class,
                num_classes
            );
            ensure!(
                object.mask.dim() == (img_h, img_w),
                "mask size {:?} of object {} does not match the image size {:?}",
                object.mask.dim(),
                slot,
                (img_h, img_w)
            );

            let label = if params.flipped {
                object.label.hflip(img_w as f64)
            } else {
                object.label.clone()
            };
            let rect = (&output_transform * &label)
                .rect
                .clamp_to(&output_size.cast::<f64>());
            let (height, width) = (rect.h(), rect.w());
            if !(height > 0.0 && width > 0.0) {
                trace!(
                    "skip degenerate object {} of image {}",
                    slot,
                    sample.image_id
                );
                continue;
            }

            // part and size level channels
            {
                let warped = if params.flipped {
                    let mask = hflip_mask(object.mask.view());
                    warp_mask(mask.view(), &output_transform, &output_size)?
                } else {
                    warp_mask(object.mask.view(), &output_transform, &output_size)?
                };
                let roi = [
                    rect.l() as usize,
                    rect.t() as usize,
                    rect.r() as usize,
                    rect.b() as usize,
                ];
                if !part_grid.accumulate(warped.view(), roi)? {
                    trace!(
                        "skip mask of object {} of image {} with box {:?}",
                        slot,
                        sample.image_id,
                        roi
                    );
                }
            }

            let center = [rect.cx(), rect.cy()];
            let center_int = [center[0].floor() as usize, center[1].floor() as usize];
            let radius = self.renderer.draw(
                hm.index_axis_mut(Axis(0), class),
                center_int,
                height,
                width,
            );
            regression.record(slot, class, center, width, height)?;
            regression.paint_dense(&hm, center_int, width, height, radius);

            gt_det.push([
                (center[0] - width / 2.0) as f32,
                (center[1] - height / 2.0) as f32,
                (center[0] + width / 2.0) as f32,
                (center[1] + height / 2.0) as f32,
                1.0,
                class as f32,
            ]);
        }

        let RegressionArrays {
            wh,
            reg,
            ind,
            reg_mask,
            num_objects,
        } = regression.finish(&hm);

        let meta = (!self.split.is_train()).then(|| SampleMeta {
            center: params.center,
            scale: params.scale,
            image_id: sample.image_id,
            gt_det: gt_det_array(&gt_det),
        });

        let bundle = TargetBundle {
            input,
            hm,
            reg_mask,
            ind,
            wh,
            reg: self.config.reg_offset.then(|| reg),
            allmask: part_grid.into_array(),
            meta,
            num_objects,
        };

        debug!(
            "encoded image {} with {} of {} objects at input size {}x{}",
            sample.image_id,
            num_objects,
            sample.objects.len(),
            params.input_size.h(),
            params.input_size.w()
        );

        if let Err(err) = self.sink.observe(index, &bundle) {
            warn!("debug sink failed on sample {}: {:?}", index, err);
        }

        Ok(bundle)
    }

    /// Flips, warps, color distorts and normalizes the image into `[3, H, W]`.
    fn prepare_input<R>(&self, sample: &Sample, params: &AugmentParams, rng: &mut R) -> Result<Array3<f32>>
    where
        R: Rng,
    {
        let flipped_image;
        let image = if params.flipped {
            flipped_image = hflip_image(sample.image.view());
            flipped_image.view()
        } else {
            sample.image.view()
        };

        let image = image.mapv(|value| value as f32 / 255.0);
        let mut input = warp_image(image.view(), &params.input_transform(), &params.input_size)?;

        if let Some(color_aug) = &self.color_aug {
            color_aug.forward(&mut input, rng)?;
        }

        let (mean, std) = (self.mean, self.std);
        input.lanes_mut(Axis(2)).into_iter().for_each(|mut pixel| {
            izip!(pixel.iter_mut(), &mean, &std).for_each(|(value, mean, std)| {
                *value = (*value - mean) / std;
            });
        });

        Ok(input.permuted_axes([2, 0, 1]).as_standard_layout().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HeatmapLoss, dataset::SampleObject, target::WhTarget};
    use approx::assert_abs_diff_eq;
    use bbox::TLBR;
    use label::Label;

    fn config() -> EncoderConfig {
        let mut config = EncoderConfig::new(NonZeroUsize::new(2).unwrap());
        config.input_h = 64;
        config.input_w = 64;
        config.max_objects = NonZeroUsize::new(4).unwrap();
        config.seed = Some(5);
        config
    }

    fn sample() -> Sample {
        let mut mask = Array2::zeros((64, 64));
        mask.slice_mut(s![8..40, 16..48]).fill(1);
        Sample {
            image_id: 9,
            image: Array3::from_elem((64, 64, 3), 128),
            objects: vec![SampleObject {
                label: Label {
                    rect: TLBR::from_tlbr([8.0, 16.0, 40.0, 48.0]),
                    class: 1,
                },
                mask,
            }],
        }
    }

    #[test]
    fn build_rejects_bad_config() {
        let mut bad = config();
        bad.num_part_channels = 12;
        let init = |config| TargetEncoderInit {
            config,
            split: Split::Val,
            num_samples: 10,
        };
        assert!(init(bad).build().is_err());

        let mut bad = config();
        bad.num_levels = 1;
        assert!(init(bad).build().is_err());

        let mut bad = config();
        bad.dense_wh = true;
        bad.cat_spec_wh = true;
        assert!(init(bad).build().is_err());
    }

    #[test]
    fn val_encoding_layout() -> Result<()> {
        let encoder = TargetEncoderInit {
            config: config(),
            split: Split::Val,
            num_samples: 1,
        }
        .build()?;
        let sample = sample();
        let bundle = encoder.encode(&sample, 0, &mut encoder.rng_for(0))?;

        assert_eq!(bundle.input.dim(), (3, 64, 64));
        assert_eq!(bundle.hm.dim(), (2, 16, 16));
        assert_eq!(bundle.allmask.dim(), (15, 16, 16));
        assert_eq!(bundle.num_objects, 1);
        assert_eq!(bundle.reg_mask.to_vec(), vec![1, 0, 0, 0]);

        // box maps to [2, 4, 10, 12] in the 16x16 grid, center (8, 6)
        assert_eq!(bundle.ind[0], 6 * 16 + 8);
        assert_eq!(bundle.hm[[1, 6, 8]], 1.0);
        assert!(bundle.hm.index_axis(Axis(0), 0).iter().all(|&value| value == 0.0));
        match &bundle.wh {
            WhTarget::Plain { wh } => {
                assert_abs_diff_eq!(wh[[0, 0]], 8.0, epsilon = 1e-5);
                assert_abs_diff_eq!(wh[[0, 1]], 8.0, epsilon = 1e-5);
            }
            _ => unreachable!(),
        }
        assert!(bundle.reg.is_some());

        let meta = bundle.meta.as_ref().unwrap();
        assert_eq!(meta.image_id, 9);
        assert_eq!(meta.gt_det.dim(), (1, 6));
        assert_abs_diff_eq!(meta.gt_det[[0, 0]], 4.0, epsilon = 1e-5);
        assert_eq!(meta.gt_det[[0, 5]], 1.0);

        // a gray image normalizes to the same value per channel everywhere inside the crop
        let expect = (128.0 / 255.0 - 0.40789654) / 0.28863828;
        assert_abs_diff_eq!(bundle.input[[0, 32, 32]], expect, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn train_encoding_uses_schedule_and_drops_meta() -> Result<()> {
        let mut config = config();
        config.reg_offset = false;
        config.loss = HeatmapLoss::SquaredError { sigma: None };
        let encoder = TargetEncoderInit {
            config,
            split: Split::Train,
            num_samples: 4,
        }
        .build()?;
        assert!(encoder.schedule().is_some());

        let sample = sample();
        let bundle = encoder.encode(&sample, 0, &mut encoder.rng_for(0))?;
        assert!(bundle.meta.is_none());
        assert!(bundle.reg.is_none());
        assert!(bundle.hm.iter().all(|&value| (0.0..=1.0).contains(&value)));
        Ok(())
    }

    #[test]
    fn objects_past_capacity_are_dropped() -> Result<()> {
        let encoder = TargetEncoderInit {
            config: config(),
            split: Split::Val,
            num_samples: 1,
        }
        .build()?;

        // six 16x16 boxes on a 3x2 layout, each 4x4 in the 16x16 grid
        let objects = (0..6)
            .map(|index| {
                let (top, left) = ((index / 3) * 32, (index % 3) * 20);
                let mut mask = Array2::zeros((64, 64));
                mask.slice_mut(s![top..top + 16, left..left + 16]).fill(1);
                SampleObject {
                    label: Label {
                        rect: TLBR::from_tlbr([
                            top as f64,
                            left as f64,
                            (top + 16) as f64,
                            (left + 16) as f64,
                        ]),
                        class: 0,
                    },
                    mask,
                }
            })
            .collect();
        let sample = Sample {
            image_id: 3,
            image: Array3::from_elem((64, 64, 3), 128),
            objects,
        };
        let bundle = encoder.encode(&sample, 0, &mut encoder.rng_for(0))?;

        assert_eq!(bundle.num_objects, 4);
        assert_eq!(bundle.reg_mask.to_vec(), vec![1, 1, 1, 1]);
        assert_eq!(bundle.ind.to_vec(), vec![2 * 16 + 2, 2 * 16 + 7, 2 * 16 + 12, 10 * 16 + 2]);
        match &bundle.wh {
            WhTarget::Plain { wh } => {
                assert_eq!(wh.dim(), (4, 2));
                assert!(wh.iter().all(|&value| (value - 4.0).abs() < 1e-5));
            }
            _ => unreachable!(),
        }

        // the fifth and sixth objects leave no peak
        assert_eq!(bundle.hm[[0, 10, 2]], 1.0);
        assert_eq!(bundle.hm[[0, 10, 7]], 0.0);
        assert_eq!(bundle.hm[[0, 10, 12]], 0.0);
        assert_eq!(bundle.hm.iter().filter(|&&value| value == 1.0).count(), 4);
        assert_eq!(bundle.meta.as_ref().unwrap().gt_det.dim(), (4, 6));
        Ok(())
    }

    #[test]
    fn class_out_of_range_is_a_data_error() -> Result<()> {
        let encoder = TargetEncoderInit {
            config: config(),
            split: Split::Val,
            num_samples: 1,
        }
        .build()?;
        let mut sample = sample();
        sample.objects[0].label.class = 2;
        assert!(encoder.encode(&sample, 0, &mut encoder.rng_for(0)).is_err());
        Ok(())
    }
}
