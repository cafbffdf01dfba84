use anyhow::{Context, Result};
use center_target::{
    sink::DebugSink,
    target::{peak_map, TargetBundle, NUM_PART_CHANNELS},
};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Writes the part mask groups, the size level groups and the merged heatmap
/// of every `interval`-th sample as PNG files.
#[derive(Debug, Clone)]
pub struct PngDumpSink {
    dir: PathBuf,
    interval: usize,
}

impl PngDumpSink {
    pub fn new(dir: impl AsRef<Path>, interval: usize) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("unable to create directory '{}'", dir.display()))?;
        Ok(Self {
            dir: dir.to_owned(),
            interval: interval.max(1),
        })
    }

    fn path(&self, index: usize, name: &str) -> PathBuf {
        self.dir.join(format!("{:06}_{}.png", index, name))
    }
}

impl DebugSink for PngDumpSink {
    fn observe(&self, index: usize, bundle: &TargetBundle) -> Result<()> {
        if index % self.interval != 0 {
            return Ok(());
        }

        let allmask = &bundle.allmask;
        let (num_channels, height, width) = allmask.dim();
        if num_channels < NUM_PART_CHANNELS || height == 0 || width == 0 {
            return Ok(());
        }
        let to_u8 = |value: f32| (value.clamp(0.0, 1.0) * 255.0) as u8;

        // one RGB image per row of the 3x3 grid, left cell in blue
        for (row, name) in ["top", "middle", "bottom"].into_iter().enumerate() {
            let base = row * 3;
            let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
                let (x, y) = (x as usize, y as usize);
                Rgb([
                    to_u8(allmask[[base + 2, y, x]]),
                    to_u8(allmask[[base + 1, y, x]]),
                    to_u8(allmask[[base, y, x]]),
                ])
            });
            image.save(self.path(index, name))?;
        }

        let full = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let covered = (0..NUM_PART_CHANNELS).any(|channel| allmask[[channel, y, x]] > 0.0);
            Luma([if covered { 255 } else { 0 }])
        });
        full.save(self.path(index, "full"))?;

        // size levels 0..3 and 3..6, coarse levels in blue
        for (group, name) in ["large", "small"].into_iter().enumerate() {
            let base = NUM_PART_CHANNELS + group * 3;
            if base + 3 > num_channels {
                break;
            }
            let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
                let (x, y) = (x as usize, y as usize);
                let on = |channel: usize| if allmask[[channel, y, x]] > 0.0 { 255 } else { 0 };
                Rgb([on(base + 2), on(base + 1), on(base)])
            });
            image.save(self.path(index, name))?;
        }

        let peak = peak_map(&bundle.hm);
        let heatmap = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([to_u8(peak[[y as usize, x as usize]])])
        });
        heatmap.save(self.path(index, "hm"))?;

        Ok(())
    }
}
