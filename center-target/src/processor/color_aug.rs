//! The random color distortion algorithm.

use crate::common::*;
use rand_distr::{Distribution, Normal};

/// Eigenvalues of the training set color covariance, BGR order.
pub const EIGEN_VALUES: [f32; 3] = [0.2141788, 0.01817699, 0.00341571];

/// Eigenvectors of the training set color covariance, one per column.
pub const EIGEN_VECTORS: [[f32; 3]; 3] = [
    [-0.58752847, -0.69563484, 0.41340352],
    [-0.5832747, 0.00994535, -0.81221408],
    [-0.56089297, 0.71832671, 0.41158938],
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColorAugInit {
    /// The maximum relative change of brightness, contrast and saturation.
    pub variance: R64,
    /// The standard deviation of the PCA lighting noise.
    pub lighting_std: R64,
}

impl ColorAugInit {
    pub fn build(self) -> Result<ColorAug> {
        let Self {
            variance,
            lighting_std,
        } = self;
        ensure!(variance >= 0.0, "variance must be non-negative");
        ensure!(lighting_std >= 0.0, "lighting_std must be non-negative");

        Ok(ColorAug {
            variance: variance.raw(),
            lighting: Normal::new(0.0, lighting_std.raw() as f32)?,
        })
    }
}

impl Default for ColorAugInit {
    fn default() -> Self {
        Self {
            variance: r64(0.4),
            lighting_std: r64(0.1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Jitter {
    Brightness,
    Contrast,
    Saturation,
}

/// Brightness, contrast and saturation jitter in random order, then lighting noise.
#[derive(Debug, Clone)]
pub struct ColorAug {
    variance: f64,
    lighting: Normal<f32>,
}

impl ColorAug {
    /// Distorts an `[H, W, 3]` BGR image with values in `[0, 1]` in place.
    pub fn forward<R>(&self, image: &mut Array3<f32>, rng: &mut R) -> Result<()>
    where
        R: Rng,
    {
        let (_height, _width, channels) = image.dim();
        ensure!(
            channels == 3,
            "channel size must be 3, but get {}",
            channels
        );

        let gray = grayscale(image);
        let gray_mean = gray.mean().unwrap_or(0.0);

        let mut jitters = [Jitter::Brightness, Jitter::Contrast, Jitter::Saturation];
        jitters.shuffle(rng);

        for jitter in jitters {
            let alpha = 1.0 + rng.gen_range(-self.variance..=self.variance) as f32;
            match jitter {
                Jitter::Brightness => {
                    image.mapv_inplace(|value| value * alpha);
                }
                Jitter::Contrast => {
                    image.mapv_inplace(|value| value * alpha + (1.0 - alpha) * gray_mean);
                }
                Jitter::Saturation => {
                    Zip::from(image.lanes_mut(Axis(2)))
                        .and(&gray)
                        .for_each(|mut pixel, &gray| {
                            pixel.mapv_inplace(|value| value * alpha + (1.0 - alpha) * gray);
                        });
                }
            }
        }

        let alpha: [f32; 3] = [
            self.lighting.sample(rng),
            self.lighting.sample(rng),
            self.lighting.sample(rng),
        ];
        let shift: Vec<f32> = EIGEN_VECTORS
            .iter()
            .map(|row| {
                izip!(row, &EIGEN_VALUES, &alpha)
                    .map(|(vector, value, alpha)| vector * value * alpha)
                    .sum()
            })
            .collect();
        image
            .lanes_mut(Axis(2))
            .into_iter()
            .for_each(|mut pixel| {
                pixel
                    .iter_mut()
                    .zip(&shift)
                    .for_each(|(value, shift)| *value += shift)
            });

        Ok(())
    }
}

/// Luma of a BGR image.
fn grayscale(image: &Array3<f32>) -> Array2<f32> {
    image.map_axis(Axis(2), |pixel| {
        0.114 * pixel[0] + 0.587 * pixel[1] + 0.299 * pixel[2]
    })
}
