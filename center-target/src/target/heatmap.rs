//! Class confidence peak rendering.

use super::gaussian::{draw_ellipse_gaussian, draw_gaussian, draw_msra_gaussian, gaussian_radius};
use crate::{common::*, config::HeatmapLoss};

/// The peak shape, chosen once from the configured loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatmapStrategy {
    /// Independent x and y radii from the width-only and height-only radius formula.
    Elliptical,
    /// Circular peak of a fixed sigma spanning three sigmas, or spanning the
    /// overlap radius when unset.
    Circular { sigma: Option<usize> },
}

impl From<HeatmapLoss> for HeatmapStrategy {
    fn from(loss: HeatmapLoss) -> Self {
        match loss {
            HeatmapLoss::Focal => Self::Elliptical,
            HeatmapLoss::SquaredError { sigma } => Self::Circular { sigma },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeatmapRenderer {
    strategy: HeatmapStrategy,
    min_overlap: f64,
}

impl HeatmapRenderer {
    pub fn new(strategy: HeatmapStrategy, min_overlap: f64) -> Result<Self> {
        ensure!(
            min_overlap > 0.0 && min_overlap < 1.0,
            "min_overlap must be in range (0.0, 1.0), but get {}",
            min_overlap
        );
        Ok(Self {
            strategy,
            min_overlap,
        })
    }

    pub fn strategy(&self) -> HeatmapStrategy {
        self.strategy
    }

    /// The overlap radius of an object of `height` by `width` output pixels.
    pub fn radius(&self, height: f64, width: f64) -> usize {
        gaussian_radius(height.ceil(), width.ceil(), self.min_overlap) as usize
    }

    /// Stamps the peak of an object centered at the grid cell `center` (`[x, y]`).
    ///
    /// Returns the footprint radius the dense width/height target uses.
    pub fn draw(
        &self,
        channel: ArrayViewMut2<f32>,
        center: [usize; 2],
        height: f64,
        width: f64,
    ) -> usize {
        let radius = self.radius(height, width);

        match self.strategy {
            HeatmapStrategy::Elliptical => {
                let x_radius = self.radius(width, width);
                let y_radius = self.radius(height, height);
                draw_ellipse_gaussian(channel, center, [x_radius, y_radius]);
                radius
            }
            HeatmapStrategy::Circular { sigma: Some(sigma) } => {
                draw_msra_gaussian(channel, center, sigma);
                sigma
            }
            HeatmapStrategy::Circular { sigma: None } => {
                draw_gaussian(channel, center, radius);
                radius
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elliptical_peak_is_wider_along_the_long_side() -> Result<()> {
        let renderer = HeatmapRenderer::new(HeatmapLoss::Focal.into(), 0.7)?;
        let mut heatmap = Array2::zeros((64, 64));
        let radius = renderer.draw(heatmap.view_mut(), [32, 32], 10.0, 40.0);

        assert_eq!(radius, renderer.radius(10.0, 40.0));
        assert_eq!(heatmap[[32, 32]], 1.0);
        assert!(heatmap[[32, 36]] > heatmap[[36, 32]]);
        Ok(())
    }

    #[test]
    fn circular_peak_uses_fixed_sigma() -> Result<()> {
        let strategy = HeatmapLoss::SquaredError { sigma: Some(4) }.into();
        let renderer = HeatmapRenderer::new(strategy, 0.7)?;
        let mut heatmap = Array2::zeros((64, 64));
        let radius = renderer.draw(heatmap.view_mut(), [20, 30], 10.0, 40.0);

        assert_eq!(radius, 4);
        assert_eq!(heatmap[[30, 20]], 1.0);
        assert_eq!(heatmap[[30, 24]], heatmap[[34, 20]]);
        Ok(())
    }

    #[test]
    fn circular_peak_without_sigma_spans_the_radius() -> Result<()> {
        let strategy = HeatmapLoss::SquaredError { sigma: None }.into();
        let renderer = HeatmapRenderer::new(strategy, 0.7)?;
        let mut heatmap = Array2::zeros((64, 64));
        let radius = renderer.draw(heatmap.view_mut(), [32, 32], 50.0, 50.0);

        assert_eq!(radius, 13);
        assert_eq!(heatmap[[32, 32]], 1.0);
        let row_extent = heatmap.row(32).iter().filter(|&&value| value > 0.0).count();
        let col_extent = heatmap.column(32).iter().filter(|&&value| value > 0.0).count();
        assert_eq!(row_extent, 2 * radius + 1);
        assert_eq!(col_extent, 2 * radius + 1);
        assert_eq!(heatmap[[32, 32 + radius + 1]], 0.0);
        Ok(())
    }

    #[test]
    fn renderer_rejects_bad_overlap() {
        assert!(HeatmapRenderer::new(HeatmapStrategy::Elliptical, 1.0).is_err());
        assert!(HeatmapRenderer::new(HeatmapStrategy::Elliptical, 0.0).is_err());
    }
}
