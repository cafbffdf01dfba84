//! Affine maps between source image space and the model input/output grids.

use crate::{common::*, HW, TLBR};

/// The source extent that is stretched onto the destination grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// One side length; the destination width decides the zoom on both axes.
    Isotropic(f64),
    /// Independent source width and height.
    Anisotropic { w: f64, h: f64 },
}

impl Scale {
    pub fn w(&self) -> f64 {
        match *self {
            Self::Isotropic(side) => side,
            Self::Anisotropic { w, .. } => w,
        }
    }

    pub fn h(&self) -> f64 {
        match *self {
            Self::Isotropic(side) => side,
            Self::Anisotropic { h, .. } => h,
        }
    }

    /// Multiplies every side by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        match *self {
            Self::Isotropic(side) => Self::Isotropic(side * factor),
            Self::Anisotropic { w, h } => Self::Anisotropic {
                w: w * factor,
                h: h * factor,
            },
        }
    }
}

/// A 2x3 affine matrix acting on `[x, y]` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    m: [[f64; 3]; 2],
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn from_matrix(m: [[f64; 3]; 2]) -> Self {
        Self { m }
    }

    /// Builds the map that sends `center` to the middle of an `output_size` grid,
    /// stretches the `scale` extent over the grid and rotates by `rotation_deg`
    /// about `center`.
    pub fn from_center_scale(
        center: [f64; 2],
        scale: Scale,
        rotation_deg: f64,
        output_size: &HW<usize>,
    ) -> Self {
        let out_w = output_size.w() as f64;
        let out_h = output_size.h() as f64;
        let (kx, ky) = match scale {
            Scale::Isotropic(side) => (out_w / side, out_w / side),
            Scale::Anisotropic { w, h } => (out_w / w, out_h / h),
        };

        // diag(kx, ky) * R(-rotation)
        let (sin, cos) = rotation_deg.to_radians().sin_cos();
        let a = kx * cos;
        let b = kx * sin;
        let c = -ky * sin;
        let d = ky * cos;

        let [cx, cy] = center;
        let tx = out_w / 2.0 - (a * cx + b * cy);
        let ty = out_h / 2.0 - (c * cx + d * cy);

        Self {
            m: [[a, b, tx], [c, d, ty]],
        }
    }

    pub fn matrix(&self) -> [[f64; 3]; 2] {
        self.m
    }

    pub fn apply(&self, point: [f64; 2]) -> [f64; 2] {
        let [x, y] = point;
        let [[a, b, tx], [c, d, ty]] = self.m;
        [a * x + b * y + tx, c * x + d * y + ty]
    }

    /// The inverse map, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let det = a * d - b * c;
        if det.abs() < f64::EPSILON {
            return None;
        }

        let ia = d / det;
        let ib = -b / det;
        let ic = -c / det;
        let id = a / det;

        Some(Self {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

impl Mul<&TLBR<f64>> for &Affine {
    type Output = TLBR<f64>;

    /// Maps the four corners and returns their bounds.
    fn mul(self, rhs: &TLBR<f64>) -> Self::Output {
        let corners = rhs.corners().map(|point| self.apply(point));
        TLBR::enclosing(&corners).unwrap()
    }
}

impl Mul<&Affine> for &Affine {
    type Output = Affine;

    fn mul(self, rhs: &Affine) -> Self::Output {
        let [[a0, b0, x0], [c0, d0, y0]] = self.m;
        let [[a1, b1, x1], [c1, d1, y1]] = rhs.m;
        Affine {
            m: [
                [a0 * a1 + b0 * c1, a0 * b1 + b0 * d1, a0 * x1 + b0 * y1 + x0],
                [c0 * a1 + d0 * c1, c0 * b1 + d0 * d1, c0 * x1 + d0 * y1 + y0],
            ],
        }
    }
}
