use bbox::{Affine, TLBR};
use std::ops::Mul;

/// A rectangle tagged with a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label<R, C> {
    pub rect: R,
    pub class: C,
}

impl<C> Label<TLBR<f64>, C>
where
    C: Copy,
{
    /// Mirrors the rectangle inside an image of `width` pixels, keeping the class.
    pub fn hflip(&self, width: f64) -> Self {
        Label {
            rect: self.rect.hflip(width),
            class: self.class,
        }
    }
}

impl<'a, C> Mul<&'a Label<TLBR<f64>, C>> for &'a Affine
where
    C: Copy,
{
    type Output = Label<TLBR<f64>, C>;

    fn mul(self, rhs: &'a Label<TLBR<f64>, C>) -> Self::Output {
        Label {
            rect: self * &rhs.rect,
            class: rhs.class,
        }
    }
}
