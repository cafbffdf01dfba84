use super::Rect;
use crate::{common::*, HW};

/// Bounding box in TLBR format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T>
where
    T: Float,
{
    /// Mirrors the box horizontally inside an image of `width` pixels.
    ///
    /// Each x coordinate maps to `width - x - 1`, so the left and right edges swap.
    pub fn hflip(&self, width: T) -> Self {
        let one = T::one();
        Self {
            t: self.t,
            l: width - self.r - one,
            b: self.b,
            r: width - self.l - one,
        }
    }

    /// Clips the box into `[0, w - 1] x [0, h - 1]`.
    pub fn clamp_to(&self, size: &HW<T>) -> Self {
        let zero = T::zero();
        let one = T::one();
        let max_y = (size.h() - one).max(zero);
        let max_x = (size.w() - one).max(zero);
        Self {
            t: self.t.max(zero).min(max_y),
            l: self.l.max(zero).min(max_x),
            b: self.b.max(zero).min(max_y),
            r: self.r.max(zero).min(max_x),
        }
    }

    /// The corner points in `[x, y]` order, clockwise from top-left.
    pub fn corners(&self) -> [[T; 2]; 4] {
        [
            [self.l, self.t],
            [self.r, self.t],
            [self.r, self.b],
            [self.l, self.b],
        ]
    }

    /// The tightest box around a non-empty set of `[x, y]` points.
    pub fn enclosing(points: &[[T; 2]]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let [x, y] = *first;
        let init = Self {
            t: y,
            l: x,
            b: y,
            r: x,
        };
        let rect = rest.iter().fold(init, |rect, &[x, y]| Self {
            t: rect.t.min(y),
            l: rect.l.min(x),
            b: rect.b.max(y),
            r: rect.r.max(x),
        });
        Some(rect)
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> Self::Type {
        self.t
    }

    fn l(&self) -> Self::Type {
        self.l
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        (self.t + self.b) / two
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        (self.l + self.r) / two
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        let b = t + h;
        let r = l + w;
        Self::try_from_tlbr([t, l, b, r])
    }
}
