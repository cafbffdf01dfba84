//! Safe bounding box types and the affine geometry shared by the target encoder.

mod common;

pub use affine::*;
pub mod affine;

pub use rect::*;
pub mod rect;

pub use tlbr::*;
pub mod tlbr;

pub use hw::*;
pub mod hw;

pub mod prelude {
    pub use crate::rect::{Rect, RectNum};
}
