//! Data preprocessing building blocks.

pub mod color_aug;
pub mod sampler;
pub mod schedule;
pub mod warp;

pub use color_aug::*;
pub use sampler::*;
pub use schedule::*;
pub use warp::*;
