//! Heatmap, regression and part mask target rendering.

pub mod bundle;
pub mod gaussian;
pub mod heatmap;
pub mod part_mask;
pub mod regression;

pub use bundle::*;
pub use gaussian::*;
pub use heatmap::*;
pub use part_mask::*;
pub use regression::*;
