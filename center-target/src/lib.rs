//! Training target encoder for center-based object detectors.
//!
//! An annotated image goes through the [augmentation sampler](processor::AugmentSampler),
//! is warped into the model input, and its objects are rendered into class
//! heatmaps, regression slots and part mask channels collected in a
//! [TargetBundle](target::TargetBundle).

mod common;
pub mod config;
pub mod dataset;
pub mod encoder;
pub mod processor;
pub mod ratio;
pub mod sink;
pub mod target;

pub use config::{EncoderConfig, HeatmapLoss, Split, WhMode};
pub use encoder::{TargetEncoder, TargetEncoderInit};
