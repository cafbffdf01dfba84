//! Side-channel observers of encoded samples.

use crate::{common::*, target::TargetBundle};

/// Receives each finished bundle by shared reference.
///
/// A sink never alters the returned targets. Its errors are logged and
/// do not fail the sample.
pub trait DebugSink
where
    Self: Send + Sync,
{
    fn observe(&self, index: usize, bundle: &TargetBundle) -> Result<()>;
}

/// Discards every bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn observe(&self, _index: usize, _bundle: &TargetBundle) -> Result<()> {
        Ok(())
    }
}
