//! The progressive training resolution schedule.

use crate::common::*;

/// The candidate square input sides, from small to large.
pub const PATCH_LADDER: [usize; 14] = [
    128, 192, 256, 320, 384, 448, 512, 640, 768, 896, 1024, 1280, 1536, 2048,
];

/// Picks the training input side per batch from a ladder of sizes.
///
/// The counter is shared by every worker encoding samples of the same epoch.
/// It advances atomically, so no step is lost under concurrent use, but the
/// order in which workers observe steps is not specified.
#[derive(Debug)]
pub struct PatchSchedule {
    ladder: Vec<usize>,
    batch_size: usize,
    num_samples: usize,
    counter: AtomicUsize,
}

impl PatchSchedule {
    /// Builds the ladder starting at `base`, followed by every ladder size whose
    /// second smaller neighbour does not exceed `base`.
    pub fn new(base: usize, batch_size: NonZeroUsize, num_samples: usize) -> Result<Self> {
        ensure!(base > 0, "base input size must be positive");

        let ladder: Vec<_> = std::iter::once(base)
            .chain(
                PATCH_LADDER
                    .iter()
                    .zip(&PATCH_LADDER[2..])
                    .take_while(|(lower, _)| **lower <= base)
                    .map(|(_, &size)| size),
            )
            .collect();

        Ok(Self {
            ladder,
            batch_size: batch_size.get(),
            num_samples,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn ladder(&self) -> &[usize] {
        &self.ladder
    }

    /// The input side used at `step` within an epoch.
    pub fn size_at(&self, step: usize) -> usize {
        self.ladder[(step / self.batch_size) % self.ladder.len()]
    }

    /// Returns the side for the current step and advances the counter.
    ///
    /// The counter wraps to zero after `num_samples` steps.
    pub fn next_size(&self) -> usize {
        let num_samples = self.num_samples;
        let step = self
            .counter
            .fetch_update(atomic::Ordering::SeqCst, atomic::Ordering::SeqCst, |count| {
                Some(if count >= num_samples { 0 } else { count + 1 })
            })
            .unwrap_or_else(|count| count);
        self.size_at(step)
    }

    pub fn reset(&self) {
        self.counter.store(0, atomic::Ordering::SeqCst);
    }
}
