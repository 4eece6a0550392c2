//! Shared training progress.
//!
//! Averaged models need the number of parameter states seen so far to turn
//! their accumulators into a running mean. One `TrainingProgress` is created
//! per training run and handed to every averaged model; cloning shares the
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct TrainingProgress {
    instances: Arc<AtomicU64>,
}

impl Default for TrainingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingProgress {
    /// Starts at 1: the initial parameters count as the first state.
    pub fn new() -> Self {
        Self {
            instances: Arc::new(AtomicU64::new(1)),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.instances.load(Ordering::SeqCst)
    }

    /// Mark one more training instance as completed.
    pub fn advance(&self) -> u64 {
        self.instances.fetch_add(1, Ordering::SeqCst) + 1
    }
}
