//! Pluggable policies for applying a batch of items to a cache instance.
//!
//! Every strategy shares one contract: per-item failures are caught and
//! recorded, never aborting the batch, and progress is reported through the
//! callback after every item.

mod adaptive;
mod immediate;
mod priority;

pub use adaptive::{AdaptiveConfig, AdaptiveStrategy};
pub use immediate::{ImmediateConfig, ImmediateStrategy};
pub use priority::{PriorityConfig, PriorityStrategy};

use crate::types::{ItemError, PrewarmItem, WarmupOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use vigil_cache::CacheInstance;

/// Invoked after every applied item with (items processed, total items)
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// A policy for applying key/value items to a cache instance
#[async_trait]
pub trait WarmupStrategy: Send + Sync {
    /// Strategy name for logging and task metadata
    fn name(&self) -> &'static str;

    /// Apply all items to the target, recording per-item failures
    async fn execute(
        &self,
        cache: Arc<dyn CacheInstance>,
        items: Vec<PrewarmItem>,
        progress: Option<ProgressCallback>,
    ) -> WarmupOutcome;
}

/// Apply one item, returning its latency or the recorded failure
pub(crate) async fn apply_item(
    cache: &dyn CacheInstance,
    item: &PrewarmItem,
) -> Result<f64, ItemError> {
    let started = Instant::now();
    match cache.set(&item.key, item.value.clone(), item.ttl).await {
        Ok(()) => Ok(started.elapsed().as_secs_f64() * 1000.0),
        Err(err) => Err(ItemError {
            key: item.key.clone(),
            message: err.to_string(),
        }),
    }
}

pub(crate) fn report_progress(progress: &Option<ProgressCallback>, processed: usize, total: usize) {
    if let Some(callback) = progress {
        callback(processed, total);
    }
}
