//! Priority-ordered batches, applied sequentially.

use super::{report_progress, ProgressCallback, WarmupStrategy};
use crate::types::{PrewarmItem, WarmupOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;
use vigil_cache::CacheInstance;

/// Configuration for the priority strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Items per batch
    pub batch_size: usize,
    /// Apply highest priority first (the default) or lowest first
    pub descending: bool,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            descending: true,
        }
    }
}

/// Sorts items by priority before applying them one at a time
#[derive(Debug, Clone, Default)]
pub struct PriorityStrategy {
    config: PriorityConfig,
}

impl PriorityStrategy {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WarmupStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    async fn execute(
        &self,
        cache: Arc<dyn CacheInstance>,
        mut items: Vec<PrewarmItem>,
        progress: Option<ProgressCallback>,
    ) -> WarmupOutcome {
        let started = Instant::now();
        let total = items.len();

        if self.config.descending {
            items.sort_by_key(|item| std::cmp::Reverse(item.priority));
        } else {
            items.sort_by_key(|item| item.priority);
        }

        let mut durations_ms = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut processed = 0usize;

        for batch in items.chunks(self.config.batch_size.max(1)) {
            for item in batch {
                match super::apply_item(cache.as_ref(), item).await {
                    Ok(duration_ms) => durations_ms.push(duration_ms),
                    Err(item_error) => errors.push(item_error),
                }
                processed += 1;
                report_progress(&progress, processed, total);
            }
        }

        let outcome = WarmupOutcome::from_run(total, &durations_ms, errors, started.elapsed());
        debug!(
            total,
            successful = outcome.successful,
            "priority warmup finished"
        );
        outcome
    }
}
