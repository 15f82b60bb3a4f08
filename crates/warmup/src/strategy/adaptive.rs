//! Feedback-controlled batch sizing from observed batch latency.

use super::{report_progress, ProgressCallback, WarmupStrategy};
use crate::types::{PrewarmItem, WarmupOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use vigil_cache::CacheInstance;

/// Configuration for the adaptive strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Desired wall-clock duration of one batch
    pub target_batch_duration: Duration,
    /// Rolling window of batch durations the controller averages over
    pub window: usize,
    /// Average below this fraction of the target grows the batch
    pub grow_below: f64,
    /// Average above this fraction of the target shrinks the batch
    pub shrink_above: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 5,
            min_batch_size: 1,
            max_batch_size: 50,
            target_batch_duration: Duration::from_millis(1000),
            window: 5,
            grow_below: 0.8,
            shrink_above: 1.2,
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    batch_size: usize,
    recent_durations: VecDeque<Duration>,
}

/// Applies items in batches whose size follows a proportional feedback
/// loop: one step up when batches run well under the target duration, one
/// step down when they run well over. No integral or derivative term.
#[derive(Debug)]
pub struct AdaptiveStrategy {
    config: AdaptiveConfig,
    state: Mutex<ControllerState>,
}

impl AdaptiveStrategy {
    pub fn new(config: AdaptiveConfig) -> Self {
        let state = ControllerState {
            batch_size: config
                .initial_batch_size
                .clamp(config.min_batch_size, config.max_batch_size),
            recent_durations: VecDeque::new(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Batch size the controller currently converged on
    pub fn current_batch_size(&self) -> usize {
        self.state.lock().batch_size
    }

    fn adjust_after_batch(&self, batch_duration: Duration) {
        let mut state = self.state.lock();
        state.recent_durations.push_back(batch_duration);
        while state.recent_durations.len() > self.config.window.max(1) {
            state.recent_durations.pop_front();
        }

        let avg_ms = state
            .recent_durations
            .iter()
            .map(Duration::as_secs_f64)
            .sum::<f64>()
            / state.recent_durations.len() as f64
            * 1000.0;
        let target_ms = self.config.target_batch_duration.as_secs_f64() * 1000.0;

        let previous = state.batch_size;
        if avg_ms < target_ms * self.config.grow_below {
            state.batch_size = (state.batch_size + 1).min(self.config.max_batch_size);
        } else if avg_ms > target_ms * self.config.shrink_above {
            state.batch_size = state.batch_size.saturating_sub(1).max(self.config.min_batch_size);
        }
        if state.batch_size != previous {
            debug!(
                from = previous,
                to = state.batch_size,
                avg_ms,
                "adaptive batch size adjusted"
            );
        }
    }
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}

#[async_trait]
impl WarmupStrategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn execute(
        &self,
        cache: Arc<dyn CacheInstance>,
        items: Vec<PrewarmItem>,
        progress: Option<ProgressCallback>,
    ) -> WarmupOutcome {
        let started = Instant::now();
        let total = items.len();
        let mut durations_ms = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut processed = 0usize;

        let mut remaining = items.as_slice();
        while !remaining.is_empty() {
            let batch_size = self.current_batch_size().min(remaining.len()).max(1);
            let (batch, rest) = remaining.split_at(batch_size);
            remaining = rest;

            let batch_started = Instant::now();
            for item in batch {
                match super::apply_item(cache.as_ref(), item).await {
                    Ok(duration_ms) => durations_ms.push(duration_ms),
                    Err(item_error) => errors.push(item_error),
                }
                processed += 1;
                report_progress(&progress, processed, total);
            }
            self.adjust_after_batch(batch_started.elapsed());
        }

        WarmupOutcome::from_run(total, &durations_ms, errors, started.elapsed())
    }
}
