//! Fixed-size batches with bounded concurrency inside each batch.

use super::{report_progress, ProgressCallback, WarmupStrategy};
use crate::types::{ItemError, PrewarmItem, WarmupOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;
use vigil_cache::CacheInstance;

/// Configuration for the immediate strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateConfig {
    /// Items per batch
    pub batch_size: usize,
    /// Concurrent applications inside one batch
    pub concurrency: usize,
    /// Fixed pause between batches
    pub batch_delay: Duration,
}

impl Default for ImmediateConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            batch_delay: Duration::from_millis(100),
        }
    }
}

/// Applies items as fast as the batch bounds allow
#[derive(Debug, Clone, Default)]
pub struct ImmediateStrategy {
    config: ImmediateConfig,
}

impl ImmediateStrategy {
    pub fn new(config: ImmediateConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WarmupStrategy for ImmediateStrategy {
    fn name(&self) -> &'static str {
        "immediate"
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

        let batch_count = items.len().div_ceil(self.config.batch_size.max(1));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        for (index, batch) in items.chunks(self.config.batch_size.max(1)).enumerate() {
            let mut join_set = JoinSet::new();
            for item in batch.iter().cloned() {
                let cache = Arc::clone(&cache);
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    // The semaphore is never closed while tasks hold clones
                    let _permit = semaphore.acquire().await.ok();
                    super::apply_item(cache.as_ref(), &item).await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(duration_ms)) => durations_ms.push(duration_ms),
                    Ok(Err(item_error)) => errors.push(item_error),
                    Err(join_error) => errors.push(ItemError {
                        key: String::new(),
                        message: format!("item task panicked: {join_error}"),
                    }),
                }
                processed += 1;
                report_progress(&progress, processed, total);
            }

            if index + 1 < batch_count && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        let outcome = WarmupOutcome::from_run(total, &durations_ms, errors, started.elapsed());
        debug!(
            total,
            successful = outcome.successful,
            failed = outcome.failed,
            "immediate warmup finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_cache::{CacheStats, CacheStore};
    use vigil_core::{Error, Result};

    fn items(count: usize) -> Vec<PrewarmItem> {
        (0..count)
            .map(|i| PrewarmItem::new(format!("k{i}"), json!(i)))
            .collect()
    }

    /// Rejects writes whose key ends in an odd digit
    #[derive(Debug)]
    struct OddRejectingCache {
        inner: CacheStore,
    }

    #[async_trait]
    impl CacheInstance for OddRejectingCache {
        async fn get(&self, key: &str) -> Option<Value> {
            CacheInstance::get(&self.inner, key).await
        }
        async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
            let odd = key
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .map(|d| d % 2 == 1)
                .unwrap_or(false);
            if odd {
                return Err(Error::configuration("odd keys rejected"));
            }
            CacheInstance::set(&self.inner, key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            CacheInstance::delete(&self.inner, key).await
        }
        async fn stats(&self) -> Result<CacheStats> {
            CacheInstance::stats(&self.inner).await
        }
    }

    #[tokio::test]
    async fn applies_every_item() {
        let store = Arc::new(CacheStore::default());
        let strategy = ImmediateStrategy::new(ImmediateConfig {
            batch_size: 4,
            concurrency: 2,
            batch_delay: Duration::ZERO,
        });

        let outcome = strategy
            .execute(store.clone(), items(10), None)
            .await;

        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.successful, 10);
        assert_eq!(outcome.failed, 0);
        for i in 0..10 {
            assert!(store.has(&format!("k{i}")));
        }
    }

    #[tokio::test]
    async fn item_failures_never_abort_the_batch() {
        let cache = Arc::new(OddRejectingCache {
            inner: CacheStore::default(),
        });
        let strategy = ImmediateStrategy::new(ImmediateConfig {
            batch_size: 3,
            concurrency: 2,
            batch_delay: Duration::ZERO,
        });

        let outcome = strategy.execute(cache.clone(), items(10), None).await;

        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.successful, 5);
        assert_eq!(outcome.failed, 5);
        assert_eq!(outcome.errors.len(), 5);
        assert!(cache.inner.has("k0"));
        assert!(!cache.inner.has("k1"));
    }

    #[tokio::test]
    async fn progress_is_reported_after_every_item() {
        let store = Arc::new(CacheStore::default());
        let strategy = ImmediateStrategy::new(ImmediateConfig {
            batch_size: 5,
            concurrency: 3,
            batch_delay: Duration::ZERO,
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_callback = Arc::clone(&calls);
        let progress: ProgressCallback = Arc::new(move |processed, total| {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
            assert!(processed <= total);
        });

        strategy.execute(store, items(12), Some(progress)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }
}
