//! Named external data sources with retry, timeout, and result caching.

use crate::types::PrewarmItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_cache::{CacheStore, CacheStoreConfig};
use vigil_core::{Error, Result};

/// A named source of prewarm items
#[async_trait]
pub trait DataLoader: Send + Sync {
    /// Fetch items for a set of keys
    async fn load(&self, keys: &[String]) -> Result<Vec<PrewarmItem>>;

    /// Fetch one key; defaults to a single-key `load`
    async fn load_single(&self, key: &str) -> Result<Option<PrewarmItem>> {
        let items = self.load(std::slice::from_ref(&key.to_string())).await?;
        Ok(items.into_iter().next())
    }
}

/// Per-loader retry, timeout, and caching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Total attempts before the load is surfaced as failed
    pub retries: u32,
    /// Budget for each individual attempt
    pub timeout: Duration,
    /// Base of the exponential backoff between attempts
    pub backoff_base: Duration,
    /// Upper bound on a single backoff pause
    pub backoff_cap: Duration,
    /// How long successful results are served from the result cache
    pub cache_ttl: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10_000),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Rolling counters for one loader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Incrementally maintained average of successful load latency
    pub average_load_time_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
}

struct RegisteredLoader {
    loader: Arc<dyn DataLoader>,
    config: LoaderConfig,
    stats: Mutex<LoaderStats>,
}

/// Registry of named data loaders
///
/// Results are cached briefly (keyed by loader name and the sorted key
/// set), every load is retried with exponential backoff under a per-attempt
/// timeout, and per-loader statistics are kept current.
pub struct DataLoaderManager {
    loaders: DashMap<String, RegisteredLoader>,
    results: CacheStore,
}

impl DataLoaderManager {
    pub fn new() -> Self {
        Self {
            loaders: DashMap::new(),
            // Results are small and short-lived; the store's own TTL
            // handling does the expiry work.
            results: CacheStore::new(CacheStoreConfig {
                max_size: 512,
                default_ttl: Duration::from_secs(300),
                sweep_interval: Duration::from_secs(60),
            }),
        }
    }

    /// Register a loader under a unique name
    pub fn register(
        &self,
        name: impl Into<String>,
        loader: Arc<dyn DataLoader>,
        config: LoaderConfig,
    ) -> Result<()> {
        let name = name.into();
        if self.loaders.contains_key(&name) {
            return Err(Error::configuration(format!(
                "data loader '{name}' is already registered"
            )));
        }
        self.loaders.insert(
            name,
            RegisteredLoader {
                loader,
                config,
                stats: Mutex::new(LoaderStats::default()),
            },
        );
        Ok(())
    }

    /// Remove a loader and purge its cached results
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.loaders.remove(name).is_some();
        if removed {
            let prefix = format!("{name}:");
            for key in self.results.keys() {
                if key.starts_with(&prefix) {
                    self.results.delete(&key);
                }
            }
        }
        removed
    }

    /// Load items by name, serving from the result cache when possible
    pub async fn load_data(&self, name: &str, keys: &[String]) -> Result<Vec<PrewarmItem>> {
        let cache_key = Self::result_key(name, keys);
        {
            let entry = self
                .loaders
                .get(name)
                .ok_or_else(|| Error::unknown_loader(name))?;
            let mut stats = entry.stats.lock();
            stats.total_requests += 1;
            stats.last_used = Some(Utc::now());
        }

        if let Some(cached) = self.results.get(&cache_key) {
            debug!(loader = name, "serving prewarm items from result cache");
            return Ok(serde_json::from_value(cached)?);
        }

        let items = self.execute_with_retry(name, keys).await?;

        let cache_ttl = self
            .loaders
            .get(name)
            .map(|entry| entry.config.cache_ttl)
            .unwrap_or(Duration::from_secs(300));
        self.results
            .set(&cache_key, serde_json::to_value(&items)?, Some(cache_ttl));
        Ok(items)
    }

    /// Fire-and-forget load: failures are logged, never propagated
    pub fn preload_data(self: Arc<Self>, name: impl Into<String>, keys: Vec<String>) {
        let name = name.into();
        tokio::spawn(async move {
            if let Err(err) = self.load_data(&name, &keys).await {
                warn!(loader = %name, error = %err, "preload failed");
            }
        });
    }

    /// Statistics for one loader
    pub fn stats(&self, name: &str) -> Option<LoaderStats> {
        self.loaders.get(name).map(|entry| entry.stats.lock().clone())
    }

    /// Names of all registered loaders
    pub fn loader_names(&self) -> Vec<String> {
        self.loaders.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        self.results.clear();
    }

    async fn execute_with_retry(&self, name: &str, keys: &[String]) -> Result<Vec<PrewarmItem>> {
        let (loader, config) = {
            let entry = self
                .loaders
                .get(name)
                .ok_or_else(|| Error::unknown_loader(name))?;
            (Arc::clone(&entry.loader), entry.config.clone())
        };

        let mut last_error: Option<Error> = None;
        for attempt in 0..config.retries.max(1) {
            let started = Instant::now();
            let outcome = tokio::time::timeout(config.timeout, loader.load(keys)).await;
            match outcome {
                Ok(Ok(items)) => {
                    if attempt > 0 {
                        debug!(loader = name, attempt, "load succeeded after retries");
                    }
                    self.record_success(name, started.elapsed());
                    return Ok(items);
                }
                Ok(Err(err)) => {
                    last_error = Some(err);
                }
                Err(_) => {
                    last_error = Some(Error::timeout("load", config.timeout));
                }
            }

            if attempt + 1 < config.retries.max(1) {
                let backoff = backoff_delay(&config, attempt);
                warn!(
                    loader = name,
                    attempt = attempt + 1,
                    retries = config.retries,
                    ?backoff,
                    "load attempt failed, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        self.record_failure(name);
        let message = last_error
            .as_ref()
            .map_or_else(|| "no attempts were made".to_string(), Error::to_string);
        match last_error {
            Some(source) => Err(Error::loader_with_source(name, message, source)),
            None => Err(Error::loader(name, message)),
        }
    }

    fn record_success(&self, name: &str, elapsed: std::time::Duration) {
        if let Some(entry) = self.loaders.get(name) {
            let mut stats = entry.stats.lock();
            stats.successful_requests += 1;
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            // Incremental average over successful loads only
            let count = stats.successful_requests as f64;
            stats.average_load_time_ms += (elapsed_ms - stats.average_load_time_ms) / count;
        }
    }

    fn record_failure(&self, name: &str) {
        if let Some(entry) = self.loaders.get(name) {
            entry.stats.lock().failed_requests += 1;
        }
    }

    fn result_key(name: &str, keys: &[String]) -> String {
        let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!("{name}:{}", sorted.join(","))
    }
}

impl Default for DataLoaderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataLoaderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoaderManager")
            .field("loaders", &self.loader_names())
            .finish()
    }
}

/// Exponential backoff capped at the configured ceiling
fn backoff_delay(config: &LoaderConfig, attempt: u32) -> Duration {
    let exponential = config.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
    exponential.min(config.backoff_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a configurable number of times before succeeding
    struct FlakyLoader {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyLoader {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DataLoader for FlakyLoader {
        async fn load(&self, keys: &[String]) -> Result<Vec<PrewarmItem>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(Error::configuration("upstream unavailable"));
            }
            Ok(keys
                .iter()
                .map(|key| PrewarmItem::new(key.clone(), json!({ "key": key })))
                .collect())
        }
    }

    struct HangingLoader;

    #[async_trait]
    impl DataLoader for HangingLoader {
        async fn load(&self, _keys: &[String]) -> Result<Vec<PrewarmItem>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn fast_config() -> LoaderConfig {
        LoaderConfig {
            retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(300),
        }
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[tokio::test]
    async fn two_failures_then_success_counts_one_success() {
        let manager = DataLoaderManager::new();
        manager
            .register("db", Arc::new(FlakyLoader::new(2)), fast_config())
            .unwrap();

        let items = manager.load_data("db", &keys(&["a", "b"])).await.unwrap();
        assert_eq!(items.len(), 2);

        let stats = manager.stats("db").unwrap();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
        // Intermediate failures are not terminal failures
        assert_eq!(stats.failed_requests, 0);
        assert!(stats.last_used.is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_a_loader_error() {
        let manager = DataLoaderManager::new();
        manager
            .register("db", Arc::new(FlakyLoader::new(10)), fast_config())
            .unwrap();

        let err = manager.load_data("db", &keys(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::Loader { .. }));

        let stats = manager.stats("db").unwrap();
        assert_eq!(stats.successful_requests, 0);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempts_are_cut_by_the_timeout() {
        let manager = DataLoaderManager::new();
        manager
            .register(
                "db",
                Arc::new(HangingLoader),
                LoaderConfig {
                    retries: 2,
                    timeout: Duration::from_millis(100),
                    backoff_base: Duration::from_millis(10),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = manager.load_data("db", &keys(&["a"])).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn results_are_served_from_cache() {
        let manager = DataLoaderManager::new();
        let loader = Arc::new(FlakyLoader::new(0));
        manager.register("db", loader.clone(), fast_config()).unwrap();

        manager.load_data("db", &keys(&["a", "b"])).await.unwrap();
        // Key order must not defeat the cache
        manager.load_data("db", &keys(&["b", "a"])).await.unwrap();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats("db").unwrap().total_requests, 2);
    }

    #[tokio::test]
    async fn unknown_loader_fails_fast() {
        let manager = DataLoaderManager::new();
        let err = manager.load_data("nope", &keys(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::UnknownLoader { .. }));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let manager = DataLoaderManager::new();
        manager
            .register("db", Arc::new(FlakyLoader::new(0)), fast_config())
            .unwrap();
        assert!(manager
            .register("db", Arc::new(FlakyLoader::new(0)), fast_config())
            .is_err());
    }

    #[tokio::test]
    async fn unregister_purges_cached_results() {
        let manager = DataLoaderManager::new();
        let loader = Arc::new(FlakyLoader::new(0));
        manager.register("db", loader.clone(), fast_config()).unwrap();
        manager.load_data("db", &keys(&["a"])).await.unwrap();

        assert!(manager.unregister("db"));
        assert!(!manager.contains("db"));

        // Re-registering must hit the loader again, not stale results
        let fresh = Arc::new(FlakyLoader::new(0));
        manager.register("db", fresh.clone(), fast_config()).unwrap();
        manager.load_data("db", &keys(&["a"])).await.unwrap();
        assert_eq!(fresh.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preload_swallows_failures() {
        let manager = Arc::new(DataLoaderManager::new());
        manager
            .register("db", Arc::new(FlakyLoader::new(10)), fast_config())
            .unwrap();

        Arc::clone(&manager).preload_data("db", keys(&["a"]));
        // Give the spawned task time to run and fail quietly
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.stats("db").unwrap().failed_requests, 1);
    }

    #[tokio::test]
    async fn load_single_defaults_to_single_key_load() {
        let loader = FlakyLoader::new(0);
        let item = loader.load_single("a").await.unwrap().unwrap();
        assert_eq!(item.key, "a");
    }

    #[test]
    fn backoff_grows_exponentially_to_the_cap() {
        let config = LoaderConfig::default();
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(&config, 30), Duration::from_millis(10_000));
    }
}
