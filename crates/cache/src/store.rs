//! Bounded key/value store with TTL expiry and LRU eviction.

use crate::config::CacheStoreConfig;
use crate::entry::CacheEntry;
use crate::stats::{CacheStats, OpWindow};
use crate::traits::CacheInstance;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, trace};
use vigil_core::Result;

const STATS_WINDOW: Duration = Duration::from_secs(60);

/// In-process cache store
///
/// Individual map operations are safe under concurrent access; the
/// sort-then-delete of LRU eviction is a compound section and runs under its
/// own lock so two writers never evict simultaneously.
#[derive(Debug)]
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    config: RwLock<CacheStoreConfig>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    errors: AtomicU64,
    memory_bytes: AtomicU64,
    ops: OpWindow,
    evict_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl CacheStore {
    pub fn new(config: CacheStoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config: RwLock::new(config),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
            ops: OpWindow::new(STATS_WINDOW),
            evict_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Look up a value, treating expired entries as absent
    ///
    /// An expired entry found here is removed as a side effect and counted
    /// in `expired`. Reads never raise; internal failures are counted as
    /// errors and reported as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let start = Instant::now();

        let mut found_expired = false;
        let value = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    found_expired = true;
                    None
                } else {
                    entry.touch();
                    Some(entry.value.clone())
                }
            }
            None => None,
        };

        if found_expired {
            self.remove_if_expired(key);
        }

        match &value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        self.ops.record(start.elapsed());
        value
    }

    /// Store a value, overwriting any previous entry and resetting its age
    ///
    /// If the write pushes the store over capacity, the least-recently-used
    /// entries are evicted until the bound holds again.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let start = Instant::now();
        let ttl = ttl.unwrap_or_else(|| self.config.read().default_ttl);

        let size_bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes.len() as u64,
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        };

        let entry = CacheEntry::new(value, size_bytes, ttl);
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.memory_bytes
                .fetch_sub(old.size_bytes, Ordering::AcqRel);
        }
        self.memory_bytes.fetch_add(size_bytes, Ordering::AcqRel);
        self.sets.fetch_add(1, Ordering::Relaxed);

        self.evict_to_capacity();
        self.ops.record(start.elapsed());
    }

    /// Remove an entry, reporting whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let start = Instant::now();
        let removed = self.entries.remove(key);
        if let Some((_, entry)) = &removed {
            self.memory_bytes
                .fetch_sub(entry.size_bytes, Ordering::AcqRel);
        }
        self.ops.record(start.elapsed());
        removed.is_some()
    }

    /// Whether a live (non-expired) entry exists, without counting a hit
    pub fn has(&self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.is_expired() {
                    true
                } else {
                    return true;
                }
            }
            None => return false,
        };
        if expired {
            self.remove_if_expired(key);
        }
        false
    }

    /// Keys of all live entries
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Look up a value, computing and storing it on a miss
    pub async fn get_or_set<F, Fut>(&self, key: &str, factory: F, ttl: Option<Duration>) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        match factory().await {
            Ok(value) => {
                self.set(key, value.clone(), ttl);
                Ok(value)
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
        self.memory_bytes.store(0, Ordering::Release);
    }

    /// Current entry count, including expired entries not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            max_size: self.config.read().max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            memory_usage_bytes: self.memory_bytes.load(Ordering::Relaxed),
            avg_latency_ms: self.ops.avg_latency_ms(),
            throughput_ops_sec: self.ops.throughput_ops_sec(),
        }
    }

    /// Shrink the capacity bound at runtime, evicting immediately if needed
    pub fn set_max_size(&self, max_size: usize) {
        self.config.write().max_size = max_size;
        self.evict_to_capacity();
    }

    /// Change the TTL applied to writes without an explicit TTL
    pub fn set_default_ttl(&self, ttl: Duration) {
        self.config.write().default_ttl = ttl;
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired_keys {
            if self.remove_if_expired(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Background sweep loop; runs until [`CacheStore::shutdown`]
    pub async fn run_sweeper(self: Arc<Self>) {
        let sweep_interval = self.config.read().sweep_interval;
        let mut ticker = interval(sweep_interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let removed = self.sweep_expired();
            if removed > 0 {
                debug!(removed, "sweep removed expired cache entries");
            }
        }
    }

    /// Stop the background sweep loop at its next tick
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn remove_if_expired(&self, key: &str) -> bool {
        let removed = self.entries.remove_if(key, |_, entry| entry.is_expired());
        if let Some((_, entry)) = removed {
            self.memory_bytes
                .fetch_sub(entry.size_bytes, Ordering::AcqRel);
            self.expired.fetch_add(1, Ordering::Relaxed);
            trace!(key, "removed expired entry");
            true
        } else {
            false
        }
    }

    /// Evict least-recently-used entries until the store is at capacity.
    /// Sort-then-delete must run as one critical section; the eviction lock
    /// serializes concurrent writers that both overflow the bound.
    fn evict_to_capacity(&self) {
        let max_size = self.config.read().max_size;
        if self.entries.len() <= max_size {
            return;
        }

        let _guard = self.evict_lock.lock();
        let excess = self.entries.len().saturating_sub(max_size);
        if excess == 0 {
            return;
        }

        let mut candidates: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_accessed_at))
            .collect();
        candidates.sort_by_key(|(_, last_accessed)| *last_accessed);

        let mut evicted = 0usize;
        for (key, _) in candidates.into_iter().take(excess) {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.memory_bytes
                    .fetch_sub(entry.size_bytes, Ordering::AcqRel);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }
        debug!(evicted, max_size, "evicted least-recently-used entries");
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheStoreConfig::default())
    }
}

#[async_trait]
impl CacheInstance for CacheStore {
    async fn get(&self, key: &str) -> Option<Value> {
        CacheStore::get(self, key)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        CacheStore::set(self, key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(CacheStore::delete(self, key))
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStore::stats(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::Error;

    fn store_with_capacity(max_size: usize) -> CacheStore {
        CacheStore::new(CacheStoreConfig {
            max_size,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_then_ttl_expiry() {
        let store = store_with_capacity(10);
        store.set("k", json!("v"), Some(Duration::from_millis(1000)));
        assert_eq!(store.get("k"), Some(json!("v")));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(store.get("k"), None);

        let stats = store.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_removes_exactly_the_least_recently_used() {
        let store = store_with_capacity(3);
        store.set("a", json!(1), None);
        tokio::time::advance(Duration::from_millis(1)).await;
        store.set("b", json!(2), None);
        tokio::time::advance(Duration::from_millis(1)).await;
        store.set("c", json!(3), None);
        tokio::time::advance(Duration::from_millis(1)).await;

        // Touch "a" so "b" becomes the LRU victim
        assert!(store.get("a").is_some());
        tokio::time::advance(Duration::from_millis(1)).await;

        store.set("d", json!(4), None);

        assert!(store.has("a"));
        assert!(!store.has("b"));
        assert!(store.has("c"));
        assert!(store.has("d"));
        assert_eq!(store.stats().evictions, 1);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_entry_age() {
        let store = store_with_capacity(10);
        store.set("k", json!("v1"), Some(Duration::from_millis(1000)));

        tokio::time::advance(Duration::from_millis(800)).await;
        store.set("k", json!("v2"), Some(Duration::from_millis(1000)));

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(store.get("k"), Some(json!("v2")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_entries_without_access() {
        let store = store_with_capacity(10);
        for i in 0..5 {
            store.set(&format!("k{i}"), json!(i), Some(Duration::from_millis(100)));
        }
        store.set("long", json!("lived"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_millis(200)).await;
        let removed = store.sweep_expired();

        assert_eq!(removed, 5);
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().expired, 5);
    }

    #[tokio::test]
    async fn get_or_set_computes_only_on_miss() {
        let store = store_with_capacity(10);

        let value = store
            .get_or_set("k", || async { Ok(json!(42)) }, None)
            .await
            .unwrap();
        assert_eq!(value, json!(42));

        // Second call must not invoke the factory
        let value = store
            .get_or_set(
                "k",
                || async { Err(Error::configuration("factory must not run")) },
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn get_or_set_factory_failure_counts_as_error() {
        let store = store_with_capacity(10);
        let result = store
            .get_or_set("k", || async { Err(Error::configuration("boom")) }, None)
            .await;
        assert!(result.is_err());
        assert_eq!(store.stats().errors, 1);
        assert!(!store.has("k"));
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = store_with_capacity(10);
        store.set("k", json!("v"), None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
    }

    #[tokio::test]
    async fn clear_resets_memory_accounting() {
        let store = store_with_capacity(10);
        store.set("a", json!("some value"), None);
        store.set("b", json!({"nested": [1, 2, 3]}), None);
        assert!(store.stats().memory_usage_bytes > 0);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().memory_usage_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_capacity_evicts_immediately() {
        let store = store_with_capacity(5);
        for i in 0..5 {
            store.set(&format!("k{i}"), json!(i), None);
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        store.set_max_size(2);
        assert_eq!(store.len(), 2);
        // The two most recently written entries survive
        assert!(store.has("k3"));
        assert!(store.has("k4"));
    }

    mod eviction_bound {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // For any sequence of sets, the store never exceeds its capacity.
            #[test]
            fn store_never_exceeds_max_size(
                keys in proptest::collection::vec(0u8..40, 1..200),
                max_size in 1usize..16,
            ) {
                let store = store_with_capacity(max_size);
                for (i, key) in keys.iter().enumerate() {
                    store.set(&format!("k{key}"), json!(i), None);
                    prop_assert!(store.len() <= max_size);
                }
            }
        }
    }
}
