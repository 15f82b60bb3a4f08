//! The capability trait every cache instance must satisfy.

use crate::stats::CacheStats;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use vigil_core::Result;

/// Narrow interface over a cache instance: exactly the operations the
/// monitoring and warming pipelines rely on.
///
/// Reads are infallible by contract: an implementation that fails internally
/// must swallow the failure, account for it in its own error counters, and
/// report a miss. Writes and stats reads may fail, which callers isolate at
/// the smallest unit of work.
#[async_trait]
pub trait CacheInstance: Send + Sync + std::fmt::Debug {
    /// Look up a value; expired entries are absent
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value, overwriting any previous entry for the key
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Remove an entry, reporting whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Point-in-time statistics snapshot
    async fn stats(&self) -> Result<CacheStats>;
}
