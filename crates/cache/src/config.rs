//! Cache store configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`CacheStore`](crate::CacheStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStoreConfig {
    /// Maximum number of live entries before LRU eviction kicks in
    pub max_size: usize,
    /// TTL applied when `set` is called without an explicit TTL
    pub default_ttl: Duration,
    /// How often the background sweep removes expired entries
    pub sweep_interval: Duration,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheStoreConfig {
    /// Validate the configuration, rejecting degenerate values
    pub fn validate(&self) -> vigil_core::Result<()> {
        if self.max_size == 0 {
            return Err(vigil_core::Error::configuration(
                "cache max_size must be at least 1",
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(vigil_core::Error::configuration(
                "cache default_ttl must be non-zero",
            ));
        }
        Ok(())
    }
}
