//! Cache entry management.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// A single in-memory cache entry
///
/// Owned exclusively by the store; access metadata is mutated on every read
/// so LRU eviction can rank entries by recency.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stored value
    pub value: Value,
    /// Approximate serialized size, used for memory accounting
    pub size_bytes: u64,
    /// Creation timestamp; reset on overwrite
    pub created_at: Instant,
    /// TTL for this entry
    pub ttl: Duration,
    /// Number of reads that hit this entry
    pub access_count: u64,
    /// Timestamp of the most recent read (or creation)
    pub last_accessed_at: Instant,
}

impl CacheEntry {
    pub fn new(value: Value, size_bytes: u64, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            size_bytes,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// An entry whose age exceeds its TTL is treated as absent even before
    /// it is physically removed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    /// Record a read against this entry
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Instant::now();
    }

    /// Age of the entry since creation (or last overwrite)
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
