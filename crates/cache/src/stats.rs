//! Cache statistics and the rolling operation window behind them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time statistics snapshot for one cache store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Current number of entries (may briefly include not-yet-swept expired ones)
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Entries removed by LRU eviction
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expired: u64,
    /// Failed operations observed by the store
    pub errors: u64,
    /// Approximate memory held by live entries
    pub memory_usage_bytes: u64,
    /// Average operation latency over the rolling window
    pub avg_latency_ms: f64,
    /// Operations per second over the rolling window
    pub throughput_ops_sec: f64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    #[must_use]
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Errors as a fraction of all observed operations
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.sets;
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }

    /// Fill level as a fraction of capacity
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }
}

/// Rolling window over recent operations
///
/// Counters reset once the window elapses, so latency and throughput reflect
/// recent behavior rather than process lifetime.
#[derive(Debug)]
pub(crate) struct OpWindow {
    ops: AtomicU64,
    total_nanos: AtomicU64,
    window_start: RwLock<Instant>,
    window: Duration,
}

impl OpWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            ops: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            window_start: RwLock::new(Instant::now()),
            window,
        }
    }

    pub(crate) fn record(&self, latency: Duration) {
        self.roll();
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.total_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn avg_latency_ms(&self) -> f64 {
        self.roll();
        let ops = self.ops.load(Ordering::Relaxed);
        if ops == 0 {
            return 0.0;
        }
        let total = self.total_nanos.load(Ordering::Relaxed);
        total as f64 / ops as f64 / 1_000_000.0
    }

    pub(crate) fn throughput_ops_sec(&self) -> f64 {
        self.roll();
        let ops = self.ops.load(Ordering::Relaxed);
        let elapsed = self.window_start.read().elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        ops as f64 / elapsed
    }

    fn roll(&self) {
        let now = Instant::now();
        let mut window_start = self.window_start.write();
        if now.duration_since(*window_start) > self.window {
            self.ops.store(0, Ordering::Relaxed);
            self.total_nanos.store(0, Ordering::Relaxed);
            *window_start = now;
        }
    }
}
