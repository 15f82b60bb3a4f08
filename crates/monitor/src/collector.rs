//! Periodic metrics sampling into per-instance time series.

use crate::types::SampledPoint;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_cache::{CacheRegistry, CacheStats};
use vigil_core::{EventBus, Metric, SystemEvent, TimeRange};

/// Configuration for the metrics collector
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectorConfig {
    /// How often every registered instance is sampled
    pub interval: Duration,
    /// Cap per (metric, instance) series; oldest points drop first
    pub max_points: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_points: 10_000,
        }
    }
}

type SeriesKey = (Metric, String);

/// Tracks the previous eviction counter so eviction rate can be derived
/// from consecutive snapshots.
#[derive(Debug, Clone, Copy)]
struct RateBaseline {
    evictions: u64,
    at: Instant,
}

/// Pulls a stats snapshot from every registered cache instance on a fixed
/// interval and appends one point per metric into that instance's series.
///
/// A failure to read one instance is isolated: it is logged and the
/// remaining instances are still sampled in the same cycle.
#[derive(Debug)]
pub struct MetricsCollector {
    registry: Arc<CacheRegistry>,
    config: RwLock<CollectorConfig>,
    series: RwLock<HashMap<SeriesKey, VecDeque<SampledPoint>>>,
    baselines: Mutex<HashMap<String, RateBaseline>>,
    events: EventBus,
    shutdown: AtomicBool,
}

impl MetricsCollector {
    pub fn new(registry: Arc<CacheRegistry>, config: CollectorConfig, events: EventBus) -> Self {
        Self {
            registry,
            config: RwLock::new(config),
            series: RwLock::new(HashMap::new()),
            baselines: Mutex::new(HashMap::new()),
            events,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Sampling loop; runs until [`MetricsCollector::stop`]
    ///
    /// The interval is re-read every cycle so `set_interval` takes effect
    /// without a restart.
    pub async fn run(self: Arc<Self>) {
        let interval = self.config.read().interval;
        self.events.emit(SystemEvent::CollectionStarted {
            interval_ms: interval.as_millis() as u64,
        });

        loop {
            let interval = self.config.read().interval;
            tokio::time::sleep(interval).await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.collect_once().await;
        }
    }

    /// Stop the sampling loop at its next wakeup
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.events.emit(SystemEvent::CollectionStopped);
    }

    /// Run one sampling cycle across all registered instances
    pub async fn collect_once(&self) {
        let names = self.registry.names();
        let mut sampled = 0usize;

        for name in names {
            let instance = match self.registry.get(&name) {
                Ok(instance) => instance,
                Err(_) => continue, // unregistered between listing and lookup
            };
            match instance.stats().await {
                Ok(stats) => {
                    self.record_snapshot(&name, &stats);
                    sampled += 1;
                }
                Err(err) => {
                    warn!(instance = %name, error = %err, "skipping instance during collection");
                }
            }
        }
        debug!(instances = sampled, "metrics collection cycle complete");
    }

    /// Value-only projection of the series within a time window
    pub fn get_historical_data(&self, metric: Metric, instance: &str, range: TimeRange) -> Vec<f64> {
        self.points(metric, instance, range)
            .into_iter()
            .map(|point| point.value)
            .collect()
    }

    /// Sampled points within a time window, oldest first
    pub fn points(&self, metric: Metric, instance: &str, range: TimeRange) -> Vec<SampledPoint> {
        let cutoff = range.duration().map(|window| Utc::now() - window);
        let series = self.series.read();
        let Some(points) = series.get(&(metric, instance.to_string())) else {
            return Vec::new();
        };
        points
            .iter()
            .filter(|point| cutoff.map_or(true, |cutoff| point.timestamp >= cutoff))
            .copied()
            .collect()
    }

    /// Number of points held for one series
    pub fn series_len(&self, metric: Metric, instance: &str) -> usize {
        self.series
            .read()
            .get(&(metric, instance.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// Change the sampling interval; applies from the next cycle
    pub fn set_interval(&self, interval: Duration) {
        self.config.write().interval = interval;
    }

    /// Drop all series for an instance (e.g. after unregistration)
    pub fn drop_instance(&self, instance: &str) {
        self.series
            .write()
            .retain(|(_, name), _| name != instance);
        self.baselines.lock().remove(instance);
    }

    fn record_snapshot(&self, instance: &str, stats: &CacheStats) {
        let timestamp = Utc::now();
        let eviction_rate = self.eviction_rate(instance, stats);

        for metric in Metric::ALL {
            let value = match metric {
                Metric::HitRate => stats.hit_rate(),
                Metric::MissRate => stats.miss_rate(),
                Metric::Throughput => stats.throughput_ops_sec,
                Metric::Latency => stats.avg_latency_ms,
                Metric::Size => stats.size as f64,
                Metric::MemoryUsage => stats.memory_usage_bytes as f64,
                Metric::EvictionRate => eviction_rate,
                Metric::ErrorRate => stats.error_rate(),
            };
            self.append_point(metric, instance, SampledPoint { timestamp, value });
        }
    }

    /// Evictions per second since the previous snapshot of this instance
    fn eviction_rate(&self, instance: &str, stats: &CacheStats) -> f64 {
        let now = Instant::now();
        let mut baselines = self.baselines.lock();
        let rate = match baselines.get(instance) {
            Some(baseline) => {
                let elapsed = now.duration_since(baseline.at).as_secs_f64();
                if elapsed <= f64::EPSILON {
                    0.0
                } else {
                    stats.evictions.saturating_sub(baseline.evictions) as f64 / elapsed
                }
            }
            None => 0.0,
        };
        baselines.insert(
            instance.to_string(),
            RateBaseline {
                evictions: stats.evictions,
                at: now,
            },
        );
        rate
    }

    fn append_point(&self, metric: Metric, instance: &str, point: SampledPoint) {
        let max_points = self.config.read().max_points;
        let mut series = self.series.write();
        let points = series
            .entry((metric, instance.to_string()))
            .or_default();
        points.push_back(point);
        while points.len() > max_points {
            points.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use vigil_cache::{CacheInstance, CacheStore};
    use vigil_core::{Error, Result};

    #[derive(Debug)]
    struct BrokenCache;

    #[async_trait]
    impl CacheInstance for BrokenCache {
        async fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::configuration("broken"))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn stats(&self) -> Result<CacheStats> {
            Err(Error::configuration("stats backend unavailable"))
        }
    }

    fn collector_with(
        registry: Arc<CacheRegistry>,
        max_points: usize,
    ) -> MetricsCollector {
        MetricsCollector::new(
            registry,
            CollectorConfig {
                interval: Duration::from_secs(30),
                max_points,
            },
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn samples_every_metric_for_each_instance() {
        let registry = Arc::new(CacheRegistry::new(EventBus::default()));
        let store = Arc::new(CacheStore::default());
        store.set("k", json!("v"), None);
        store.get("k");
        registry.register("sessions", store).unwrap();

        let collector = collector_with(registry, 100);
        collector.collect_once().await;

        for metric in Metric::ALL {
            assert_eq!(collector.series_len(metric, "sessions"), 1, "{metric}");
        }
        let hit_rates = collector.get_historical_data(Metric::HitRate, "sessions", TimeRange::All);
        assert_eq!(hit_rates, vec![1.0]);
    }

    #[tokio::test]
    async fn broken_instance_does_not_block_others() {
        let registry = Arc::new(CacheRegistry::new(EventBus::default()));
        registry.register("broken", Arc::new(BrokenCache)).unwrap();
        registry
            .register("healthy", Arc::new(CacheStore::default()))
            .unwrap();

        let collector = collector_with(registry, 100);
        collector.collect_once().await;

        assert_eq!(collector.series_len(Metric::HitRate, "healthy"), 1);
        assert_eq!(collector.series_len(Metric::HitRate, "broken"), 0);
    }

    #[tokio::test]
    async fn series_is_capped_with_oldest_points_dropped() {
        let registry = Arc::new(CacheRegistry::new(EventBus::default()));
        registry
            .register("sessions", Arc::new(CacheStore::default()))
            .unwrap();

        let collector = collector_with(registry, 3);
        for _ in 0..5 {
            collector.collect_once().await;
        }
        assert_eq!(collector.series_len(Metric::Size, "sessions"), 3);
    }

    #[tokio::test]
    async fn historical_range_filters_by_timestamp() {
        let registry = Arc::new(CacheRegistry::new(EventBus::default()));
        let collector = collector_with(registry, 100);

        let old = SampledPoint {
            timestamp: Utc::now() - chrono::Duration::hours(2),
            value: 1.0,
        };
        let fresh = SampledPoint {
            timestamp: Utc::now(),
            value: 2.0,
        };
        collector.append_point(Metric::HitRate, "sessions", old);
        collector.append_point(Metric::HitRate, "sessions", fresh);

        let last_hour =
            collector.get_historical_data(Metric::HitRate, "sessions", TimeRange::LastHour);
        assert_eq!(last_hour, vec![2.0]);

        let all = collector.get_historical_data(Metric::HitRate, "sessions", TimeRange::All);
        assert_eq!(all, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn drop_instance_clears_its_series() {
        let registry = Arc::new(CacheRegistry::new(EventBus::default()));
        registry
            .register("sessions", Arc::new(CacheStore::default()))
            .unwrap();

        let collector = collector_with(registry, 100);
        collector.collect_once().await;
        assert_eq!(collector.series_len(Metric::HitRate, "sessions"), 1);

        collector.drop_instance("sessions");
        assert_eq!(collector.series_len(Metric::HitRate, "sessions"), 0);
    }
}
