//! Composite configuration for the full subsystem.

use serde::{Deserialize, Serialize};
use vigil_cache::CacheStoreConfig;
use vigil_core::events::DEFAULT_EVENT_CAPACITY;
use vigil_monitor::{AlertConfig, AlertThresholds, AnomalyConfig, CollectorConfig, HealthConfig, TrendConfig};
use vigil_warmup::SchedulerConfig;

/// Every tunable of the subsystem, supplied at construction time
///
/// Individual subsystems also expose runtime setters for the values that
/// may change while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
    /// Defaults applied to stores created through the engine
    pub cache: CacheStoreConfig,
    pub collector: CollectorConfig,
    pub anomaly: AnomalyConfig,
    pub trend: TrendConfig,
    pub alerts: AlertConfig,
    pub alert_thresholds: AlertThresholds,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            cache: CacheStoreConfig::default(),
            collector: CollectorConfig::default(),
            anomaly: AnomalyConfig::default(),
            trend: TrendConfig::default(),
            alerts: AlertConfig::default(),
            alert_thresholds: AlertThresholds::default(),
            health: HealthConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheStoreConfig) -> Self {
        self.config.cache = cache;
        self
    }

    #[must_use]
    pub fn collector(mut self, collector: CollectorConfig) -> Self {
        self.config.collector = collector;
        self
    }

    #[must_use]
    pub fn anomaly(mut self, anomaly: AnomalyConfig) -> Self {
        self.config.anomaly = anomaly;
        self
    }

    #[must_use]
    pub fn trend(mut self, trend: TrendConfig) -> Self {
        self.config.trend = trend;
        self
    }

    #[must_use]
    pub fn alerts(mut self, alerts: AlertConfig) -> Self {
        self.config.alerts = alerts;
        self
    }

    #[must_use]
    pub fn alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.config.alert_thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
