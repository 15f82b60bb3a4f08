//! The wired subsystem: registry, monitoring pipeline, and warming pipeline
//! sharing one event bus.

use crate::config::EngineConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_cache::{CacheInstance, CacheRegistry, CacheStats, CacheStore};
use vigil_core::{EventBus, Metric, Result, TimeRange};
use vigil_monitor::{
    Alert, AlertManager, AlertThresholds, AnomalyDetector, AnomalyRecord, HealthCheckResult,
    HealthChecker, MetricsCollector, TrendAnalyzer, TrendResult,
};
use vigil_warmup::{
    DataLoaderManager, ImmediateStrategy, PrewarmItem, PrewarmScheduler, ProgressCallback,
    WarmupStrategy,
};

/// Point-in-time rollup of one instance for rendering layers
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub name: String,
    /// Absent when the instance's stats read failed
    pub stats: Option<CacheStats>,
    /// Latest health score, if the instance has been probed
    pub health_score: Option<f64>,
}

/// Serializable snapshot of the whole subsystem, consumed by external
/// report/rendering layers
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSummary {
    pub timestamp: DateTime<Utc>,
    pub instances: Vec<InstanceSummary>,
    pub unacknowledged_alerts: usize,
    pub aggregate_health: f64,
}

/// The assembled cache engine and operational intelligence subsystem
///
/// Construction wires every component to one shared [`EventBus`] and one
/// instance registry; [`Engine::start`] spawns the background loops
/// (metrics sampling, scheduler sweep, prewarm worker).
pub struct Engine {
    events: EventBus,
    registry: Arc<CacheRegistry>,
    collector: Arc<MetricsCollector>,
    anomaly: Arc<AnomalyDetector>,
    trend: Arc<TrendAnalyzer>,
    alerts: Arc<AlertManager>,
    health: Arc<HealthChecker>,
    scheduler: Arc<PrewarmScheduler>,
    loaders: Arc<DataLoaderManager>,
    alert_thresholds: RwLock<AlertThresholds>,
    store_config: vigil_cache::CacheStoreConfig,
    /// Strategy chosen for each submitted task, consumed by the worker
    strategies: Arc<DashMap<String, Arc<dyn WarmupStrategy>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(CacheRegistry::new(events.clone()));
        let collector = Arc::new(MetricsCollector::new(
            Arc::clone(&registry),
            config.collector,
            events.clone(),
        ));
        Self {
            anomaly: Arc::new(AnomalyDetector::new(config.anomaly, events.clone())),
            trend: Arc::new(TrendAnalyzer::new(config.trend)),
            alerts: Arc::new(AlertManager::new(config.alerts, events.clone())),
            health: Arc::new(HealthChecker::new(config.health)),
            scheduler: Arc::new(PrewarmScheduler::new(config.scheduler, events.clone())),
            loaders: Arc::new(DataLoaderManager::new()),
            alert_thresholds: RwLock::new(config.alert_thresholds),
            store_config: config.cache,
            strategies: Arc::new(DashMap::new()),
            handles: Mutex::new(Vec::new()),
            events,
            registry,
            collector,
        }
    }

    /// Spawn the background loops; requires a running tokio runtime
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(Arc::clone(&self.collector).run()));
        handles.push(tokio::spawn(Arc::clone(&self.scheduler).run_sweeper()));

        if let Some(started) = self.scheduler.take_started_receiver() {
            let registry = Arc::clone(&self.registry);
            let scheduler = Arc::clone(&self.scheduler);
            let strategies = Arc::clone(&self.strategies);
            handles.push(tokio::spawn(run_prewarm_worker(
                registry, scheduler, strategies, started,
            )));
        }
        info!("engine background loops started");
    }

    /// Stop the background loops
    pub fn shutdown(&self) {
        self.collector.stop();
        self.scheduler.shutdown();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!("engine shut down");
    }

    /// Create a store from the engine's cache defaults, register it under
    /// `name`, and start its expiry sweeper.
    pub fn create_store(&self, name: &str) -> Result<Arc<CacheStore>> {
        let store = Arc::new(CacheStore::new(self.store_config.clone()));
        self.registry.register(name, store.clone() as Arc<dyn CacheInstance>)?;
        self.handles
            .lock()
            .push(tokio::spawn(Arc::clone(&store).run_sweeper()));
        Ok(store)
    }

    /// Register an externally-owned cache instance
    pub fn register_instance(
        &self,
        name: &str,
        instance: Arc<dyn CacheInstance>,
    ) -> Result<()> {
        self.registry.register(name, instance)
    }

    /// Remove an instance and drop its metric series
    pub fn unregister_instance(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.collector.drop_instance(name);
        }
        removed
    }

    /// Run the alert rules and anomaly checks for one instance
    ///
    /// Alerts come from the instance's current stats snapshot; anomaly
    /// checks evaluate the latest sampled point of every metric against
    /// its history.
    pub async fn evaluate_instance(&self, name: &str) -> Result<(Vec<Alert>, Vec<AnomalyRecord>)> {
        let cache = self.registry.get(name)?;
        let stats = cache.stats().await?;
        let alerts =
            self.alerts
                .check_metrics_alerts(name, &stats, &self.alert_thresholds.read().clone());

        let mut anomalies = Vec::new();
        for metric in Metric::ALL {
            let series = self
                .collector
                .get_historical_data(metric, name, TimeRange::All);
            if let Some((&value, history)) = series.split_last() {
                if let Some(record) = self.anomaly.check_anomaly(metric, name, value, history) {
                    anomalies.push(record);
                }
            }
        }
        Ok((alerts, anomalies))
    }

    /// Fit a trend to one metric's sampled history
    pub fn analyze_trend(&self, metric: Metric, instance: &str, range: TimeRange) -> TrendResult {
        let values = self.collector.get_historical_data(metric, instance, range);
        self.trend.analyze(metric, instance, &values)
    }

    /// Probe one instance and record the result
    pub async fn check_health(&self, name: &str) -> Result<HealthCheckResult> {
        let cache = self.registry.get(name)?;
        Ok(self.health.perform_health_check(name, cache.as_ref()).await)
    }

    /// Average health score across all registered instances
    pub fn aggregate_health(&self) -> f64 {
        self.health.aggregate_score(&self.registry.names())
    }

    /// Queue a prewarm task for `instance`, to be executed with `strategy`
    /// by the background worker.
    pub fn prewarm(
        &self,
        instance: &str,
        items: Vec<PrewarmItem>,
        strategy: Arc<dyn WarmupStrategy>,
    ) -> Result<String> {
        // Fail fast on unknown instances rather than at execution time
        self.registry.get(instance)?;
        let task_id = self.scheduler.submit(instance, items);
        self.strategies.insert(task_id.clone(), strategy);
        Ok(task_id)
    }

    /// Fetch items from a named loader and queue them for prewarming
    pub async fn load_and_prewarm(
        &self,
        loader: &str,
        keys: &[String],
        instance: &str,
        strategy: Arc<dyn WarmupStrategy>,
    ) -> Result<String> {
        let items = self.loaders.load_data(loader, keys).await?;
        self.prewarm(instance, items, strategy)
    }

    /// Best-effort snapshot of every instance for rendering layers
    ///
    /// A failing stats read leaves that instance's `stats` absent rather
    /// than failing the summary.
    pub async fn statistics_summary(&self) -> StatisticsSummary {
        let names = self.registry.names();
        let mut instances = Vec::with_capacity(names.len());
        for name in &names {
            let stats = match self.registry.get(name) {
                Ok(cache) => cache.stats().await.ok(),
                Err(_) => None,
            };
            instances.push(InstanceSummary {
                name: name.clone(),
                stats,
                health_score: self.health.latest(name).map(|result| result.score),
            });
        }
        StatisticsSummary {
            timestamp: Utc::now(),
            instances,
            unacknowledged_alerts: self.alerts.unacknowledged_count(),
            aggregate_health: self.health.aggregate_score(&names),
        }
    }

    /// Replace the alert rule thresholds at runtime
    pub fn set_alert_thresholds(&self, thresholds: AlertThresholds) {
        *self.alert_thresholds.write() = thresholds;
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn anomaly(&self) -> &Arc<AnomalyDetector> {
        &self.anomaly
    }

    pub fn trend(&self) -> &Arc<TrendAnalyzer> {
        &self.trend
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn scheduler(&self) -> &Arc<PrewarmScheduler> {
        &self.scheduler
    }

    pub fn loaders(&self) -> &Arc<DataLoaderManager> {
        &self.loaders
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("instances", &self.registry.names())
            .finish()
    }
}

/// Executes started prewarm tasks with their chosen strategy
///
/// Each task runs in its own spawned task, so the scheduler's concurrency
/// bound is the only limit on simultaneous execution.
async fn run_prewarm_worker(
    registry: Arc<CacheRegistry>,
    scheduler: Arc<PrewarmScheduler>,
    strategies: Arc<DashMap<String, Arc<dyn WarmupStrategy>>>,
    mut started: tokio::sync::mpsc::UnboundedReceiver<String>,
) {
    while let Some(task_id) = started.recv().await {
        let Some(task) = scheduler.task(&task_id) else {
            continue;
        };
        let cache = match registry.get(&task.instance) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "prewarm target disappeared");
                let _ = scheduler.complete_task(&task_id, false, Some(err.to_string()));
                continue;
            }
        };
        let strategy = strategies
            .remove(&task_id)
            .map(|(_, strategy)| strategy)
            .unwrap_or_else(|| Arc::new(ImmediateStrategy::default()) as Arc<dyn WarmupStrategy>);

        let scheduler_for_task = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let progress_scheduler = Arc::clone(&scheduler_for_task);
            let progress_id = task_id.clone();
            let progress: ProgressCallback = Arc::new(move |processed, _total| {
                let _ = progress_scheduler.update_progress(&progress_id, processed, 0);
            });

            let outcome = strategy
                .execute(cache, task.items.clone(), Some(progress))
                .await;
            let _ = scheduler_for_task.update_progress(
                &task_id,
                outcome.successful,
                outcome.failed,
            );
            let _ = scheduler_for_task.complete_task(&task_id, true, None);
        });
    }
}

/// The process-wide default engine
///
/// Lazily constructed from `EngineConfig::default()`; background loops are
/// not started automatically. Library code must never reach for this: it
/// exists only for applications that want one shared instance at their
/// outermost composition point.
pub fn default_engine() -> &'static Engine {
    static DEFAULT: Lazy<Engine> = Lazy::new(|| Engine::new(EngineConfig::default()));
    &DEFAULT
}
