//! Operational intelligence over registered cache instances.
//!
//! The pipeline runs one direction: the [`collector`] samples stats from
//! every registered instance into per-metric time series; the [`anomaly`]
//! detector and [`trend`] analyzer evaluate those series; [`alerts`] and
//! [`health`] turn breaches and probe results into operator-facing surfaces.
//! Everything here degrades to a best-effort snapshot instead of raising:
//! a broken instance yields a warning and a zero score, never a crash of
//! the pipeline.

pub mod alerts;
pub mod anomaly;
pub mod collector;
pub mod health;
pub mod trend;
pub mod types;

pub use alerts::{AlertConfig, AlertFilter, AlertManager, AlertThresholds, AlertTrend};
pub use anomaly::{AnomalyConfig, AnomalyDetector, MetricThreshold};
pub use collector::{CollectorConfig, MetricsCollector};
pub use health::{HealthChecker, HealthConfig};
pub use trend::{TrendAnalyzer, TrendConfig};
pub use types::{
    Alert, AnomalyRecord, Forecast, HealthCheckResult, HealthChecks, SampledPoint, TrendDirection,
    TrendFactor, TrendResult,
};
