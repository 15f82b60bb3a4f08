//! Record types produced by the monitoring pipeline.
//!
//! Everything here is serde-serializable with no cyclic references, so the
//! rendering layers outside this subsystem can serialize records directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_core::{Metric, Severity};

/// One sampled metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampledPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// An anomaly flagged by the detector; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Deterministic id: `{metric}_{instance}_{timestamp_millis}`
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub instance: String,
    pub metric: Metric,
    pub value: f64,
    /// The range the value was expected to fall in: configured bounds for
    /// threshold breaches, mean ± 2σ for statistical ones
    pub expected_range: (f64, f64),
    pub severity: Severity,
    pub causes: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Direction of a fitted metric trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// Extrapolations of the fitted trend line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub next_hour: f64,
    pub next_day: f64,
    pub next_week: f64,
}

/// A contributing factor annotated onto a trend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrendFactor {
    /// Coefficient of variation above the volatility threshold
    Volatility { impact: f64 },
    /// A repeating period detected by lag autocorrelation
    Seasonality { period: usize, strength: f64 },
    /// The fit changes materially when 3σ outliers are removed
    OutlierSensitivity { impact: f64 },
    /// Hit rate degrading fast enough to threaten cache effectiveness
    CacheEfficiency { impact: f64 },
}

/// Derived, stateless projection of a metric series; recomputed per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub metric: Metric,
    pub instance: String,
    pub direction: TrendDirection,
    pub change_rate_pct: f64,
    /// R² of the fit, clamped to [0, 1]
    pub confidence: f64,
    pub forecast: Forecast,
    pub factors: Vec<TrendFactor>,
}

/// Per-check observations behind a health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    /// Whether the write→read→delete probe completed
    pub connectivity: bool,
    pub response_time_ms: f64,
    /// Fill level as a fraction of capacity
    pub memory_usage: f64,
    pub hit_rate: f64,
    pub error_rate: f64,
}

/// Outcome of one active health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    pub is_healthy: bool,
    pub checks: HealthChecks,
    pub issues: Vec<String>,
    /// Composite score in [0, 100]
    pub score: f64,
}

/// An operator-facing alert; mutated only by acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub instance: String,
    pub title: String,
    pub message: String,
    pub metric: Option<Metric>,
    pub current_value: f64,
    pub threshold: f64,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        severity: Severity,
        instance: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        metric: Option<Metric>,
        current_value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            instance: instance.into(),
            title: title.into(),
            message: message.into(),
            metric,
            current_value,
            threshold,
            acknowledged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_to_json() {
        let record = AnomalyRecord {
            id: "hit_rate_sessions_1700000000000".to_string(),
            timestamp: Utc::now(),
            instance: "sessions".to_string(),
            metric: Metric::HitRate,
            value: 0.2,
            expected_range: (0.5, 1.0),
            severity: Severity::Medium,
            causes: vec!["cache size too small for the working set".to_string()],
            recommendations: vec!["increase max_size".to_string()],
        };
        let json = serde_json::to_string(&record).expect("serializable");
        assert!(json.contains("\"hit_rate\""));

        let alert = Alert::new(
            Severity::Critical,
            "sessions",
            "High error rate",
            "error rate 12.0% above limit 5.0%",
            Some(Metric::ErrorRate),
            0.12,
            0.05,
        );
        assert!(serde_json::to_string(&alert).is_ok());
        assert!(!alert.acknowledged);
    }

    #[test]
    fn trend_factors_tag_their_kind() {
        let factor = TrendFactor::Seasonality {
            period: 3,
            strength: 0.8,
        };
        let json = serde_json::to_string(&factor).expect("serializable");
        assert!(json.contains("\"seasonality\""));
    }
}
