//! Threshold and z-score anomaly detection over sampled metrics.

use crate::types::AnomalyRecord;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use vigil_core::{Error, EventBus, Metric, Result, Severity, SystemEvent};

/// Static bounds a sampled value must fall within
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub min: f64,
    pub max: f64,
}

impl MetricThreshold {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if min >= max {
            return Err(Error::configuration(format!(
                "threshold min {min} must be below max {max}"
            )));
        }
        Ok(Self { min, max })
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Distance past the violated bound, normalized by the bound span
    fn deviation(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        ((self.min - value).max(value - self.max)).max(0.0) / span
    }
}

/// Configuration for the anomaly detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// While false, `check_anomaly` always reports "no anomaly"
    pub enabled: bool,
    /// Minimum history points before the statistical check applies
    pub min_history: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_history: 10,
        }
    }
}

/// Evaluates sampled values against static thresholds and, failing that,
/// against the z-score of the value's historical window.
#[derive(Debug)]
pub struct AnomalyDetector {
    config: RwLock<AnomalyConfig>,
    default_thresholds: RwLock<HashMap<Metric, MetricThreshold>>,
    instance_thresholds: RwLock<HashMap<(String, Metric), MetricThreshold>>,
    log: RwLock<Vec<AnomalyRecord>>,
    events: EventBus,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, events: EventBus) -> Self {
        Self {
            config: RwLock::new(config),
            default_thresholds: RwLock::new(builtin_thresholds()),
            instance_thresholds: RwLock::new(HashMap::new()),
            log: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Evaluate one sampled value
    ///
    /// The threshold check runs first against the instance-specific bounds
    /// (falling back to the metric default). Only when it passes and enough
    /// history exists does the statistical check run.
    pub fn check_anomaly(
        &self,
        metric: Metric,
        instance: &str,
        value: f64,
        history: &[f64],
    ) -> Option<AnomalyRecord> {
        if !self.config.read().enabled {
            return None;
        }

        let threshold = self.threshold_for(metric, instance);
        if let Some(threshold) = threshold {
            if !threshold.contains(value) {
                let severity = severity_from_deviation(threshold.deviation(value));
                return Some(self.record(
                    metric,
                    instance,
                    value,
                    (threshold.min, threshold.max),
                    severity,
                ));
            }
        }

        let min_history = self.config.read().min_history;
        if history.len() < min_history {
            return None;
        }
        let (mean, stddev) = mean_stddev(history);
        if stddev <= f64::EPSILON {
            return None;
        }
        let z = (value - mean).abs() / stddev;
        let severity = if z > 3.0 {
            Severity::High
        } else if z > 2.0 {
            Severity::Medium
        } else if z > 1.5 {
            Severity::Low
        } else {
            return None;
        };
        Some(self.record(
            metric,
            instance,
            value,
            (mean - 2.0 * stddev, mean + 2.0 * stddev),
            severity,
        ))
    }

    /// Most recent anomalies, newest first
    pub fn recent(&self, limit: usize) -> Vec<AnomalyRecord> {
        let log = self.log.read();
        log.iter().rev().take(limit).cloned().collect()
    }

    /// Anomalies for one instance, newest first
    pub fn for_instance(&self, instance: &str, limit: usize) -> Vec<AnomalyRecord> {
        let log = self.log.read();
        log.iter()
            .rev()
            .filter(|record| record.instance == instance)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop anomalies older than `max_age`, returning how many were removed
    pub fn prune_older_than(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut log = self.log.write();
        let before = log.len();
        log.retain(|record| record.timestamp >= cutoff);
        before - log.len()
    }

    /// Replace the default bounds for a metric
    pub fn set_threshold(&self, metric: Metric, threshold: MetricThreshold) -> Result<()> {
        MetricThreshold::new(threshold.min, threshold.max)?;
        self.default_thresholds.write().insert(metric, threshold);
        self.events.emit(SystemEvent::ThresholdUpdated {
            metric,
            instance: None,
        });
        Ok(())
    }

    /// Set bounds that apply only to one instance
    pub fn set_instance_threshold(
        &self,
        instance: impl Into<String>,
        metric: Metric,
        threshold: MetricThreshold,
    ) -> Result<()> {
        MetricThreshold::new(threshold.min, threshold.max)?;
        let instance = instance.into();
        self.instance_thresholds
            .write()
            .insert((instance.clone(), metric), threshold);
        self.events.emit(SystemEvent::ThresholdUpdated {
            metric,
            instance: Some(instance),
        });
        Ok(())
    }

    /// Globally enable or disable detection
    pub fn set_enabled(&self, enabled: bool) {
        self.config.write().enabled = enabled;
        debug!(enabled, "anomaly detection toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    fn threshold_for(&self, metric: Metric, instance: &str) -> Option<MetricThreshold> {
        if let Some(threshold) = self
            .instance_thresholds
            .read()
            .get(&(instance.to_string(), metric))
        {
            return Some(*threshold);
        }
        self.default_thresholds.read().get(&metric).copied()
    }

    fn record(
        &self,
        metric: Metric,
        instance: &str,
        value: f64,
        expected_range: (f64, f64),
        severity: Severity,
    ) -> AnomalyRecord {
        let timestamp = Utc::now();
        let (causes, recommendations) = causes_for(metric, value, expected_range);
        let record = AnomalyRecord {
            id: format!(
                "{}_{}_{}",
                metric.as_str(),
                instance,
                timestamp.timestamp_millis()
            ),
            timestamp,
            instance: instance.to_string(),
            metric,
            value,
            expected_range,
            severity,
            causes,
            recommendations,
        };
        self.log.write().push(record.clone());
        self.events.emit(SystemEvent::AnomalyDetected {
            id: record.id.clone(),
            instance: record.instance.clone(),
            metric,
            severity,
            value,
        });
        record
    }
}

fn severity_from_deviation(deviation: f64) -> Severity {
    if deviation > 0.5 {
        Severity::High
    } else if deviation > 0.2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Default bounds per metric; rates are fractions, latency in milliseconds
fn builtin_thresholds() -> HashMap<Metric, MetricThreshold> {
    let mut thresholds = HashMap::new();
    thresholds.insert(Metric::HitRate, MetricThreshold { min: 0.5, max: 1.0 });
    thresholds.insert(Metric::MissRate, MetricThreshold { min: 0.0, max: 0.5 });
    thresholds.insert(
        Metric::Latency,
        MetricThreshold {
            min: 0.0,
            max: 250.0,
        },
    );
    thresholds.insert(
        Metric::ErrorRate,
        MetricThreshold {
            min: 0.0,
            max: 0.05,
        },
    );
    thresholds.insert(
        Metric::EvictionRate,
        MetricThreshold {
            min: 0.0,
            max: 100.0,
        },
    );
    thresholds
}

fn causes_for(metric: Metric, value: f64, expected: (f64, f64)) -> (Vec<String>, Vec<String>) {
    let below = value < expected.0;
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();

    match (metric, below) {
        (Metric::HitRate, true) | (Metric::MissRate, false) => (
            owned(&[
                "cache size too small for the working set",
                "TTL too short for the access pattern",
                "recent restart or flush emptied the cache",
            ]),
            owned(&[
                "increase max_size",
                "lengthen the default TTL",
                "prewarm hot keys after restarts",
            ]),
        ),
        (Metric::Latency, false) => (
            owned(&[
                "oversized values inflating serialization cost",
                "lock contention from concurrent writers",
            ]),
            owned(&[
                "store smaller values or split large entries",
                "reduce write concurrency or shard the keyspace",
            ]),
        ),
        (Metric::ErrorRate, false) => (
            owned(&[
                "failing value factories in get_or_set",
                "backing data source degraded",
            ]),
            owned(&[
                "inspect recent error logs for the instance",
                "verify upstream data sources are healthy",
            ]),
        ),
        (Metric::EvictionRate, false) => (
            owned(&[
                "working set exceeds configured capacity",
                "prewarm batches overflowing the store",
            ]),
            owned(&["increase max_size", "reduce prewarm batch breadth"]),
        ),
        (Metric::MemoryUsage, false) | (Metric::Size, false) => (
            owned(&["entry volume or value size grew beyond expectations"]),
            owned(&["tighten TTLs", "lower max_size to force earlier eviction"]),
        ),
        (Metric::Throughput, true) => (
            owned(&["traffic drop or upstream callers degraded"]),
            owned(&["check caller health and request routing"]),
        ),
        _ => (
            owned(&["value outside the expected range for this metric"]),
            owned(&["review recent configuration and traffic changes"]),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default(), EventBus::default())
    }

    /// History with population mean 10 and stddev 1
    fn unit_history() -> Vec<f64> {
        vec![9.0, 11.0, 9.0, 11.0, 9.0, 11.0, 9.0, 11.0, 9.0, 11.0]
    }

    #[test]
    fn disabled_detector_reports_nothing() {
        let detector = detector();
        detector.set_enabled(false);
        assert!(detector
            .check_anomaly(Metric::HitRate, "sessions", -5.0, &[])
            .is_none());
        assert!(!detector.is_enabled());
    }

    #[test]
    fn threshold_breach_severity_scales_with_deviation() {
        let detector = detector();
        detector
            .set_threshold(Metric::Latency, MetricThreshold { min: 0.0, max: 100.0 })
            .unwrap();

        // deviation = 110/100 = 1.1 -> high
        let record = detector
            .check_anomaly(Metric::Latency, "a", 210.0, &[])
            .unwrap();
        assert_eq!(record.severity, Severity::High);

        // deviation = 30/100 = 0.3 -> medium
        let record = detector
            .check_anomaly(Metric::Latency, "a", 130.0, &[])
            .unwrap();
        assert_eq!(record.severity, Severity::Medium);

        // deviation = 10/100 = 0.1 -> low
        let record = detector
            .check_anomaly(Metric::Latency, "a", 110.0, &[])
            .unwrap();
        assert_eq!(record.severity, Severity::Low);
    }

    #[test]
    fn z_score_boundaries() {
        let detector = detector();
        // Wide bounds so the threshold check passes and the statistical
        // check is the deciding trigger.
        detector
            .set_threshold(
                Metric::Throughput,
                MetricThreshold {
                    min: 0.0,
                    max: 1000.0,
                },
            )
            .unwrap();
        let history = unit_history();

        // z = 2.5 -> medium
        let record = detector
            .check_anomaly(Metric::Throughput, "a", 12.5, &history)
            .unwrap();
        assert_eq!(record.severity, Severity::Medium);

        // z = 3.5 -> high
        let record = detector
            .check_anomaly(Metric::Throughput, "a", 13.5, &history)
            .unwrap();
        assert_eq!(record.severity, Severity::High);

        // z = 1.6 -> low
        let record = detector
            .check_anomaly(Metric::Throughput, "a", 11.6, &history)
            .unwrap();
        assert_eq!(record.severity, Severity::Low);

        // z = 1.0 -> not anomalous
        assert!(detector
            .check_anomaly(Metric::Throughput, "a", 11.0, &history)
            .is_none());
    }

    #[test]
    fn statistical_check_requires_enough_history() {
        let detector = detector();
        detector
            .set_threshold(
                Metric::Throughput,
                MetricThreshold {
                    min: 0.0,
                    max: 1000.0,
                },
            )
            .unwrap();
        let short_history = vec![10.0; 5];
        assert!(detector
            .check_anomaly(Metric::Throughput, "a", 500.0, &short_history)
            .is_none());
    }

    #[test]
    fn instance_threshold_overrides_default() {
        let detector = detector();
        detector
            .set_instance_threshold("strict", Metric::HitRate, MetricThreshold { min: 0.9, max: 1.0 })
            .unwrap();

        // 0.8 passes the default bounds but breaches the instance bounds
        assert!(detector
            .check_anomaly(Metric::HitRate, "strict", 0.8, &[])
            .is_some());
        assert!(detector
            .check_anomaly(Metric::HitRate, "lenient", 0.8, &[])
            .is_none());
    }

    #[test]
    fn anomaly_ids_are_deterministic() {
        let detector = detector();
        let record = detector
            .check_anomaly(Metric::HitRate, "sessions", 0.1, &[])
            .unwrap();
        assert_eq!(
            record.id,
            format!(
                "hit_rate_sessions_{}",
                record.timestamp.timestamp_millis()
            )
        );
        assert!(!record.causes.is_empty());
        assert!(!record.recommendations.is_empty());
    }

    #[test]
    fn log_is_append_only_and_prunable() {
        let detector = detector();
        detector.check_anomaly(Metric::HitRate, "a", 0.1, &[]);
        detector.check_anomaly(Metric::HitRate, "b", 0.1, &[]);
        assert_eq!(detector.recent(10).len(), 2);
        assert_eq!(detector.for_instance("a", 10).len(), 1);

        // Nothing is old enough to prune yet
        assert_eq!(detector.prune_older_than(chrono::Duration::hours(1)), 0);
        assert_eq!(detector.prune_older_than(chrono::Duration::zero()), 2);
        assert!(detector.recent(10).is_empty());
    }

    #[tokio::test]
    async fn detection_emits_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let detector = AnomalyDetector::new(AnomalyConfig::default(), bus);

        detector.check_anomaly(Metric::HitRate, "sessions", 0.1, &[]);
        match rx.recv().await {
            Ok(SystemEvent::AnomalyDetected { instance, metric, .. }) => {
                assert_eq!(instance, "sessions");
                assert_eq!(metric, Metric::HitRate);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn invalid_threshold_rejected() {
        let detector = detector();
        let err = detector
            .set_threshold(Metric::HitRate, MetricThreshold { min: 1.0, max: 0.5 })
            .unwrap_err();
        assert!(err.to_string().contains("must be below"));
    }
}
