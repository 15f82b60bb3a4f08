//! Threshold-rule alerting with deduplication and trend tracking.

use crate::types::Alert;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;
use vigil_cache::CacheStats;
use vigil_core::{EventBus, Metric, Severity, SystemEvent};

/// Configuration for the alert manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Window during which an identical unacknowledged alert is suppressed
    pub dedup_window: std::time::Duration,
    /// Bounded history size; oldest alerts evicted first
    pub max_history: usize,
    /// A breach this many times past its threshold escalates to critical
    pub escalation_multiplier: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window: std::time::Duration::from_secs(60),
            max_history: 1000,
            escalation_multiplier: 2.0,
        }
    }
}

/// Thresholds for the four fixed metric rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Hit rate below this raises an alert (fraction)
    pub min_hit_rate: f64,
    /// Utilization above this raises an alert (fraction of capacity)
    pub max_memory_utilization: f64,
    /// Average latency above this raises an alert (milliseconds)
    pub max_avg_latency_ms: f64,
    /// Error rate above this raises an alert (fraction)
    pub max_error_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.7,
            max_memory_utilization: 0.9,
            max_avg_latency_ms: 100.0,
            max_error_rate: 0.05,
        }
    }
}

/// Retrieval filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub instance: Option<String>,
    pub severity: Option<Severity>,
    pub acknowledged: Option<bool>,
    pub limit: Option<usize>,
}

/// Direction of the alert rate over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Converts metric breaches into deduplicated, severity-tagged alerts
#[derive(Debug)]
pub struct AlertManager {
    config: RwLock<AlertConfig>,
    alerts: RwLock<VecDeque<Alert>>,
    events: EventBus,
}

impl AlertManager {
    pub fn new(config: AlertConfig, events: EventBus) -> Self {
        Self {
            config: RwLock::new(config),
            alerts: RwLock::new(VecDeque::new()),
            events,
        }
    }

    /// Evaluate the four fixed rules against a stats snapshot, storing one
    /// alert per breach. Returns the alerts that survived deduplication.
    pub fn check_metrics_alerts(
        &self,
        instance: &str,
        stats: &CacheStats,
        thresholds: &AlertThresholds,
    ) -> Vec<Alert> {
        let escalation = self.config.read().escalation_multiplier;
        let mut raised = Vec::new();

        // Hit rate only means something once there has been traffic
        if stats.hits + stats.misses > 0 {
            let hit_rate = stats.hit_rate();
            if hit_rate < thresholds.min_hit_rate {
                raised.push(self.rule_alert(
                    instance,
                    "Low hit rate",
                    format!(
                        "hit rate {:.1}% below minimum {:.1}%",
                        hit_rate * 100.0,
                        thresholds.min_hit_rate * 100.0
                    ),
                    Metric::HitRate,
                    hit_rate,
                    thresholds.min_hit_rate,
                    // A rate half the required floor is 2x past the threshold
                    hit_rate < thresholds.min_hit_rate / escalation,
                ));
            }
        }

        let utilization = stats.utilization();
        if utilization > thresholds.max_memory_utilization {
            raised.push(self.rule_alert(
                instance,
                "High memory utilization",
                format!(
                    "utilization {:.1}% above limit {:.1}%",
                    utilization * 100.0,
                    thresholds.max_memory_utilization * 100.0
                ),
                Metric::MemoryUsage,
                utilization,
                thresholds.max_memory_utilization,
                utilization > thresholds.max_memory_utilization * escalation,
            ));
        }

        if stats.avg_latency_ms > thresholds.max_avg_latency_ms {
            raised.push(self.rule_alert(
                instance,
                "Slow response time",
                format!(
                    "average latency {:.1}ms above limit {:.1}ms",
                    stats.avg_latency_ms, thresholds.max_avg_latency_ms
                ),
                Metric::Latency,
                stats.avg_latency_ms,
                thresholds.max_avg_latency_ms,
                stats.avg_latency_ms > thresholds.max_avg_latency_ms * escalation,
            ));
        }

        let error_rate = stats.error_rate();
        if error_rate > thresholds.max_error_rate {
            raised.push(self.rule_alert(
                instance,
                "High error rate",
                format!(
                    "error rate {:.1}% above limit {:.1}%",
                    error_rate * 100.0,
                    thresholds.max_error_rate * 100.0
                ),
                Metric::ErrorRate,
                error_rate,
                thresholds.max_error_rate,
                error_rate > thresholds.max_error_rate * escalation,
            ));
        }

        raised.into_iter().flatten().collect()
    }

    /// Store an alert unless an identical unacknowledged one exists within
    /// the dedup window. Returns whether the alert was stored.
    pub fn add_alert(&self, alert: Alert) -> bool {
        let config = self.config.read();
        let mut alerts = self.alerts.write();

        let duplicate = alerts.iter().any(|existing| {
            !existing.acknowledged
                && existing.instance == alert.instance
                && existing.title == alert.title
                && (alert.timestamp - existing.timestamp).to_std().is_ok_and(|age| age < config.dedup_window)
        });
        if duplicate {
            debug!(instance = %alert.instance, title = %alert.title, "duplicate alert suppressed");
            return false;
        }

        self.events.emit(SystemEvent::AlertRaised {
            id: alert.id.to_string(),
            instance: alert.instance.clone(),
            title: alert.title.clone(),
            severity: alert.severity,
        });
        alerts.push_back(alert);
        while alerts.len() > config.max_history {
            alerts.pop_front();
        }
        true
    }

    /// Mark an alert acknowledged, reporting whether it was found
    pub fn acknowledge(&self, id: &Uuid) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|alert| alert.id == *id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Remove an alert, reporting whether it was found
    pub fn delete(&self, id: &Uuid) -> bool {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|alert| alert.id != *id);
        alerts.len() != before
    }

    /// Filtered retrieval, newest first
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let alerts = self.alerts.read();
        let mut matched: Vec<Alert> = alerts
            .iter()
            .filter(|alert| {
                filter
                    .instance
                    .as_ref()
                    .map_or(true, |instance| alert.instance == *instance)
                    && filter
                        .severity
                        .map_or(true, |severity| alert.severity == severity)
                    && filter
                        .acknowledged
                        .map_or(true, |acknowledged| alert.acknowledged == acknowledged)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.alerts
            .read()
            .iter()
            .filter(|alert| !alert.acknowledged)
            .count()
    }

    /// Compare alert counts between the first and second half of a window;
    /// a ±20% band around parity counts as stable.
    pub fn alert_trend(&self, window: ChronoDuration) -> AlertTrend {
        let now = Utc::now();
        let cutoff = now - window;
        let midpoint = now - window / 2;

        let (mut first_half, mut second_half) = (0usize, 0usize);
        for alert in self.alerts.read().iter() {
            if alert.timestamp < cutoff {
                continue;
            }
            if alert.timestamp < midpoint {
                first_half += 1;
            } else {
                second_half += 1;
            }
        }

        if first_half == 0 {
            return if second_half > 0 {
                AlertTrend::Increasing
            } else {
                AlertTrend::Stable
            };
        }
        let ratio = second_half as f64 / first_half as f64;
        if ratio > 1.2 {
            AlertTrend::Increasing
        } else if ratio < 0.8 {
            AlertTrend::Decreasing
        } else {
            AlertTrend::Stable
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rule_alert(
        &self,
        instance: &str,
        title: &str,
        message: String,
        metric: Metric,
        current_value: f64,
        threshold: f64,
        critical: bool,
    ) -> Option<Alert> {
        let severity = if critical {
            Severity::Critical
        } else {
            Severity::High
        };
        let alert = Alert::new(
            severity,
            instance,
            title,
            message,
            Some(metric),
            current_value,
            threshold,
        );
        self.add_alert(alert.clone()).then_some(alert)
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default(), EventBus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert_for(instance: &str, title: &str) -> Alert {
        Alert::new(
            Severity::High,
            instance,
            title,
            "message",
            Some(Metric::HitRate),
            0.1,
            0.7,
        )
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let manager = AlertManager::default();
        assert!(manager.add_alert(alert_for("a", "Low hit rate")));
        assert!(!manager.add_alert(alert_for("a", "Low hit rate")));
        assert_eq!(manager.alerts(&AlertFilter::default()).len(), 1);
    }

    #[test]
    fn different_instance_or_title_is_not_a_duplicate() {
        let manager = AlertManager::default();
        assert!(manager.add_alert(alert_for("a", "Low hit rate")));
        assert!(manager.add_alert(alert_for("b", "Low hit rate")));
        assert!(manager.add_alert(alert_for("a", "High error rate")));
        assert_eq!(manager.alerts(&AlertFilter::default()).len(), 3);
    }

    #[test]
    fn acknowledged_alert_allows_a_new_one() {
        let manager = AlertManager::default();
        let first = alert_for("a", "Low hit rate");
        let id = first.id;
        assert!(manager.add_alert(first));
        assert!(manager.acknowledge(&id));
        assert!(manager.add_alert(alert_for("a", "Low hit rate")));
        assert_eq!(manager.unacknowledged_count(), 1);
    }

    #[test]
    fn duplicate_outside_window_is_stored() {
        let manager = AlertManager::default();
        let mut old = alert_for("a", "Low hit rate");
        old.timestamp = Utc::now() - ChronoDuration::seconds(120);
        assert!(manager.add_alert(old));
        assert!(manager.add_alert(alert_for("a", "Low hit rate")));
    }

    #[test]
    fn rules_raise_and_escalate_at_twice_the_threshold() {
        let manager = AlertManager::default();
        let thresholds = AlertThresholds::default();

        // hit rate 0.5: breach but above 0.35 floor -> high
        let stats = CacheStats {
            hits: 50,
            misses: 50,
            ..Default::default()
        };
        let raised = manager.check_metrics_alerts("a", &stats, &thresholds);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, Severity::High);
        assert_eq!(raised[0].metric, Some(Metric::HitRate));

        // error rate 0.2 is past 2x the 0.05 limit -> critical
        let stats = CacheStats {
            hits: 40,
            misses: 40,
            sets: 20,
            errors: 20,
            ..Default::default()
        };
        let raised = manager.check_metrics_alerts("b", &stats, &thresholds);
        let error_alert = raised
            .iter()
            .find(|alert| alert.title == "High error rate")
            .expect("error alert");
        assert_eq!(error_alert.severity, Severity::Critical);
    }

    #[test]
    fn healthy_stats_raise_nothing() {
        let manager = AlertManager::default();
        let stats = CacheStats {
            hits: 90,
            misses: 10,
            size: 10,
            max_size: 100,
            ..Default::default()
        };
        assert!(manager
            .check_metrics_alerts("a", &stats, &AlertThresholds::default())
            .is_empty());
    }

    #[test]
    fn no_traffic_means_no_hit_rate_alert() {
        let manager = AlertManager::default();
        let stats = CacheStats::default();
        assert!(manager
            .check_metrics_alerts("a", &stats, &AlertThresholds::default())
            .is_empty());
    }

    #[test]
    fn history_is_bounded_oldest_first() {
        let manager = AlertManager::new(
            AlertConfig {
                max_history: 3,
                ..Default::default()
            },
            EventBus::default(),
        );
        for i in 0..5 {
            assert!(manager.add_alert(alert_for("a", &format!("title {i}"))));
        }
        let stored = manager.alerts(&AlertFilter::default());
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|alert| alert.title != "title 0"));
        assert!(stored.iter().all(|alert| alert.title != "title 1"));
    }

    #[test]
    fn filtered_retrieval() {
        let manager = AlertManager::default();
        manager.add_alert(alert_for("a", "one"));
        manager.add_alert(alert_for("b", "two"));
        let mut critical = alert_for("b", "three");
        critical.severity = Severity::Critical;
        manager.add_alert(critical);

        let for_b = manager.alerts(&AlertFilter {
            instance: Some("b".to_string()),
            ..Default::default()
        });
        assert_eq!(for_b.len(), 2);

        let criticals = manager.alerts(&AlertFilter {
            severity: Some(Severity::Critical),
            ..Default::default()
        });
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].title, "three");
    }

    #[test]
    fn alert_trend_compares_window_halves() {
        let manager = AlertManager::default();
        let window = ChronoDuration::minutes(10);

        // 1 alert in the first half, 3 in the second
        let mut early = alert_for("a", "early");
        early.timestamp = Utc::now() - ChronoDuration::minutes(8);
        manager.add_alert(early);
        for i in 0..3 {
            let mut late = alert_for("a", &format!("late {i}"));
            late.timestamp = Utc::now() - ChronoDuration::minutes(1);
            manager.add_alert(late);
        }
        assert_eq!(manager.alert_trend(window), AlertTrend::Increasing);
    }

    #[test]
    fn balanced_halves_are_stable() {
        let manager = AlertManager::default();
        let window = ChronoDuration::minutes(10);
        let mut early = alert_for("a", "early");
        early.timestamp = Utc::now() - ChronoDuration::minutes(8);
        manager.add_alert(early);
        let mut late = alert_for("a", "late");
        late.timestamp = Utc::now() - ChronoDuration::minutes(1);
        manager.add_alert(late);
        assert_eq!(manager.alert_trend(window), AlertTrend::Stable);
    }

    #[test]
    fn delete_removes_by_id() {
        let manager = AlertManager::default();
        let alert = alert_for("a", "one");
        let id = alert.id;
        manager.add_alert(alert);
        assert!(manager.delete(&id));
        assert!(!manager.delete(&id));
        assert!(manager.alerts(&AlertFilter::default()).is_empty());
    }
}
