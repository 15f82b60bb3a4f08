//! Shared domain types for the monitoring and warming pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metrics sampled from every registered cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HitRate,
    MissRate,
    Throughput,
    Latency,
    Size,
    MemoryUsage,
    EvictionRate,
    ErrorRate,
}

impl Metric {
    /// All metrics, in the order they are sampled
    pub const ALL: [Metric; 8] = [
        Metric::HitRate,
        Metric::MissRate,
        Metric::Throughput,
        Metric::Latency,
        Metric::Size,
        Metric::MemoryUsage,
        Metric::EvictionRate,
        Metric::ErrorRate,
    ];

    /// Stable identifier used in record ids and series keys
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HitRate => "hit_rate",
            Metric::MissRate => "miss_rate",
            Metric::Throughput => "throughput",
            Metric::Latency => "latency",
            Metric::Size => "size",
            Metric::MemoryUsage => "memory_usage",
            Metric::EvictionRate => "eviction_rate",
            Metric::ErrorRate => "error_rate",
        }
    }

    /// Whether larger values of this metric are better
    #[must_use]
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Metric::HitRate | Metric::Throughput)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to anomalies and alerts
///
/// Anomaly detection only produces `Low`..`High`; `Critical` is reserved for
/// alert-rule escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Query window for historical metric data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    LastHour,
    LastDay,
    LastWeek,
    LastMonth,
    /// Since epoch: no cutoff at all
    #[default]
    All,
}

impl TimeRange {
    /// Window length, `None` for [`TimeRange::All`]
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            TimeRange::LastHour => Some(chrono::Duration::hours(1)),
            TimeRange::LastDay => Some(chrono::Duration::days(1)),
            TimeRange::LastWeek => Some(chrono::Duration::weeks(1)),
            TimeRange::LastMonth => Some(chrono::Duration::days(30)),
            TimeRange::All => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn metric_identifiers_are_stable() {
        assert_eq!(Metric::HitRate.as_str(), "hit_rate");
        assert_eq!(Metric::ALL.len(), 8);
    }

    #[test]
    fn time_range_windows() {
        assert_eq!(
            TimeRange::LastHour.duration(),
            Some(chrono::Duration::hours(1))
        );
        assert_eq!(TimeRange::All.duration(), None);
    }
}
