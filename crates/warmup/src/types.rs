//! Shared types for the warming pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// One key/value pair destined for a cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrewarmItem {
    pub key: String,
    pub value: Value,
    /// Per-item TTL; the target's default applies when unset
    #[serde(default)]
    pub ttl: Option<Duration>,
    /// Ranking used by the priority strategy; larger is more important
    #[serde(default)]
    pub priority: i64,
}

impl PrewarmItem {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A failure applying one item; never aborts the batch it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub key: String,
    pub message: String,
}

/// Per-item latency statistics for one strategy run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmupStatistics {
    pub avg_item_ms: f64,
    pub min_item_ms: f64,
    pub max_item_ms: f64,
    pub throughput_per_sec: f64,
}

/// Outcome of applying a batch of items to a cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration: Duration,
    pub errors: Vec<ItemError>,
    pub statistics: WarmupStatistics,
}

impl WarmupOutcome {
    /// Assemble an outcome from per-item timings and errors
    pub fn from_run(
        total: usize,
        item_durations_ms: &[f64],
        errors: Vec<ItemError>,
        duration: Duration,
    ) -> Self {
        let successful = total - errors.len();
        let statistics = if item_durations_ms.is_empty() {
            WarmupStatistics::default()
        } else {
            let sum: f64 = item_durations_ms.iter().sum();
            let min = item_durations_ms.iter().copied().fold(f64::MAX, f64::min);
            let max = item_durations_ms.iter().copied().fold(0.0, f64::max);
            let elapsed = duration.as_secs_f64();
            WarmupStatistics {
                avg_item_ms: sum / item_durations_ms.len() as f64,
                min_item_ms: min,
                max_item_ms: max,
                throughput_per_sec: if elapsed <= f64::EPSILON {
                    0.0
                } else {
                    total as f64 / elapsed
                },
            }
        };
        Self {
            total,
            successful,
            failed: errors.len(),
            duration,
            errors,
            statistics,
        }
    }
}

/// Prewarm task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::CompletedWithErrors
                | TaskStatus::Failed
                | TaskStatus::Cancelled
        )
    }
}

/// Item counters for a prewarm task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A scheduled prewarm unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrewarmTask {
    pub id: String,
    pub instance: String,
    pub items: Vec<PrewarmItem>,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    /// Failure message for failed or timed-out tasks
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Monotonic start marker used for timeout detection
    #[serde(skip)]
    pub started_instant: Option<Instant>,
}
