//! Event bus for inter-crate notifications.
//!
//! Subsystems publish lifecycle events without knowing who observes them.
//! The bus is a thin wrapper over a broadcast channel: emission never blocks
//! and never fails, so a slow, lagging, or dropped observer cannot abort the
//! operation that produced the event.

use crate::types::{Metric, Severity};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the broadcast channel backing an [`EventBus`]
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    /// A cache instance was added to the registry
    InstanceRegistered { instance: String },
    /// A cache instance was removed from the registry
    InstanceUnregistered { instance: String },
    /// The metrics collector started its sampling loop
    CollectionStarted { interval_ms: u64 },
    /// The metrics collector stopped
    CollectionStopped,
    /// An anomaly threshold was changed at runtime
    ThresholdUpdated {
        metric: Metric,
        instance: Option<String>,
    },
    /// The anomaly detector flagged a sampled value
    AnomalyDetected {
        id: String,
        instance: String,
        metric: Metric,
        severity: Severity,
        value: f64,
    },
    /// The alert manager stored a new alert
    AlertRaised {
        id: String,
        instance: String,
        title: String,
        severity: Severity,
    },
    /// A prewarm task entered the queue
    TaskQueued {
        task_id: String,
        instance: String,
        items: usize,
    },
    /// A prewarm task left the queue and began running
    TaskStarted { task_id: String },
    /// A prewarm task reached a successful terminal state
    TaskCompleted {
        task_id: String,
        duration_ms: u64,
        failed_items: u64,
    },
    /// A prewarm task failed or timed out
    TaskFailed { task_id: String, error: String },
    /// A prewarm task was cancelled
    TaskCancelled { task_id: String },
}

/// Broadcast-based event bus
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    ///
    /// A bus with no subscribers silently drops the event.
    pub fn emit(&self, event: SystemEvent) {
        trace!(?event, "emitting event");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
