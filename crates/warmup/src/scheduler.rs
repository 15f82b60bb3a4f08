//! Bounded-concurrency prewarm task scheduling.
//!
//! The scheduler owns lifecycle only: it decides when a task may start,
//! enforces the per-task timeout, and records terminal transitions. Actual
//! item application is delegated to a warmup strategy by whoever consumes
//! the started-task channel.

use crate::types::{PrewarmItem, PrewarmTask, TaskProgress, TaskStatus};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{Error, EventBus, Result, SystemEvent};

/// Configuration for the prewarm scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks in the running state
    pub max_concurrent: usize,
    /// Running tasks older than this are force-failed
    pub task_timeout: Duration,
    /// How often the timeout sweep runs
    pub sweep_interval: Duration,
    /// Terminal tasks older than this are removed by cleanup
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            task_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
            retention: Duration::from_secs(3600),
        }
    }
}

/// Counters across all known tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub completed_with_errors: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// FIFO task queue with a bounded running set
///
/// Lock order is queue, then running set, then task entry; every path
/// acquires in that order.
pub struct PrewarmScheduler {
    config: RwLock<SchedulerConfig>,
    tasks: DashMap<String, PrewarmTask>,
    queue: Mutex<VecDeque<String>>,
    running: Mutex<HashSet<String>>,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    events: EventBus,
    shutdown: AtomicBool,
}

impl PrewarmScheduler {
    pub fn new(config: SchedulerConfig, events: EventBus) -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            config: RwLock::new(config),
            tasks: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            running: Mutex::new(HashSet::new()),
            started_tx,
            started_rx: Mutex::new(Some(started_rx)),
            events,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Queue a prewarm task, starting it immediately if a slot is free.
    /// Returns the task id.
    pub fn submit(&self, instance: impl Into<String>, items: Vec<PrewarmItem>) -> String {
        let instance = instance.into();
        let id = Uuid::new_v4().to_string();
        let task = PrewarmTask {
            id: id.clone(),
            instance: instance.clone(),
            progress: TaskProgress {
                total: items.len(),
                ..Default::default()
            },
            items,
            status: TaskStatus::Pending,
            error: None,
            queued_at: Utc::now(),
            start_time: None,
            end_time: None,
            started_instant: None,
        };
        let item_count = task.progress.total;
        self.tasks.insert(id.clone(), task);
        self.queue.lock().push_back(id.clone());
        info!(task_id = %id, instance = %instance, items = item_count, "prewarm task queued");
        self.events.emit(SystemEvent::TaskQueued {
            task_id: id.clone(),
            instance,
            items: item_count,
        });
        self.pump();
        id
    }

    /// Channel of task ids as they enter the running state; can be taken
    /// exactly once by the executing worker.
    pub fn take_started_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.started_rx.lock().take()
    }

    /// Record item progress on a running task
    pub fn update_progress(&self, id: &str, completed: usize, failed: usize) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::task(id, "unknown task"))?;
        task.progress.completed = completed;
        task.progress.failed = failed;
        Ok(())
    }

    /// Transition a running task to its terminal state and free its slot
    ///
    /// Completing an already-terminal task (e.g. one cancelled mid-flight)
    /// is a no-op.
    pub fn complete_task(&self, id: &str, success: bool, error: Option<String>) -> Result<()> {
        {
            let mut running = self.running.lock();
            let mut task = self
                .tasks
                .get_mut(id)
                .ok_or_else(|| Error::task(id, "unknown task"))?;
            if task.status.is_terminal() {
                return Ok(());
            }
            if task.status != TaskStatus::Running {
                return Err(Error::task(id, "task is not running"));
            }

            task.status = if !success {
                TaskStatus::Failed
            } else if task.progress.failed > 0 {
                TaskStatus::CompletedWithErrors
            } else {
                TaskStatus::Completed
            };
            task.error = error.clone();
            task.end_time = Some(Utc::now());
            running.remove(id);

            let duration_ms = task
                .started_instant
                .map_or(0, |started| started.elapsed().as_millis() as u64);
            match task.status {
                TaskStatus::Failed => {
                    self.events.emit(SystemEvent::TaskFailed {
                        task_id: id.to_string(),
                        error: error.unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                _ => {
                    self.events.emit(SystemEvent::TaskCompleted {
                        task_id: id.to_string(),
                        duration_ms,
                        failed_items: task.progress.failed as u64,
                    });
                }
            }
        }
        self.pump();
        Ok(())
    }

    /// Cancel a task; pending tasks leave the queue, running tasks free
    /// their slot and any in-flight work is abandoned, not awaited.
    /// Returns false for tasks already in a terminal state.
    pub fn cancel_task(&self, id: &str) -> Result<bool> {
        let cancelled = {
            let mut queue = self.queue.lock();
            let mut running = self.running.lock();
            let mut task = self
                .tasks
                .get_mut(id)
                .ok_or_else(|| Error::task(id, "unknown task"))?;

            match task.status {
                TaskStatus::Pending => {
                    queue.retain(|queued| queued != id);
                    task.status = TaskStatus::Cancelled;
                    task.end_time = Some(Utc::now());
                    true
                }
                TaskStatus::Running => {
                    running.remove(id);
                    task.status = TaskStatus::Cancelled;
                    task.end_time = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            info!(task_id = %id, "prewarm task cancelled");
            self.events.emit(SystemEvent::TaskCancelled {
                task_id: id.to_string(),
            });
            self.pump();
        }
        Ok(cancelled)
    }

    /// Force-fail running tasks that exceeded the timeout, freeing their
    /// slots. Returns how many were failed.
    pub fn expire_timed_out(&self) -> usize {
        let timeout = self.config.read().task_timeout;
        let expired: Vec<String> = {
            let running = self.running.lock();
            running
                .iter()
                .filter(|id| {
                    self.tasks.get(id.as_str()).is_some_and(|task| {
                        task.started_instant
                            .is_some_and(|started| started.elapsed() > timeout)
                    })
                })
                .cloned()
                .collect()
        };

        let mut failed = 0usize;
        for id in expired {
            let mut running = self.running.lock();
            if let Some(mut task) = self.tasks.get_mut(&id) {
                if task.status != TaskStatus::Running {
                    continue;
                }
                warn!(task_id = %id, ?timeout, "prewarm task timed out");
                task.status = TaskStatus::Failed;
                task.error = Some(format!("timed out after {timeout:?}"));
                task.end_time = Some(Utc::now());
                running.remove(&id);
                failed += 1;
                self.events.emit(SystemEvent::TaskFailed {
                    task_id: id.clone(),
                    error: "task timeout exceeded".to_string(),
                });
            }
        }
        if failed > 0 {
            self.pump();
        }
        failed
    }

    /// Remove terminal tasks whose end time is older than the retention
    /// window. Returns how many were removed.
    pub fn cleanup_finished(&self) -> usize {
        let retention = self.config.read().retention;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        let stale: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry.end_time.is_some_and(|ended| ended < cutoff)
            })
            .map(|entry| entry.id.clone())
            .collect();

        let removed = stale.len();
        for id in stale {
            self.tasks.remove(&id);
        }
        if removed > 0 {
            debug!(removed, "cleaned up finished prewarm tasks");
        }
        removed
    }

    /// Timeout/cleanup sweep loop; runs until [`PrewarmScheduler::shutdown`]
    pub async fn run_sweeper(self: Arc<Self>) {
        loop {
            let sweep_interval = self.config.read().sweep_interval;
            tokio::time::sleep(sweep_interval).await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.expire_timed_out();
            self.cleanup_finished();
        }
    }

    /// Stop the sweep loop at its next wakeup
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Snapshot of one task
    pub fn task(&self, id: &str) -> Option<PrewarmTask> {
        self.tasks.get(id).map(|task| task.clone())
    }

    /// Snapshot of all known tasks
    pub fn tasks_snapshot(&self) -> Vec<PrewarmTask> {
        self.tasks.iter().map(|task| task.clone()).collect()
    }

    /// Lifecycle counters across all known tasks
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        for task in self.tasks.iter() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::CompletedWithErrors => stats.completed_with_errors += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Start queued tasks while slots are free
    fn pump(&self) {
        let max_concurrent = self.config.read().max_concurrent;
        let mut queue = self.queue.lock();
        let mut running = self.running.lock();

        while running.len() < max_concurrent {
            let Some(id) = queue.pop_front() else {
                break;
            };
            let Some(mut task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            task.status = TaskStatus::Running;
            task.start_time = Some(Utc::now());
            task.started_instant = Some(Instant::now());
            running.insert(id.clone());
            debug!(task_id = %id, "prewarm task started");
            self.events.emit(SystemEvent::TaskStarted {
                task_id: id.clone(),
            });
            let _ = self.started_tx.send(id);
        }
    }
}

impl std::fmt::Debug for PrewarmScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrewarmScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}
