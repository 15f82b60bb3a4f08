//! Cache prewarming: bounded-concurrency scheduling, pluggable execution
//! strategies, and retry-capable data loading.
//!
//! The flow runs one direction: a [`loader::DataLoaderManager`] fetches
//! key/value items from named external sources, a [`strategy::WarmupStrategy`]
//! applies them to a cache instance in batches, and the
//! [`scheduler::PrewarmScheduler`] bounds how many prewarm tasks run at once,
//! enforcing per-task timeouts and supporting cancellation.

pub mod loader;
pub mod scheduler;
pub mod strategy;
pub mod types;

pub use loader::{DataLoader, DataLoaderManager, LoaderConfig, LoaderStats};
pub use scheduler::{PrewarmScheduler, SchedulerConfig, SchedulerStats};
pub use strategy::{
    AdaptiveConfig, AdaptiveStrategy, ImmediateConfig, ImmediateStrategy, PriorityConfig,
    PriorityStrategy, ProgressCallback, WarmupStrategy,
};
pub use types::{
    ItemError, PrewarmItem, PrewarmTask, TaskProgress, TaskStatus, WarmupOutcome,
    WarmupStatistics,
};
