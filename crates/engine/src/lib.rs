//! Composition point for the cache engine and its operational intelligence.
//!
//! Library crates in this workspace never hold global state; this crate
//! wires them together from one [`EngineConfig`] and owns the single
//! process-wide default instance behind [`default_engine`]. Applications
//! that want explicit lifetimes construct [`Engine`] directly and keep the
//! handle.

pub mod config;
pub mod engine;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{default_engine, Engine, InstanceSummary, StatisticsSummary};
