//! Core domain types, errors, and the event bus for the vigil subsystem.
//!
//! This crate establishes the foundational building blocks shared by every
//! other crate in the workspace:
//!
//! - **`errors`**: the primary `Error` enum and `Result` type alias,
//!   centralizing all failure modes for predictable error handling.
//! - **`events`**: a broadcast-channel event bus that lets subsystems
//!   publish lifecycle notifications without depending on their observers.
//! - **`types`**: shared domain enums such as `Metric`, `Severity`, and
//!   `TimeRange` used across the monitoring and warming pipelines.

pub mod errors;
pub mod events;
pub mod types;

pub use self::{
    errors::{Error, Result},
    events::{EventBus, SystemEvent},
    types::{Metric, Severity, TimeRange},
};
