//! In-process key/value cache with hybrid TTL + LRU eviction.
//!
//! The store keeps every entry under a time-to-live and a capacity bound:
//! expired entries are treated as absent the moment their TTL elapses
//! (removed lazily on access and proactively by a background sweep), and
//! writes that push the store over capacity evict the least-recently-used
//! entries. A narrow [`CacheInstance`] trait captures the capability set the
//! rest of the subsystem relies on, and [`CacheRegistry`] tracks named
//! instances for the monitoring and warming pipelines.

pub mod config;
pub mod entry;
pub mod registry;
pub mod stats;
pub mod store;
pub mod traits;

pub use config::CacheStoreConfig;
pub use entry::CacheEntry;
pub use registry::CacheRegistry;
pub use stats::CacheStats;
pub use store::CacheStore;
pub use traits::CacheInstance;
