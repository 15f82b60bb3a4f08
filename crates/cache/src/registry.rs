//! Named registry of cache instances.

use crate::traits::CacheInstance;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use vigil_core::{Error, EventBus, Result, SystemEvent};

/// Registry of named cache instances
///
/// The monitoring pipeline samples every registered instance; the warming
/// pipeline writes into them by name. Registration is the validation
/// boundary: anything stored here satisfies [`CacheInstance`].
pub struct CacheRegistry {
    instances: DashMap<String, Arc<dyn CacheInstance>>,
    events: EventBus,
}

impl CacheRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            instances: DashMap::new(),
            events,
        }
    }

    /// Register an instance under a unique name
    pub fn register(&self, name: impl Into<String>, instance: Arc<dyn CacheInstance>) -> Result<()> {
        let name = name.into();
        if self.instances.contains_key(&name) {
            return Err(Error::configuration(format!(
                "cache instance '{name}' is already registered"
            )));
        }
        self.instances.insert(name.clone(), instance);
        info!(instance = %name, "cache instance registered");
        self.events
            .emit(SystemEvent::InstanceRegistered { instance: name });
        Ok(())
    }

    /// Remove an instance, reporting whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.instances.remove(name).is_some();
        if removed {
            info!(instance = %name, "cache instance unregistered");
            self.events.emit(SystemEvent::InstanceUnregistered {
                instance: name.to_string(),
            });
        }
        removed
    }

    /// Look up an instance, failing fast on unknown names
    pub fn get(&self, name: &str) -> Result<Arc<dyn CacheInstance>> {
        self.instances
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::unknown_instance(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Names of all registered instances
    pub fn names(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("instances", &self.names())
            .finish()
    }
}
