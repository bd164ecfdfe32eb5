// ABOUTME: Registry pattern for runtime store backend selection.
// ABOUTME: Backends register factories, redibot creates one by name from config.

use crate::{Connector, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory function that creates a Connector from backend-specific config
pub type ConnectorFactory =
    Box<dyn Fn(&Value) -> Result<Arc<dyn Connector>, StoreError> + Send + Sync>;

/// Registry for runtime backend selection
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Connector>, StoreError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a connector by backend name with the given config
    pub fn create(&self, name: &str, config: &Value) -> Result<Arc<dyn Connector>, StoreError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StoreError::Unsupported(format!("store backend '{}'", name)))?;
        factory(config)
    }

    /// List available backend names, sorted
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        use crate::backends::memory::MemoryStore;

        let registry = Self::new().register("memory", MemoryStore::factory());

        #[cfg(feature = "redis")]
        let registry = {
            use crate::backends::redis::RedisConnector;
            registry.register("redis", RedisConnector::factory())
        };

        registry
    }
}
