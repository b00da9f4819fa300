//! Plugin-based component registry
//!
//! The registry lets probers and device stores be registered by name at
//! runtime, so the daemon builds them from configuration without hard-coded
//! if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use netdisc_core::registry::ComponentRegistry;
//!
//! let registry = ComponentRegistry::with_builtin_stores();
//!
//! // In netdisc-probe-net
//! netdisc_probe_net::register(&registry);
//!
//! let prober = registry.create_prober(&config)?;
//! let store = registry.create_store(&config.store).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{DiscoveryConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileDeviceStoreFactory, MemoryDeviceStoreFactory};
use crate::traits::{DeviceStore, DeviceStoreFactory, Prober, ProberFactory};

type Table<T> = RwLock<HashMap<String, Arc<T>>>;

/// Registry of prober and device store factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive registration.
#[derive(Default)]
pub struct ComponentRegistry {
    probers: Table<dyn ProberFactory>,
    stores: Table<dyn DeviceStoreFactory>,
}

fn read<T: ?Sized>(table: &Table<T>) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T: ?Sized>(table: &Table<T>) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `memory` and `file` stores already registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryDeviceStoreFactory));
        registry.register_store("file", Box::new(FileDeviceStoreFactory));
        registry
    }

    /// Register a prober factory under `name` (e.g. "net")
    pub fn register_prober(&self, name: impl Into<String>, factory: Box<dyn ProberFactory>) {
        write(&self.probers).insert(name.into(), Arc::from(factory));
    }

    /// Register a device store factory under `name` (e.g. "file", "memory")
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn DeviceStoreFactory>) {
        write(&self.stores).insert(name.into(), Arc::from(factory));
    }

    /// Create the prober selected by `config.prober`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn Prober>)`: Created prober instance
    /// - `Err(Error)`: If the prober type is not registered or creation fails
    pub fn create_prober(&self, config: &DiscoveryConfig) -> Result<Box<dyn Prober>> {
        let prober_type = config.prober.type_name();
        let factory = read(&self.probers)
            .get(prober_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown prober type: {}", prober_type)))?;

        factory.create(config)
    }

    /// Create a device store from configuration
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn DeviceStore>> {
        let store_type = config.type_name();

        // Clone out of the lock before the async create
        let factory = read(&self.stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(config).await
    }

    pub fn list_probers(&self) -> Vec<String> {
        let mut names: Vec<_> = read(&self.probers).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_stores(&self) -> Vec<String> {
        let mut names: Vec<_> = read(&self.stores).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_prober(&self, name: &str) -> bool {
        read(&self.probers).contains_key(name)
    }

    pub fn has_store(&self, name: &str) -> bool {
        read(&self.stores).contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProberFactory;

    impl ProberFactory for MockProberFactory {
        fn create(&self, _config: &DiscoveryConfig) -> Result<Box<dyn Prober>> {
            Err(Error::not_found("Mock prober not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();

        // Initially empty
        assert!(!registry.has_prober("mock"));

        // Register
        registry.register_prober("mock", Box::new(MockProberFactory));

        // Now present
        assert!(registry.has_prober("mock"));
        assert_eq!(registry.list_probers(), vec!["mock".to_string()]);
    }

    #[test]
    fn test_unknown_prober_is_config_error() {
        let registry = ComponentRegistry::new();
        let err = registry
            .create_prober(&DiscoveryConfig::default())
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_builtin_stores() {
        let registry = ComponentRegistry::with_builtin_stores();
        assert_eq!(registry.list_stores(), vec!["file", "memory"]);

        let store = registry.create_store(&StoreConfig::Memory).await.unwrap();
        assert!(store.list_devices().await.unwrap().is_empty());

        let custom = StoreConfig::Custom {
            factory: "postgres".into(),
            config: serde_json::Value::Null,
        };
        assert!(registry.create_store(&custom).await.is_err());
    }
}
