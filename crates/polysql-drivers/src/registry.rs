//! Driver registry for looking up drivers by type

use std::collections::HashMap;
use std::sync::Arc;

use polysql_core::{Driver, DriverConfig, DriverMetadata, DriverType, PolysqlError, Result};

/// Registry of available database drivers
pub struct DriverRegistry {
    drivers: HashMap<DriverType, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        Self::with_config(DriverConfig::default())
    }

    /// Create a registry with all built-in drivers sharing `config`
    #[allow(unused_variables, unused_mut)]
    pub fn with_config(config: DriverConfig) -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::with_config(
            config.clone(),
        )));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::with_config(
            config,
        )));

        registry
    }

    /// Register a driver, replacing any driver of the same type
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let driver_type = driver.driver_type();
        tracing::info!(driver = %driver_type, "registering database driver");
        self.drivers.insert(driver_type, driver);
    }

    /// Get a driver by type
    pub fn get(&self, driver_type: &DriverType) -> Option<Arc<dyn Driver>> {
        let driver = self.drivers.get(driver_type).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %driver_type, "driver not found in registry");
        }
        driver
    }

    /// Get a driver by type, failing for unknown types
    pub fn driver_for(&self, driver_type: &DriverType) -> Result<Arc<dyn Driver>> {
        self.get(driver_type).ok_or_else(|| {
            PolysqlError::Config(format!("no driver registered for type {}", driver_type))
        })
    }

    /// List all registered driver types, sorted
    pub fn list(&self) -> Vec<&DriverType> {
        let mut types: Vec<&DriverType> = self.drivers.keys().collect();
        types.sort();
        types
    }

    /// Metadata of every registered driver, sorted by type
    pub fn metadata(&self) -> Vec<DriverMetadata> {
        self.list()
            .into_iter()
            .filter_map(|t| self.drivers.get(t))
            .map(|driver| driver.metadata())
            .collect()
    }

    /// Check if a driver is registered
    pub fn has(&self, driver_type: &DriverType) -> bool {
        self.drivers.contains_key(driver_type)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_driver_is_config_error() {
        let registry = DriverRegistry::new();
        let err = registry
            .driver_for(&DriverType::new("oracle"))
            .err()
            .expect("lookup should fail");
        assert!(matches!(err, PolysqlError::Config(_)));
        assert!(registry.list().is_empty());
    }

    #[cfg(all(feature = "sqlite", feature = "postgres"))]
    #[test]
    fn test_defaults_register_bundled_drivers() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(
            registry.list(),
            vec![&DriverType::POSTGRES, &DriverType::SQLITE]
        );
        assert!(registry.has(&DriverType::SQLITE));

        let sqlite = registry.driver_for(&DriverType::SQLITE).unwrap();
        assert_eq!(sqlite.driver_type(), DriverType::SQLITE);
        assert!(registry.metadata().iter().all(|m| m.is_sql));
    }
}
