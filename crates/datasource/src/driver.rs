//! Pluggable drivers.
//!
//! Drivers are registered by name when the runtime is assembled; a data
//! source's `driverClassName` is looked up in the [`DriverRegistry`] at pool
//! creation time and a missing entry fails with
//! [`DataSourceError::DriverLoad`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ConnectOptions;
use crate::error::{DataSourceError, DriverError, Result};

/// One physical database connection.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute a single statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> std::result::Result<u64, DriverError>;

    /// Cheap liveness probe used before an idle connection is handed out.
    async fn is_valid(&mut self) -> bool {
        true
    }
}

/// Opens physical connections for one kind of database.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> std::result::Result<Box<dyn Connection>, DriverError>;
}

/// Name → driver lookup table.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the drivers compiled into this crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register(crate::sqlite::DRIVER_NAME, crate::sqlite::SqliteDriver);
        registry
    }

    /// Register `driver` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, driver: impl Driver) {
        self.register_arc(name, Arc::new(driver));
    }

    /// Register an already shared driver.
    pub fn register_arc(&self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        let name = name.into();
        tracing::debug!(driver = %name, "Registered driver");
        self.drivers.insert(name, driver);
    }

    /// Look up the driver for a data source.
    pub fn resolve(&self, data_source: &str, driver: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(driver)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DataSourceError::DriverLoad {
                name: data_source.to_string(),
                driver: driver.to_string(),
            })
    }

    /// Whether a driver is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered driver names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
