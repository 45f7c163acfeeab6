//! Registry of named data sources.
//!
//! The registry is the single owner of the name → pool mapping. Pools are
//! created lazily on first use and at most once per name: callers asking for
//! the same name while it is being built wait for that build and receive the
//! same [`ConnectionPool`]. Serialization is per name, so unrelated data
//! sources never block each other.
//!
//! ## Lifecycle
//!
//! ```text
//! get_or_create: ConnectStart → driver lookup → pool → minIdle fill
//!                → schema → evictor → monitor → ConnectEnd
//! destroy:       DisconnectStart → monitor detach → pool close → DisconnectEnd
//! ```
//!
//! A failure after `ConnectStart`, or dropping the `get_or_create` future
//! mid-build, closes the half-built pool and leaves the name uncreated; the
//! next `get_or_create` starts over.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::{ConfigResolver, DataSourceConfig, resolve_name};
use crate::driver::DriverRegistry;
use crate::error::Result;
use crate::events::{DataSourceEvent, EventSink};
use crate::monitor::{MonitorRegistry, PoolMonitor};
use crate::pool::ConnectionPool;
use crate::schema::SchemaInitializer;

/// A live data source.
struct Slot {
    config: Arc<DataSourceConfig>,
    pool: ConnectionPool,
    monitor: Option<Arc<PoolMonitor>>,
}

/// Owns every named pool.
pub struct DataSourceRegistry {
    resolver: ConfigResolver,
    drivers: Arc<DriverRegistry>,
    monitors: Arc<MonitorRegistry>,
    schema: SchemaInitializer,
    events: Arc<dyn EventSink>,
    /// Per-name creation/destruction locks. Entries are never removed.
    locks: DashMap<String, Arc<Mutex<()>>>,
    active: DashMap<String, Slot>,
}

impl DataSourceRegistry {
    /// Create a registry. Nothing is connected until [`get_or_create`](Self::get_or_create).
    pub fn new(
        resolver: ConfigResolver,
        drivers: Arc<DriverRegistry>,
        monitors: Arc<MonitorRegistry>,
        schema: SchemaInitializer,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resolver,
            drivers,
            monitors,
            schema,
            events,
            locks: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Configured names: the default name first, then configuration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.resolver.names()
    }

    /// Names with a live pool, sorted.
    #[must_use]
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// The live pool for `name` (default when `None`), without creating it.
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<ConnectionPool> {
        let name = resolve_name(name).ok()?;
        self.active.get(name).map(|slot| slot.pool.clone())
    }

    /// Effective configuration for `name`: the one the live pool was built
    /// from, or a freshly resolved one.
    pub fn config_for(&self, name: Option<&str>) -> Result<Arc<DataSourceConfig>> {
        let name = resolve_name(name)?;
        if let Some(slot) = self.active.get(name) {
            return Ok(Arc::clone(&slot.config));
        }
        self.resolver.resolve(name).map(Arc::new)
    }

    /// Monitor registry pools are attached to.
    #[must_use]
    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    /// Driver lookup table.
    #[must_use]
    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// Configuration resolver.
    #[must_use]
    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(name.to_string()).or_default().value())
    }

    /// Return the pool for `name` (default when `None`), creating it if needed.
    ///
    /// # Errors
    /// - `Configuration` for a blank name or invalid settings; no event is published
    /// - `DriverLoad` when the configured driver is not registered
    /// - `Connection` when pre-filling `minIdle` fails
    /// - `Monitor` when a monitor is already registered under the name
    pub async fn get_or_create(&self, name: Option<&str>) -> Result<ConnectionPool> {
        let name = resolve_name(name)?;
        if let Some(pool) = self.get(Some(name)) {
            return Ok(pool);
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // Someone else may have finished while we waited.
        if let Some(pool) = self.get(Some(name)) {
            return Ok(pool);
        }

        let config = Arc::new(self.resolver.resolve(name)?);

        self.events.publish(DataSourceEvent::ConnectStart {
            name: name.to_string(),
            config: Arc::clone(&config),
        });

        let slot = match self.create(&config).await {
            Ok(slot) => slot,
            Err(err) => {
                tracing::error!(datasource = %name, error = %err, "Failed to create data source");
                return Err(err);
            }
        };
        let pool = slot.pool.clone();
        self.active.insert(name.to_string(), slot);

        tracing::info!(
            datasource = %name,
            driver = %config.driver_class_name,
            max_active = config.pool.max_active,
            "Data source created"
        );
        self.events.publish(DataSourceEvent::ConnectEnd {
            name: name.to_string(),
            config,
            pool: pool.clone(),
        });
        Ok(pool)
    }

    async fn create(&self, config: &Arc<DataSourceConfig>) -> Result<Slot> {
        let name = config.name.as_str();
        let driver = self.drivers.resolve(name, &config.driver_class_name)?;
        let pending =
            PendingPool::new(ConnectionPool::new(name, driver, config.connect_options(), config.pool)?);

        pending.pool.fill_min_idle().await?;
        self.schema.initialize(config, &pending.pool).await;
        pending.pool.start_evictor();

        let monitor = if config.jmx {
            Some(self.monitors.register(&pending.pool)?)
        } else {
            None
        };

        Ok(Slot {
            config: Arc::clone(config),
            pool: pending.commit(),
            monitor,
        })
    }

    /// Close and forget the pool for `name` (default when `None`).
    ///
    /// Returns `false` when nothing was active under that name. Connections
    /// still checked out are discarded when their guards drop.
    ///
    /// # Errors
    /// `Configuration` for a blank name.
    pub async fn destroy(&self, name: Option<&str>) -> Result<bool> {
        let name = resolve_name(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let Some((_, slot)) = self.active.remove(name) else {
            return Ok(false);
        };

        self.events.publish(DataSourceEvent::DisconnectStart {
            name: name.to_string(),
            config: Arc::clone(&slot.config),
            pool: slot.pool.clone(),
        });

        if slot.monitor.is_some() {
            self.monitors.unregister(name);
        }
        slot.pool.close();

        tracing::info!(datasource = %name, "Data source destroyed");
        self.events.publish(DataSourceEvent::DisconnectEnd {
            name: name.to_string(),
            config: slot.config,
        });
        Ok(true)
    }

    /// Destroy every live pool, logging and skipping over failures.
    ///
    /// Returns how many pools were destroyed.
    pub async fn destroy_all(&self) -> usize {
        let mut destroyed = 0;
        for name in self.active_names() {
            match self.destroy(Some(&name)).await {
                Ok(true) => destroyed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(datasource = %name, error = %err, "Failed to destroy data source");
                }
            }
        }
        destroyed
    }
}

/// A pool under construction. Closed on drop unless committed, so a failed
/// or cancelled `get_or_create` never leaves connections or an evictor behind.
struct PendingPool {
    pool: ConnectionPool,
    committed: bool,
}

impl PendingPool {
    fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            committed: false,
        }
    }

    fn commit(mut self) -> ConnectionPool {
        self.committed = true;
        self.pool.clone()
    }
}

impl Drop for PendingPool {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!(
                datasource = %self.pool.name(),
                "Closing data source whose creation did not complete"
            );
            self.pool.close();
        }
    }
}

impl fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("configured", &self.names())
            .field("active", &self.active_names())
            .finish_non_exhaustive()
    }
}
