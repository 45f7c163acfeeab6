//! Management surface for live pools.
//!
//! A [`PoolMonitor`] is attached to a pool right after it becomes active and
//! detached right before it closes. While attached it exposes read accessors,
//! live tuning and maintenance operations; once detached every call fails
//! with [`DataSourceError::Monitor`].
//!
//! [`MonitorRegistry`] is the in-process management server: monitors are
//! registered under an [`ObjectName`] and can be enumerated or snapshotted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{DataSourceError, Result};
use crate::pool::{ConnectionPool, PoolStats};

/// Domain under which every pool monitor is registered.
pub const NAMESPACE: &str = "nebula.datasource";

// ---------------------------------------------------------------------------
// ObjectName
// ---------------------------------------------------------------------------

/// Management name of one pool monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    /// Application the pool belongs to.
    pub application: String,
    /// Data source name.
    pub name: String,
}

impl ObjectName {
    /// Build the object name for `name` within `application`.
    pub fn new(application: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{NAMESPACE}:type=ConnectionPool,application={},name={}",
            self.application, self.name
        )
    }
}

// ---------------------------------------------------------------------------
// PoolMonitor
// ---------------------------------------------------------------------------

/// Read/write management view of one pool.
pub struct PoolMonitor {
    object_name: ObjectName,
    pool: RwLock<Option<ConnectionPool>>,
}

impl PoolMonitor {
    /// Attach a monitor to `pool`.
    pub fn new(application: impl Into<String>, pool: ConnectionPool) -> Self {
        Self {
            object_name: ObjectName::new(application, pool.name()),
            pool: RwLock::new(Some(pool)),
        }
    }

    /// Registered name.
    #[must_use]
    pub fn object_name(&self) -> &ObjectName {
        &self.object_name
    }

    /// Data source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.object_name.name
    }

    /// Drop the pool reference. Later calls fail.
    pub fn detach(&self) {
        self.pool.write().take();
    }

    /// Whether the monitor still refers to a pool.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.pool.read().is_some()
    }

    fn pool(&self, operation: &str) -> Result<ConnectionPool> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| DataSourceError::monitor(self.name(), operation, None))
    }

    fn wrap(&self, operation: &str, err: DataSourceError) -> DataSourceError {
        DataSourceError::monitor(self.name(), operation, Some(err))
    }

    // -- read accessors -----------------------------------------------------

    /// Full statistics snapshot.
    pub fn stats(&self) -> Result<PoolStats> {
        Ok(self.pool("stats")?.stats())
    }

    /// Connections checked out.
    pub fn num_active(&self) -> Result<usize> {
        Ok(self.pool("numActive")?.stats().active)
    }

    /// Connections idle in the pool.
    pub fn num_idle(&self) -> Result<usize> {
        Ok(self.pool("numIdle")?.stats().idle)
    }

    /// Same as [`num_active`](Self::num_active).
    pub fn active_connections(&self) -> Result<usize> {
        Ok(self.pool("activeConnections")?.stats().active)
    }

    /// Same as [`num_idle`](Self::num_idle).
    pub fn idle_connections(&self) -> Result<usize> {
        Ok(self.pool("idleConnections")?.stats().idle)
    }

    /// Active plus idle plus being opened.
    pub fn total_connections(&self) -> Result<usize> {
        Ok(self.pool("totalConnections")?.stats().total)
    }

    /// Tasks waiting for a connection.
    pub fn threads_awaiting_connection(&self) -> Result<usize> {
        Ok(self.pool("threadsAwaitingConnection")?.stats().waiting)
    }

    /// Current pool size limit.
    pub fn max_active(&self) -> Result<usize> {
        Ok(self.pool("maxActive")?.settings().max_active)
    }

    /// Current `maxWait`.
    pub fn max_wait(&self) -> Result<Duration> {
        Ok(self.pool("maxWait")?.settings().max_wait)
    }

    /// Idle connections kept on return.
    pub fn max_idle(&self) -> Result<usize> {
        Ok(self.pool("maxIdle")?.settings().max_idle)
    }

    /// Idle connections the evictor keeps warm.
    pub fn min_idle(&self) -> Result<usize> {
        Ok(self.pool("minIdle")?.settings().min_idle)
    }

    // -- mutators -----------------------------------------------------------

    /// Change the pool size limit.
    pub fn set_max_active(&self, to: usize) -> Result<()> {
        let from = self
            .pool("setMaxActive")?
            .set_max_active(to)
            .map_err(|e| self.wrap("setMaxActive", e))?;
        tracing::trace!(datasource = %self.name(), from, to, "Changing maxActive");
        Ok(())
    }

    /// Change how long `acquire` may wait.
    pub fn set_max_wait(&self, to: Duration) -> Result<()> {
        let from = self
            .pool("setMaxWait")?
            .set_max_wait(to)
            .map_err(|e| self.wrap("setMaxWait", e))?;
        tracing::trace!(
            datasource = %self.name(),
            from = from.as_millis() as u64,
            to = to.as_millis() as u64,
            "Changing maxWait"
        );
        Ok(())
    }

    /// Change how many idle connections are kept on return.
    pub fn set_max_idle(&self, to: usize) -> Result<()> {
        let from = self
            .pool("setMaxIdle")?
            .set_max_idle(to)
            .map_err(|e| self.wrap("setMaxIdle", e))?;
        tracing::trace!(datasource = %self.name(), from, to, "Changing maxIdle");
        Ok(())
    }

    /// Change how many idle connections the evictor keeps warm.
    pub fn set_min_idle(&self, to: usize) -> Result<()> {
        let from = self
            .pool("setMinIdle")?
            .set_min_idle(to)
            .map_err(|e| self.wrap("setMinIdle", e))?;
        tracing::trace!(datasource = %self.name(), from, to, "Changing minIdle");
        Ok(())
    }

    // -- operations ---------------------------------------------------------

    /// Close every idle connection.
    pub fn clear(&self) -> Result<usize> {
        let pool = self.pool("clear")?;
        tracing::trace!(datasource = %self.name(), "Clearing the connection pool");
        Ok(pool.clear())
    }

    /// Alias of [`clear`](Self::clear) under its management name.
    pub fn soft_evict_connections(&self) -> Result<usize> {
        let pool = self.pool("softEvictConnections")?;
        tracing::trace!(datasource = %self.name(), "Soft evicting connections");
        Ok(pool.clear())
    }

    /// Evict stale idle connections; any failure comes back as a monitor error.
    pub async fn evict(&self) -> Result<usize> {
        let pool = self.pool("evict")?;
        tracing::trace!(datasource = %self.name(), "Evicting from the connection pool");
        pool.evict().await.map_err(|e| self.wrap("evict", e))
    }

    /// Stop handing out connections until [`resume_pool`](Self::resume_pool).
    pub fn suspend_pool(&self) -> Result<()> {
        let pool = self.pool("suspendPool")?;
        tracing::trace!(datasource = %self.name(), "Suspending the connection pool");
        pool.suspend();
        Ok(())
    }

    /// Hand out connections again and wake every waiter.
    pub fn resume_pool(&self) -> Result<()> {
        let pool = self.pool("resumePool")?;
        tracing::trace!(datasource = %self.name(), "Resuming the connection pool");
        pool.resume();
        Ok(())
    }
}

impl fmt::Debug for PoolMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMonitor")
            .field("object_name", &self.object_name.to_string())
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MonitorRegistry
// ---------------------------------------------------------------------------

/// In-process registry of pool monitors, keyed by data source name.
pub struct MonitorRegistry {
    application: String,
    monitors: DashMap<String, Arc<PoolMonitor>>,
}

impl MonitorRegistry {
    /// Create an empty registry for `application`.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            monitors: DashMap::new(),
        }
    }

    /// Application name used in object names.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Attach and register a monitor for `pool`.
    ///
    /// Fails if a monitor is already registered under the pool's name.
    pub fn register(&self, pool: &ConnectionPool) -> Result<Arc<PoolMonitor>> {
        use dashmap::mapref::entry::Entry;

        match self.monitors.entry(pool.name().to_string()) {
            Entry::Occupied(_) => Err(DataSourceError::Monitor {
                name: pool.name().to_string(),
                operation: "register".into(),
                message: "a monitor is already registered under this name".into(),
                source: None,
            }),
            Entry::Vacant(slot) => {
                let monitor = Arc::new(PoolMonitor::new(&self.application, pool.clone()));
                tracing::debug!(
                    datasource = %pool.name(),
                    object_name = %monitor.object_name(),
                    "Registered pool monitor"
                );
                slot.insert(Arc::clone(&monitor));
                Ok(monitor)
            }
        }
    }

    /// Detach and remove the monitor for `name`. Returns `false` if none was registered.
    pub fn unregister(&self, name: &str) -> bool {
        match self.monitors.remove(name) {
            Some((_, monitor)) => {
                monitor.detach();
                tracing::debug!(datasource = %name, "Unregistered pool monitor");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PoolMonitor>> {
        self.monitors.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.monitors.contains_key(name)
    }

    /// Registered data source names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.monitors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Statistics of every registered monitor.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, PoolStats> {
        self.monitors
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .stats()
                    .ok()
                    .map(|stats| (entry.key().clone(), stats))
            })
            .collect()
    }
}

impl fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("application", &self.application)
            .field("monitors", &self.names())
            .finish()
    }
}
