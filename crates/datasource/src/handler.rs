//! Scoped connection leases.
//!
//! [`DataSourceHandler`] borrows a connection from a named pool for the span
//! of one unit of work and always hands it back, whether the work returns
//! `Ok`, returns `Err` or panics.
//!
//! ```rust,ignore
//! let rows = handler
//!     .with_connection(Some("orders"), |_name, _pool, conn| {
//!         Box::pin(async move { conn.execute("delete from cart").await })
//!     })
//!     .await?;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::resolve_name;
use crate::error::Result;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::registry::DataSourceRegistry;

/// Runs units of work against named data sources, creating pools on demand.
#[derive(Debug, Clone)]
pub struct DataSourceHandler {
    registry: Arc<DataSourceRegistry>,
}

impl DataSourceHandler {
    /// Create a handler leasing from `registry`.
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this handler creates pools through.
    #[must_use]
    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    /// Lease one connection from `name` (default when `None`) for `work`.
    ///
    /// Waits up to the pool's `maxWait` for a connection. The connection goes
    /// back to the pool when `work` finishes; a statement error does not
    /// discard it unless `work` calls
    /// [`mark_broken`](PooledConnection::mark_broken).
    ///
    /// # Errors
    /// - creation errors from [`DataSourceRegistry::get_or_create`]
    /// - `PoolExhausted` / `PoolClosed` / `Connection` from acquisition
    /// - whatever `work` returns
    pub async fn with_connection<T, F>(&self, name: Option<&str>, work: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c str, &'c ConnectionPool, &'c mut PooledConnection) -> BoxFuture<'c, Result<T>>,
    {
        let name = resolve_name(name)?;
        let pool = self.registry.get_or_create(Some(name)).await?;
        let mut conn = pool.acquire().await?;
        let result = work(name, &pool, &mut conn).await;
        drop(conn);
        result
    }

    /// Run `work` with the pool for `name` (default when `None`) itself.
    ///
    /// Nothing is leased up front; `work` acquires what it needs.
    ///
    /// # Errors
    /// - creation errors from [`DataSourceRegistry::get_or_create`]
    /// - whatever `work` returns
    pub async fn with_pool<T, F>(&self, name: Option<&str>, work: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c str, &'c ConnectionPool) -> BoxFuture<'c, Result<T>>,
    {
        let name = resolve_name(name)?;
        let pool = self.registry.get_or_create(Some(name)).await?;
        work(name, &pool).await
    }

    /// Destroy the pool for `name`. Returns `false` if it was not active.
    ///
    /// Publishes the disconnect events and unregisters the pool's monitor.
    pub async fn close_data_source(&self, name: Option<&str>) -> Result<bool> {
        self.registry.destroy(name).await
    }
}
