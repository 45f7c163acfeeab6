//! # Nebula Data Source
//!
//! Named relational data sources for Nebula hosts: lazily created connection
//! pools, scoped connection leases, schema bootstrap from DDL scripts, live
//! pool monitoring and lifecycle events.
//!
//! ```rust,ignore
//! let runtime = DataSourceRuntime::builder()
//!     .config(settings)
//!     .driver("mock", MockDriver::new())
//!     .application("shop")
//!     .schema_search_path("resources")
//!     .build();
//!
//! runtime.on_startup().await?;
//! let rows = runtime
//!     .handler()
//!     .with_connection(Some("orders"), |_, _, conn| {
//!         Box::pin(async move { conn.execute("delete from cart").await })
//!     })
//!     .await?;
//! runtime.on_shutdown().await;
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod handler;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod testing;

#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use config::{ConfigResolver, ConnectOptions, DEFAULT_NAME, DataSourceConfig, PoolSettings, SchemaMode};
pub use driver::{Connection, Driver, DriverRegistry};
pub use error::{DataSourceError, DriverError, Result};
pub use events::{DataSourceEvent, EventBus, EventKind, EventSink, SinkSet};
pub use handler::DataSourceHandler;
pub use monitor::{MonitorRegistry, ObjectName, PoolMonitor};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use registry::DataSourceRegistry;
pub use runtime::{DataSourceRuntime, DataSourceRuntimeBuilder};
pub use schema::{ResourceLocator, SchemaInitializer, SchemaOutcome, SearchPath};

#[cfg(feature = "metrics")]
pub use self::metrics::{MetricsCollector, spawn_metrics_collector};
