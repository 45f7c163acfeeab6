//! Composition root.
//!
//! [`DataSourceRuntime`] wires the resolver, driver table, monitor registry,
//! event bus, registry and handler together and exposes the two host hooks:
//! [`on_startup`](DataSourceRuntime::on_startup) creates every data source
//! marked `connect_on_startup`, [`on_shutdown`](DataSourceRuntime::on_shutdown)
//! tears everything down.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::ConfigResolver;
use crate::driver::{Driver, DriverRegistry};
use crate::error::{DataSourceError, Result};
use crate::events::{DataSourceEvent, EventBus, EventSink, SinkSet};
use crate::handler::DataSourceHandler;
use crate::monitor::MonitorRegistry;
use crate::registry::DataSourceRegistry;
use crate::schema::{ResourceLocator, SchemaInitializer, SearchPath};

const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_APPLICATION: &str = "nebula";

/// Fully wired data source subsystem.
#[derive(Debug, Clone)]
pub struct DataSourceRuntime {
    registry: Arc<DataSourceRegistry>,
    handler: DataSourceHandler,
    monitors: Arc<MonitorRegistry>,
    events: Arc<EventBus>,
}

impl DataSourceRuntime {
    #[must_use]
    pub fn builder() -> DataSourceRuntimeBuilder {
        DataSourceRuntimeBuilder::default()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn handler(&self) -> &DataSourceHandler {
        &self.handler
    }

    #[must_use]
    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Subscribe to lifecycle events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DataSourceEvent> {
        self.events.subscribe()
    }

    /// Create every configured data source with `connect_on_startup = true`.
    ///
    /// A failing data source does not stop the others; each failure is
    /// logged and the first one is returned once all were attempted.
    /// On success returns how many data sources were created.
    pub async fn on_startup(&self) -> Result<usize> {
        let mut created = 0;
        let mut first_error: Option<DataSourceError> = None;

        for name in self.registry.names() {
            if !self.registry.resolver().connects_on_startup(&name) {
                continue;
            }
            match self.registry.get_or_create(Some(&name)).await {
                Ok(_) => created += 1,
                Err(err) => {
                    tracing::error!(datasource = %name, error = %err, "Eager data source creation failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::debug!(created, "Data sources started");
                Ok(created)
            }
        }
    }

    /// Destroy every live data source. Returns how many were destroyed.
    pub async fn on_shutdown(&self) -> usize {
        let destroyed = self.registry.destroy_all().await;
        tracing::debug!(destroyed, "Data sources shut down");
        destroyed
    }
}

/// Builder for [`DataSourceRuntime`].
pub struct DataSourceRuntimeBuilder {
    config: Value,
    drivers: DriverRegistry,
    sinks: SinkSet,
    environment: String,
    application: String,
    locator: Option<Arc<dyn ResourceLocator>>,
    search_path: SearchPath,
    event_buffer: usize,
}

impl Default for DataSourceRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: Value::Null,
            drivers: DriverRegistry::with_builtin(),
            sinks: SinkSet::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            application: DEFAULT_APPLICATION.to_string(),
            locator: None,
            search_path: SearchPath::new(),
            event_buffer: 256,
        }
    }
}

impl DataSourceRuntimeBuilder {
    /// Configuration tree with `dataSource` / `dataSources` sections.
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Register a driver under `name`.
    pub fn driver(self, name: impl Into<String>, driver: impl Driver) -> Self {
        self.drivers.register(name, driver);
        self
    }

    /// Forward lifecycle events to `sink` in addition to the built-in bus.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks = self.sinks.with(sink);
        self
    }

    /// Environment name used to pick DDL scripts.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Application name used in monitor object names.
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Add a directory to the DDL search path.
    pub fn schema_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir);
        self
    }

    /// Replace the search path with a custom locator.
    pub fn resource_locator(mut self, locator: Arc<dyn ResourceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Capacity of the broadcast event bus.
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn build(self) -> DataSourceRuntime {
        let events = Arc::new(EventBus::new(self.event_buffer.max(1)));
        let sinks = SinkSet::new()
            .with(Arc::clone(&events) as Arc<dyn EventSink>)
            .with(Arc::new(self.sinks));
        let locator = self
            .locator
            .unwrap_or_else(|| Arc::new(self.search_path));
        let monitors = Arc::new(MonitorRegistry::new(self.application));

        let registry = Arc::new(DataSourceRegistry::new(
            ConfigResolver::new(self.config),
            Arc::new(self.drivers),
            Arc::clone(&monitors),
            SchemaInitializer::new(locator, self.environment),
            Arc::new(sinks),
        ));

        DataSourceRuntime {
            handler: DataSourceHandler::new(Arc::clone(&registry)),
            registry,
            monitors,
            events,
        }
    }
}

impl std::fmt::Debug for DataSourceRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRuntimeBuilder")
            .field("drivers", &self.drivers)
            .field("environment", &self.environment)
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::testing::{MockDriver, RecordingSink};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn startup_creates_only_eager_sources() {
        let driver = MockDriver::new();
        let runtime = DataSourceRuntime::builder()
            .config(json!({
                "dataSource": { "driverClassName": "mock", "url": "mock://db" },
                "dataSources": {
                    "eager": { "connect_on_startup": true },
                    "lazy": {}
                }
            }))
            .driver("mock", driver)
            .build();

        assert_eq!(runtime.on_startup().await.unwrap(), 1);
        assert_eq!(runtime.registry().active_names(), vec!["eager".to_string()]);

        assert_eq!(runtime.on_shutdown().await, 1);
        assert!(runtime.registry().active_names().is_empty());
    }

    #[tokio::test]
    async fn startup_attempts_every_source_and_reports_first_error() {
        let runtime = DataSourceRuntime::builder()
            .config(json!({
                "dataSource": { "driverClassName": "mock", "url": "mock://db", "connectOnStartup": true },
                "dataSources": {
                    "broken": { "driverClassName": "missing" },
                    "fine": {}
                }
            }))
            .driver("mock", MockDriver::new())
            .build();

        let err = runtime.on_startup().await.unwrap_err();
        assert!(matches!(err, DataSourceError::DriverLoad { ref name, .. } if name == "broken"));
        assert_eq!(
            runtime.registry().active_names(),
            vec!["default".to_string(), "fine".to_string()]
        );
    }

    #[tokio::test]
    async fn extra_sinks_and_bus_both_receive_events() {
        let sink = Arc::new(RecordingSink::new());
        let runtime = DataSourceRuntime::builder()
            .config(json!({ "dataSource": { "driverClassName": "mock", "url": "mock://db" } }))
            .driver("mock", MockDriver::new())
            .event_sink(sink.clone())
            .application("shop")
            .build();
        let mut rx = runtime.subscribe();

        runtime.registry().get_or_create(None).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::ConnectStart);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::ConnectEnd);
        assert_eq!(sink.kinds(), vec![EventKind::ConnectStart, EventKind::ConnectEnd]);
        assert_eq!(
            runtime.monitors().get("default").unwrap().object_name().to_string(),
            "nebula.datasource:type=ConnectionPool,application=shop,name=default"
        );
    }
}
