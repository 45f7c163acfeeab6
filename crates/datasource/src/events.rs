//! Lifecycle notifications for data sources.
//!
//! The registry publishes a [`DataSourceEvent`] around every pool creation and
//! destruction through an [`EventSink`]. [`EventBus`] is the default sink,
//! backed by `tokio::sync::broadcast`; hosts plug their own bus in by
//! implementing [`EventSink`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::DataSourceConfig;
use crate::pool::ConnectionPool;

// ---------------------------------------------------------------------------
// DataSourceEvent
// ---------------------------------------------------------------------------

/// Events published during data source creation and destruction.
///
/// For one name, `ConnectStart` precedes `ConnectEnd`, which precedes the
/// matching `DisconnectStart` and then `DisconnectEnd`.
#[derive(Debug, Clone)]
pub enum DataSourceEvent {
    /// About to build the pool.
    ConnectStart {
        /// The data source name.
        name: String,
        /// Effective configuration.
        config: Arc<DataSourceConfig>,
    },
    /// Pool is active, schema and monitor setup are done.
    ConnectEnd {
        /// The data source name.
        name: String,
        /// Effective configuration.
        config: Arc<DataSourceConfig>,
        /// The new pool.
        pool: ConnectionPool,
    },
    /// About to tear the pool down.
    DisconnectStart {
        /// The data source name.
        name: String,
        /// Effective configuration.
        config: Arc<DataSourceConfig>,
        /// The pool being destroyed.
        pool: ConnectionPool,
    },
    /// Pool is closed and forgotten.
    DisconnectEnd {
        /// The data source name.
        name: String,
        /// Effective configuration.
        config: Arc<DataSourceConfig>,
    },
}

impl DataSourceEvent {
    /// Name of the data source the event is about.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectStart { name, .. }
            | Self::ConnectEnd { name, .. }
            | Self::DisconnectStart { name, .. }
            | Self::DisconnectEnd { name, .. } => name,
        }
    }

    /// Event kind without payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectStart { .. } => EventKind::ConnectStart,
            Self::ConnectEnd { .. } => EventKind::ConnectEnd,
            Self::DisconnectStart { .. } => EventKind::DisconnectStart,
            Self::DisconnectEnd { .. } => EventKind::DisconnectEnd,
        }
    }

    /// Configuration carried by every event.
    #[must_use]
    pub fn config(&self) -> &DataSourceConfig {
        match self {
            Self::ConnectStart { config, .. }
            | Self::ConnectEnd { config, .. }
            | Self::DisconnectStart { config, .. }
            | Self::DisconnectEnd { config, .. } => config,
        }
    }

    /// The pool, for the two events that carry one.
    #[must_use]
    pub fn pool(&self) -> Option<&ConnectionPool> {
        match self {
            Self::ConnectEnd { pool, .. } | Self::DisconnectStart { pool, .. } => Some(pool),
            Self::ConnectStart { .. } | Self::DisconnectEnd { .. } => None,
        }
    }
}

/// Payload-free event discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`DataSourceEvent::ConnectStart`].
    ConnectStart,
    /// See [`DataSourceEvent::ConnectEnd`].
    ConnectEnd,
    /// See [`DataSourceEvent::DisconnectStart`].
    DisconnectStart,
    /// See [`DataSourceEvent::DisconnectEnd`].
    DisconnectEnd,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectStart => write!(f, "DataSourceConnectStart"),
            Self::ConnectEnd => write!(f, "DataSourceConnectEnd"),
            Self::DisconnectStart => write!(f, "DataSourceDisconnectStart"),
            Self::DisconnectEnd => write!(f, "DataSourceDisconnectEnd"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receiver of lifecycle events.
///
/// Delivery is fire-and-forget; a sink that cannot deliver drops the event.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn publish(&self, event: DataSourceEvent);
}

/// Publishes every event to each contained sink, in order.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl SinkSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for SinkSet {
    fn publish(&self, event: DataSourceEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

impl fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSet")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for data source lifecycle events.
///
/// If no subscribers are listening or a subscriber lags behind, events are
/// dropped for it; the publisher never blocks.
pub struct EventBus {
    sender: broadcast::Sender<DataSourceEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: DataSourceEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DataSourceEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: DataSourceEvent) {
        tracing::trace!(event = %event.kind(), datasource = event.name(), "Publishing event");
        self.emit(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
