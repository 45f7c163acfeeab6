//! Testing utilities for data source management

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver};
use crate::error::DriverError;
use crate::events::{DataSourceEvent, EventKind, EventSink};

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    open: AtomicUsize,
    fail_connects: AtomicBool,
    invalid: AtomicBool,
    executed: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    connect_delay: Mutex<Option<Duration>>,
    last_options: Mutex<Option<ConnectOptions>>,
}

/// In-memory driver that records what it is asked to do.
///
/// Clones share state, so a test can keep one copy for assertions and hand
/// another to a [`DriverRegistry`](crate::driver::DriverRegistry).
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `connect` calls.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Connections handed out by `connect` and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Make subsequent `connect` calls fail.
    pub fn fail_connects(&self, fail: bool) {
        self.state.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Make every connection report itself (in)valid on the next probe.
    pub fn set_valid(&self, valid: bool) {
        self.state.invalid.store(!valid, Ordering::SeqCst);
    }

    /// Fail any statement containing `fragment`.
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.state.failing.lock().push(fragment.into());
    }

    /// Sleep this long inside every `connect`.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = Some(delay);
        self
    }

    /// Every statement executed so far, across all connections.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    /// Options passed to the most recent `connect`.
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.last_options.lock().clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, DriverError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_connects.load(Ordering::SeqCst) {
            return Err(format!("mock connect to {} refused", options.url).into());
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_add(1, Ordering::SeqCst);
        *self.state.last_options.lock() = Some(options.clone());
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        let fails = self
            .state
            .failing
            .lock()
            .iter()
            .any(|fragment| sql.contains(fragment.as_str()));
        if fails {
            return Err(format!("mock statement failed: {sql}").into());
        }
        self.state.executed.lock().push(sql.to_string());
        Ok(1)
    }

    async fn is_valid(&mut self) -> bool {
        !self.state.invalid.load(Ordering::SeqCst)
    }
}

/// Event sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DataSourceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DataSourceEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(DataSourceEvent::kind).collect()
    }

    /// Kinds of the events about `name`, in publication order.
    pub fn kinds_for(&self, name: &str) -> Vec<EventKind> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .map(DataSourceEvent::kind)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: DataSourceEvent) {
        self.events.lock().push(event);
    }
}
