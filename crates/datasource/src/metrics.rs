//! Pool metrics export.
//!
//! Periodically samples every registered [`PoolMonitor`](crate::monitor::PoolMonitor)
//! into gauges and counts lifecycle events from the [`EventBus`], both via
//! the `metrics` crate.
//!
//! Gated behind the `metrics` feature.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::{DataSourceEvent, EventBus};
use crate::monitor::MonitorRegistry;
use crate::pool::PoolStats;

/// Background task pushing pool statistics to the `metrics` facade.
///
/// ```rust,ignore
/// let collector = MetricsCollector::new(runtime.monitors().clone(), runtime.events(), Duration::from_secs(10));
/// let cancel = CancellationToken::new();
/// tokio::spawn(collector.run(cancel));
/// ```
pub struct MetricsCollector {
    monitors: Arc<MonitorRegistry>,
    receiver: broadcast::Receiver<DataSourceEvent>,
    interval: Duration,
}

impl MetricsCollector {
    /// Create a collector sampling `monitors` every `interval`.
    #[must_use]
    pub fn new(monitors: Arc<MonitorRegistry>, event_bus: &EventBus, interval: Duration) -> Self {
        Self {
            monitors,
            receiver: event_bus.subscribe(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Run until `cancel` fires or the event bus is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sample(),
                result = self.receiver.recv() => {
                    match result {
                        Ok(event) => Self::record_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "MetricsCollector lagged behind event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    /// Push one snapshot of every registered pool.
    pub fn sample(&self) {
        for (name, stats) in self.monitors.snapshot() {
            Self::record_stats(&name, &stats);
        }
    }

    fn record_stats(name: &str, stats: &PoolStats) {
        let label = name.to_string();
        metrics::gauge!("datasource.pool.active", "datasource" => label.clone()).set(stats.active as f64);
        metrics::gauge!("datasource.pool.idle", "datasource" => label.clone()).set(stats.idle as f64);
        metrics::gauge!("datasource.pool.total", "datasource" => label.clone()).set(stats.total as f64);
        metrics::gauge!("datasource.pool.waiting", "datasource" => label).set(stats.waiting as f64);
    }

    fn record_event(event: &DataSourceEvent) {
        let label = event.name().to_string();
        match event {
            DataSourceEvent::ConnectEnd { .. } => {
                metrics::counter!("datasource.connect.total", "datasource" => label).increment(1);
            }
            DataSourceEvent::DisconnectEnd { .. } => {
                metrics::counter!("datasource.disconnect.total", "datasource" => label).increment(1);
            }
            DataSourceEvent::ConnectStart { .. } | DataSourceEvent::DisconnectStart { .. } => {}
        }
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Create a [`MetricsCollector`] and spawn it as a background task.
pub fn spawn_metrics_collector(
    monitors: Arc<MonitorRegistry>,
    event_bus: &EventBus,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(MetricsCollector::new(monitors, event_bus, interval).run(cancel))
}
