//! Registry lifecycle: at-most-once creation, event ordering, idempotent
//! destruction and isolation between named data sources.

use std::sync::Arc;
use std::time::Duration;

use nebula_datasource::testing::{MockDriver, RecordingSink};
use nebula_datasource::{DataSourceError, DataSourceRuntime, EventKind};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Set `RUST_LOG=nebula_datasource=trace` to see lifecycle logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runtime(config: Value, driver: MockDriver) -> (DataSourceRuntime, Arc<RecordingSink>) {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let runtime = DataSourceRuntime::builder()
        .config(config)
        .driver("mock", driver)
        .event_sink(sink.clone())
        .application("it")
        .build();
    (runtime, sink)
}

fn two_sources() -> Value {
    json!({
        "dataSource": { "driverClassName": "mock", "url": "mock://shared" },
        "dataSources": {
            "a": { "url": "mock://a" },
            "b": { "url": "mock://b" }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_builds_one_pool() {
    // A slow first connection widens the creation window.
    let driver = MockDriver::new().with_connect_delay(Duration::from_millis(30));
    let (runtime, sink) = runtime(
        json!({
            "dataSource": {
                "driverClassName": "mock",
                "url": "mock://db",
                "pool": { "minIdle": 1 }
            }
        }),
        driver.clone(),
    );

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let registry = Arc::clone(runtime.registry());
        tasks.spawn(async move { registry.get_or_create(None).await });
    }

    let mut pools = Vec::new();
    while let Some(result) = tasks.join_next().await {
        pools.push(result.expect("task panicked").expect("creation failed"));
    }

    assert_eq!(pools.len(), 32);
    assert!(pools.iter().all(|pool| pool.ptr_eq(&pools[0])));
    assert_eq!(driver.connects(), 1);
    assert_eq!(sink.kinds(), vec![EventKind::ConnectStart, EventKind::ConnectEnd]);
}

#[tokio::test]
async fn destroy_twice_publishes_one_disconnect_pair() {
    let (runtime, sink) = runtime(two_sources(), MockDriver::new());
    let registry = runtime.registry();

    registry.get_or_create(Some("a")).await.unwrap();
    assert!(registry.destroy(Some("a")).await.unwrap());
    assert!(!registry.destroy(Some("a")).await.unwrap());
    assert!(!registry.destroy(Some("never-created")).await.unwrap());

    assert_eq!(
        sink.kinds_for("a"),
        vec![
            EventKind::ConnectStart,
            EventKind::ConnectEnd,
            EventKind::DisconnectStart,
            EventKind::DisconnectEnd,
        ]
    );
    assert!(sink.kinds_for("never-created").is_empty());
}

#[tokio::test]
async fn events_are_ordered_across_cycles() {
    let (runtime, sink) = runtime(two_sources(), MockDriver::new());
    let registry = runtime.registry();

    for _ in 0..3 {
        registry.get_or_create(Some("a")).await.unwrap();
        registry.destroy(Some("a")).await.unwrap();
    }

    let kinds = sink.kinds_for("a");
    assert_eq!(kinds.len(), 12);
    for cycle in kinds.chunks(4) {
        assert_eq!(
            cycle,
            [
                EventKind::ConnectStart,
                EventKind::ConnectEnd,
                EventKind::DisconnectStart,
                EventKind::DisconnectEnd,
            ]
        );
    }
}

#[tokio::test]
async fn events_carry_config_and_pool() {
    let (runtime, sink) = runtime(two_sources(), MockDriver::new());
    let pool = runtime.registry().get_or_create(Some("b")).await.unwrap();
    runtime.registry().destroy(Some("b")).await.unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|event| event.config().url == "mock://b"));
    assert!(events[0].pool().is_none());
    assert!(events[1].pool().is_some_and(|p| p.ptr_eq(&pool)));
    assert!(events[2].pool().is_some_and(|p| p.ptr_eq(&pool)));
    assert!(events[3].pool().is_none());
}

#[tokio::test]
async fn blank_driver_fails_without_events() {
    let (runtime, sink) = runtime(
        json!({ "dataSource": { "driverClassName": "", "url": "mock://db" } }),
        MockDriver::new(),
    );

    let err = runtime.registry().get_or_create(None).await.unwrap_err();

    assert!(matches!(err, DataSourceError::Configuration { .. }));
    assert!(runtime.registry().get(None).is_none());
    assert!(runtime.monitors().names().is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn destroying_one_source_leaves_the_other_alone() {
    let (runtime, _) = runtime(two_sources(), MockDriver::new());
    let registry = runtime.registry();

    let a = registry.get_or_create(Some("a")).await.unwrap();
    let b = registry.get_or_create(Some("b")).await.unwrap();

    registry.destroy(Some("a")).await.unwrap();

    assert!(a.is_closed());
    assert!(!b.is_closed());
    assert!(registry.get(Some("b")).is_some_and(|pool| pool.ptr_eq(&b)));
    assert!(!runtime.monitors().is_registered("a"));
    let monitor = runtime.monitors().get("b").expect("b keeps its monitor");
    assert!(monitor.is_attached());
    assert_eq!(monitor.num_active().unwrap(), 0);

    let mut conn = b.acquire().await.unwrap();
    conn.execute("select 1").await.unwrap();
}

#[tokio::test]
async fn shutdown_destroys_everything() {
    let (runtime, sink) = runtime(two_sources(), MockDriver::new());
    for name in runtime.registry().names() {
        runtime.registry().get_or_create(Some(&name)).await.unwrap();
    }

    assert_eq!(runtime.on_shutdown().await, 3);
    assert!(runtime.registry().active_names().is_empty());
    assert!(runtime.monitors().names().is_empty());
    assert_eq!(
        sink.kinds()
            .iter()
            .filter(|kind| **kind == EventKind::DisconnectEnd)
            .count(),
        3
    );
}
