//! Schema bootstrap through the registry: best-effort, run once per creation.

use std::sync::Arc;

use nebula_datasource::testing::{MockDriver, RecordingSink};
use nebula_datasource::{DataSourceRuntime, EventKind};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Set `RUST_LOG=nebula_datasource=trace` to see lifecycle logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runtime(driver: MockDriver, dir: &std::path::Path, environment: &str) -> (DataSourceRuntime, Arc<RecordingSink>) {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let runtime = DataSourceRuntime::builder()
        .config(json!({
            "dataSource": { "driverClassName": "mock", "url": "mock://db", "schema": "create" },
            "dataSources": {
                "orders": {},
                "plain": { "schema": "skip" }
            }
        }))
        .driver("mock", driver)
        .event_sink(sink.clone())
        .environment(environment)
        .schema_search_path(dir)
        .build();
    (runtime, sink)
}

#[tokio::test]
async fn missing_ddl_does_not_fail_creation() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new();
    let (runtime, sink) = runtime(driver.clone(), dir.path(), "dev");

    let pool = runtime.registry().get_or_create(Some("orders")).await.unwrap();

    assert!(!pool.is_closed());
    assert!(driver.executed().is_empty());
    assert_eq!(sink.kinds(), vec![EventKind::ConnectStart, EventKind::ConnectEnd]);
}

#[tokio::test]
async fn environment_specific_script_runs_on_creation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("orders-schema-prod.ddl"),
        "create table orders (id int);\ncreate index orders_id on orders (id);\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("schema.ddl"), "create table fallback (id int);").unwrap();

    let driver = MockDriver::new();
    let (runtime, _) = runtime(driver.clone(), dir.path(), "prod");

    let pool = runtime.registry().get_or_create(Some("orders")).await.unwrap();
    // Asking again does not re-run the script.
    runtime.registry().get_or_create(Some("orders")).await.unwrap();

    assert_eq!(
        driver.executed(),
        vec![
            "create table orders (id int)".to_string(),
            "create index orders_id on orders (id)".to_string(),
        ]
    );
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn generic_script_is_the_last_resort() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schema-dev.ddl"), "create table env_wide (id int)").unwrap();

    let driver = MockDriver::new();
    let (runtime, _) = runtime(driver.clone(), dir.path(), "dev");
    runtime.registry().get_or_create(Some("orders")).await.unwrap();

    assert_eq!(driver.executed(), vec!["create table env_wide (id int)".to_string()]);
}

#[tokio::test]
async fn failing_statement_is_logged_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("schema.ddl"),
        "create table one (id int); create table bad syntax; create table three (id int);",
    )
    .unwrap();

    let driver = MockDriver::new();
    driver.fail_statements_containing("bad syntax");
    let (runtime, sink) = runtime(driver.clone(), dir.path(), "dev");

    let pool = runtime.registry().get_or_create(None).await.unwrap();

    assert_eq!(driver.executed(), vec!["create table one (id int)".to_string()]);
    assert_eq!(pool.stats().active, 0);
    assert_eq!(sink.kinds(), vec![EventKind::ConnectStart, EventKind::ConnectEnd]);
}

#[tokio::test]
async fn skip_mode_ignores_available_scripts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schema.ddl"), "create table t (id int)").unwrap();

    let driver = MockDriver::new();
    let (runtime, _) = runtime(driver.clone(), dir.path(), "dev");
    runtime.registry().get_or_create(Some("plain")).await.unwrap();

    assert!(driver.executed().is_empty());
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn script_runs_again_after_recreation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schema.ddl"), "create table t (id int)").unwrap();

    let driver = MockDriver::new();
    let (runtime, _) = runtime(driver.clone(), dir.path(), "dev");
    runtime.registry().get_or_create(None).await.unwrap();
    runtime.registry().destroy(None).await.unwrap();
    runtime.registry().get_or_create(None).await.unwrap();

    assert_eq!(driver.executed().len(), 2);
}
