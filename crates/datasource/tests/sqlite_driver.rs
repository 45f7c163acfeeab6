//! End-to-end run against the built-in SQLite driver.
#![cfg(feature = "sqlite")]

use nebula_datasource::DataSourceRuntime;
use serde_json::json;

#[tokio::test]
async fn schema_and_leases_share_one_in_memory_database() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("schema.ddl"),
        "create table items (id integer primary key, name text not null);",
    )
    .unwrap();

    // One connection, so the in-memory database outlives each lease.
    let runtime = DataSourceRuntime::builder()
        .config(json!({
            "dataSource": {
                "driverClassName": "sqlite",
                "url": "sqlite::memory:",
                "schema": "create",
                "connect_on_startup": true,
                "pool": { "maxActive": 1, "maxIdle": 1 }
            }
        }))
        .schema_search_path(dir.path())
        .build();

    assert_eq!(runtime.on_startup().await.unwrap(), 1);

    let inserted = runtime
        .handler()
        .with_connection(None, |_, _, conn| {
            Box::pin(async move { conn.execute("insert into items (name) values ('a'), ('b')").await })
        })
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let monitor = runtime.monitors().get("default").unwrap();
    assert_eq!(monitor.idle_connections().unwrap(), 1);

    assert_eq!(runtime.on_shutdown().await, 1);
}
