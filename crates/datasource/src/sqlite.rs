//! SQLite driver backed by `sqlx`.
//!
//! Registered by [`DriverRegistry::with_builtin`](crate::driver::DriverRegistry::with_builtin)
//! under [`DRIVER_NAME`]. URLs use the sqlx form, e.g. `sqlite::memory:` or
//! `sqlite://data/app.db?mode=rwc`. Credentials are ignored.

use async_trait::async_trait;
use sqlx::{Connection as _, Executor as _, SqliteConnection};

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver};
use crate::error::DriverError;

/// `driverClassName` selecting this driver.
pub const DRIVER_NAME: &str = "sqlite";

/// Opens one `SqliteConnection` per pooled connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, DriverError> {
        let conn = SqliteConnection::connect(&options.url).await?;
        Ok(Box::new(SqliteLink { conn }))
    }
}

struct SqliteLink {
    conn: SqliteConnection,
}

#[async_trait]
impl Connection for SqliteLink {
    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        let result = (&mut self.conn).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn is_valid(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }
}
