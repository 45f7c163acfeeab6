//! Schema bootstrap on pool creation.
//!
//! When a data source is configured with `schema = "create"`, the registry
//! runs a DDL script right after the pool becomes active. The script is found
//! by trying, in order:
//!
//! 1. `{name}-schema-{env}.ddl`
//! 2. `{name}-schema.ddl`
//! 3. `schema-{env}.ddl`
//! 4. `schema.ddl`
//!
//! on a [`ResourceLocator`]. Bootstrap is best-effort: a missing script or a
//! failing statement is logged and reported as a [`SchemaOutcome`], never as
//! a creation failure.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DataSourceConfig, SchemaMode};
use crate::error::DataSourceError;
use crate::pool::ConnectionPool;

/// Finds named resources such as DDL scripts.
pub trait ResourceLocator: Send + Sync {
    /// Path of the resource called `name`, if it exists.
    fn locate(&self, name: &str) -> Option<PathBuf>;
}

/// Ordered list of directories; the first one containing the file wins.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory.
    #[must_use]
    pub fn with(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl ResourceLocator for SearchPath {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SearchPath {
    fn from_iter<I: IntoIterator<Item = P>>(dirs: I) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
}

/// Script names tried for data source `name` in environment `env`, in order.
#[must_use]
pub fn candidates(name: &str, env: &str) -> [String; 4] {
    [
        format!("{name}-schema-{env}.ddl"),
        format!("{name}-schema.ddl"),
        format!("schema-{env}.ddl"),
        "schema.ddl".to_string(),
    ]
}

/// Split a script on `;`, trimming each fragment and skipping empty ones.
#[must_use]
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// What schema bootstrap did for one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOutcome {
    /// Schema mode is not `create`.
    Skipped,
    /// No candidate script exists on the search path.
    NotFound,
    /// Every statement of `source` ran.
    Applied {
        /// Script that was executed.
        source: PathBuf,
        /// Statements executed.
        statements: usize,
    },
    /// The script could not be read or a statement failed; the rest was skipped.
    Failed {
        /// Script that was being executed.
        source: PathBuf,
        /// Zero-based index of the statement that failed. Zero when the
        /// script could not be read or no connection was available.
        statement_index: usize,
    },
}

/// Locates and runs DDL scripts.
#[derive(Clone)]
pub struct SchemaInitializer {
    locator: Arc<dyn ResourceLocator>,
    environment: String,
}

impl SchemaInitializer {
    pub fn new(locator: Arc<dyn ResourceLocator>, environment: impl Into<String>) -> Self {
        Self {
            locator,
            environment: environment.into(),
        }
    }

    /// Environment name used in script names.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// First existing candidate script for `name`.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        for candidate in candidates(name, &self.environment) {
            if let Some(path) = self.locator.locate(&candidate) {
                return Some(path);
            }
            tracing::warn!(
                datasource = %name,
                script = %candidate,
                "Schema mode is 'create' but script was not found on the search path"
            );
        }
        None
    }

    /// Run the schema script for `config` against `pool`.
    ///
    /// Never fails; problems are logged and reflected in the outcome.
    pub async fn initialize(&self, config: &DataSourceConfig, pool: &ConnectionPool) -> SchemaOutcome {
        let name = config.name.as_str();
        if config.schema != SchemaMode::Create {
            return SchemaOutcome::Skipped;
        }

        let Some(source) = self.locate(name) else {
            tracing::error!(
                datasource = %name,
                "Schema mode is 'create' but no suitable schema script was found"
            );
            return SchemaOutcome::NotFound;
        };

        tracing::info!(datasource = %name, script = %source.display(), "Initializing schema");

        match run_script(name, &source, pool).await {
            Ok(statements) => {
                tracing::info!(datasource = %name, statements, "Schema initialized");
                SchemaOutcome::Applied { source, statements }
            }
            Err((statement_index, err)) => {
                tracing::error!(
                    datasource = %name,
                    script = %source.display(),
                    statement_index,
                    error = %err,
                    "An error occurred when executing schema DDL"
                );
                SchemaOutcome::Failed {
                    source,
                    statement_index,
                }
            }
        }
    }
}

impl fmt::Debug for SchemaInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaInitializer")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Execute every statement of `source` on one leased connection.
///
/// The lease is returned on every path, including mid-script failure.
async fn run_script(
    name: &str,
    source: &Path,
    pool: &ConnectionPool,
) -> Result<usize, (usize, DataSourceError)> {
    let location = source.display().to_string();
    let script = tokio::fs::read_to_string(source).await.map_err(|e| {
        (
            0,
            DataSourceError::schema_init(name, &location, format!("cannot read script: {e}"), None),
        )
    })?;

    let mut conn = pool.acquire().await.map_err(|e| {
        (
            0,
            DataSourceError::schema_init(name, &location, "no connection available", Some(e)),
        )
    })?;

    let statements = split_statements(&script);
    for (index, statement) in statements.iter().enumerate() {
        conn.execute(statement).await.map_err(|e| {
            (
                index,
                DataSourceError::schema_init(name, &location, format!("statement {index} failed"), Some(e)),
            )
        })?;
    }
    Ok(statements.len())
}
