//! Error types for data source management
use thiserror::Error;

/// Result type for data source operations
pub type Result<T> = std::result::Result<T, DataSourceError>;

/// Failure reported by a [`Driver`](crate::driver::Driver) or one of its connections.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for data source operations
#[derive(Error, Debug)]
pub enum DataSourceError {
    /// A required setting is missing or invalid; the pool is never created
    #[error("Configuration error for data source '{name}': {message}")]
    Configuration {
        /// The data source name
        name: String,
        /// The error message
        message: String,
        /// The underlying parse error (if any)
        #[source]
        source: Option<DriverError>,
    },

    /// No driver is registered under the configured driver name
    #[error("Driver '{driver}' required by data source '{name}' is not registered")]
    DriverLoad {
        /// The data source name
        name: String,
        /// The configured `driverClassName`
        driver: String,
    },

    /// Acquisition waited longer than the pool's `maxWait`
    #[error(
        "Connection pool '{name}' exhausted: {active}/{max_active} in use after waiting {waited_ms}ms"
    )]
    PoolExhausted {
        /// The data source name
        name: String,
        /// Connections checked out when the wait expired
        active: usize,
        /// Configured upper bound
        max_active: usize,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// A driver-level failure while opening or using a connection
    #[error("Connection error on data source '{name}': {source}")]
    Connection {
        /// The data source name
        name: String,
        /// The driver error
        #[source]
        source: DriverError,
    },

    /// A management operation failed
    #[error("Monitor operation '{operation}' failed for data source '{name}': {message}")]
    Monitor {
        /// The data source name
        name: String,
        /// The operation that failed (`evict`, `setMaxActive`, ...)
        operation: String,
        /// The failure reason
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<DataSourceError>>,
    },

    /// Schema bootstrap failed. Logged by the registry, never fatal to creation.
    #[error("Schema initialization failed for data source '{name}' ({location}): {message}")]
    SchemaInit {
        /// The data source name
        name: String,
        /// Path of the DDL script
        location: String,
        /// The failure reason
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<DataSourceError>>,
    },

    /// The pool was destroyed while the caller was using or waiting on it
    #[error("Connection pool '{name}' is closed")]
    PoolClosed {
        /// The data source name
        name: String,
    },
}

impl DataSourceError {
    /// Create a configuration error
    pub fn configuration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a driver failure
    pub fn connection(name: impl Into<String>, source: DriverError) -> Self {
        Self::Connection {
            name: name.into(),
            source,
        }
    }

    /// Create a monitor error, optionally wrapping the failure that caused it
    pub fn monitor(
        name: impl Into<String>,
        operation: impl Into<String>,
        source: Option<DataSourceError>,
    ) -> Self {
        let message = source
            .as_ref()
            .map_or_else(|| "monitor is detached".to_string(), ToString::to_string);
        Self::Monitor {
            name: name.into(),
            operation: operation.into(),
            message,
            source: source.map(Box::new),
        }
    }

    /// Create a schema initialization error
    pub fn schema_init(
        name: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
        source: Option<DataSourceError>,
    ) -> Self {
        Self::SchemaInit {
            name: name.into(),
            location: location.into(),
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// Only an exhausted pool is worth retrying; nothing in this crate retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Get the data source name associated with this error
    #[must_use]
    pub fn pool_name(&self) -> &str {
        match self {
            Self::Configuration { name, .. }
            | Self::DriverLoad { name, .. }
            | Self::PoolExhausted { name, .. }
            | Self::Connection { name, .. }
            | Self::Monitor { name, .. }
            | Self::SchemaInit { name, .. }
            | Self::PoolClosed { name } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_is_retryable() {
        let exhausted = DataSourceError::PoolExhausted {
            name: "orders".into(),
            active: 1,
            max_active: 1,
            waited_ms: 50,
        };
        assert!(exhausted.is_retryable());
        assert!(!DataSourceError::configuration("orders", "url must not be blank").is_retryable());
        assert!(!DataSourceError::PoolClosed { name: "orders".into() }.is_retryable());
    }

    #[test]
    fn connection_error_keeps_driver_cause() {
        let cause: DriverError = Box::new(std::io::Error::other("socket reset"));
        let err = DataSourceError::connection("orders", cause);

        let source = std::error::Error::source(&err).expect("driver cause");
        assert_eq!(source.to_string(), "socket reset");
        assert_eq!(err.pool_name(), "orders");
    }

    #[test]
    fn detached_monitor_message() {
        let err = DataSourceError::monitor("orders", "evict", None);
        assert!(err.to_string().contains("monitor is detached"));
    }
}
