//! Effective per-data-source configuration.
//!
//! The host hands over an already-loaded configuration tree (the
//! `serde_json::Value` shape `nebula-config` produces). Defaults live under
//! `dataSource`, named overrides under `dataSources.<name>`; the resolver
//! deep-merges the two and deserializes the result into [`DataSourceConfig`].
//!
//! ```json
//! {
//!   "dataSource": { "driverClassName": "sqlite", "pool": { "maxActive": 8 } },
//!   "dataSources": {
//!     "orders": { "url": "sqlite::memory:", "schema": "create" }
//!   }
//! }
//! ```

use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{DataSourceError, Result};

/// Name used when a caller does not name a data source.
pub const DEFAULT_NAME: &str = "default";

const SINGLE_KEY: &str = "dataSource";
const PLURAL_KEY: &str = "dataSources";
const SHORT_SINGLE_KEY: &str = "pool";
const SHORT_PLURAL_KEY: &str = "pools";

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Map an optional caller-supplied name to a validated data source name.
///
/// `None` selects [`DEFAULT_NAME`]; a blank name is a configuration error.
pub fn resolve_name(name: Option<&str>) -> Result<&str> {
    match name {
        None => Ok(DEFAULT_NAME),
        Some(name) if name.trim().is_empty() => Err(DataSourceError::configuration(
            name,
            "data source name must not be blank",
        )),
        Some(name) => Ok(name),
    }
}

// ---------------------------------------------------------------------------
// SchemaMode
// ---------------------------------------------------------------------------

/// Whether a DDL script runs when the pool is first created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Leave the database untouched.
    #[default]
    Skip,
    /// Locate and execute a DDL script after the pool becomes active.
    Create,
}

impl<'de> Deserialize<'de> for SchemaMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "skip" => Ok(Self::Skip),
            "create" => Ok(Self::Create),
            other => Err(serde::de::Error::custom(format!(
                "unknown schema mode '{other}', expected 'skip' or 'create'"
            ))),
        }
    }
}

/// The `schema` key: either a boolean "skip schema" flag or a mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SchemaSwitch {
    Skip(bool),
    Mode(SchemaMode),
}

impl SchemaSwitch {
    /// `true` forces skip, `false` defers to `dbCreate`, a string wins outright.
    fn apply(self, mode: SchemaMode) -> SchemaMode {
        match self {
            Self::Skip(true) => SchemaMode::Skip,
            Self::Skip(false) => mode,
            Self::Mode(explicit) => explicit,
        }
    }
}

// ---------------------------------------------------------------------------
// PoolSettings
// ---------------------------------------------------------------------------

/// Tuning for one connection pool. Every field can be changed at runtime
/// through the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Upper bound on connections (checked out + idle + being opened).
    pub max_active: usize,
    /// How long `acquire` waits for a free connection. Negative values in
    /// the source config select the default.
    #[serde(with = "wait_millis")]
    pub max_wait: Duration,
    /// Idle connections beyond this are closed on return.
    pub max_idle: usize,
    /// Idle connections the pool opens eagerly and restores after eviction.
    pub min_idle: usize,
    /// Period of the background evictor; zero disables it.
    #[serde(rename = "timeBetweenEvictionRunsMillis", with = "millis")]
    pub eviction_interval: Duration,
    /// Idle time after which `evict` closes a connection.
    #[serde(rename = "minEvictableIdleTimeMillis", with = "millis")]
    pub min_evictable_idle: Duration,
    /// Validate idle connections before handing them out.
    pub test_on_borrow: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_active: 8,
            max_wait: DEFAULT_MAX_WAIT,
            max_idle: 8,
            min_idle: 0,
            eviction_interval: Duration::ZERO,
            min_evictable_idle: Duration::from_secs(30 * 60),
            test_on_borrow: true,
        }
    }
}

impl PoolSettings {
    /// Validate pool settings for the named data source.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_active == 0 {
            return Err(DataSourceError::configuration(
                name,
                "pool.maxActive must be greater than 0",
            ));
        }
        if self.min_idle > self.max_idle {
            return Err(DataSourceError::configuration(
                name,
                format!(
                    "pool.minIdle ({}) must not exceed pool.maxIdle ({})",
                    self.min_idle, self.max_idle
                ),
            ));
        }
        Ok(())
    }
}

mod millis {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(Duration::from_millis(raw.max(0) as u64))
    }
}

mod wait_millis {
    use super::{DEFAULT_MAX_WAIT, Deserialize, Deserializer, Duration, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        super::millis::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            Ok(DEFAULT_MAX_WAIT)
        } else {
            Ok(Duration::from_millis(raw as u64))
        }
    }
}

// ---------------------------------------------------------------------------
// DataSourceConfig
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Resolved settings for one named data source.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    /// Data source name (not part of the serialized form).
    #[serde(skip)]
    pub name: String,
    /// Name of a registered [`Driver`](crate::driver::Driver).
    #[serde(default, alias = "driver")]
    pub driver_class_name: String,
    /// Connection URL handed to the driver.
    #[serde(default)]
    pub url: String,
    /// Login; blank means "connect without credentials".
    #[serde(default)]
    pub username: String,
    /// Password, ignored when `username` is blank.
    #[serde(default)]
    pub password: String,
    /// Effective schema bootstrap mode, read from `dbCreate` (alias
    /// `schemaMode`) and overridden by the `schema` key.
    #[serde(default, rename = "dbCreate", alias = "schemaMode")]
    pub schema: SchemaMode,
    #[serde(default, rename = "schema")]
    schema_switch: Option<SchemaSwitch>,
    /// Register a [`PoolMonitor`](crate::monitor::PoolMonitor) for this pool.
    #[serde(default = "default_true")]
    pub jmx: bool,
    /// Create the pool eagerly on host startup.
    #[serde(default, rename = "connect_on_startup", alias = "connectOnStartup")]
    pub connect_on_startup: bool,
    /// Pool tuning.
    #[serde(default)]
    pub pool: PoolSettings,
    /// The merged tree this config was built from.
    #[serde(skip)]
    pub raw: Map<String, Value>,
}

impl std::fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("name", &self.name)
            .field("driver_class_name", &self.driver_class_name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("schema", &self.schema)
            .field("jmx", &self.jmx)
            .field("connect_on_startup", &self.connect_on_startup)
            .field("pool", &self.pool)
            .finish()
    }
}

impl DataSourceConfig {
    /// Build and validate a config from a merged settings object.
    pub fn from_value(name: &str, value: Value) -> Result<Self> {
        let raw = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(DataSourceError::configuration(
                    name,
                    format!("expected a settings object, found {other}"),
                ));
            }
        };

        let mut config: Self =
            Self::deserialize(Value::Object(raw.clone())).map_err(|e| {
                DataSourceError::Configuration {
                    name: name.to_string(),
                    message: format!("invalid settings: {e}"),
                    source: Some(Box::new(e)),
                }
            })?;
        config.name = name.to_string();
        if let Some(switch) = config.schema_switch.take() {
            config.schema = switch.apply(config.schema);
        }
        config.raw = raw;
        config.validate()?;
        Ok(config)
    }

    /// Driver name and URL are mandatory; there is no default for either.
    pub fn validate(&self) -> Result<()> {
        if self.driver_class_name.trim().is_empty() {
            return Err(DataSourceError::configuration(
                &self.name,
                format!("{PLURAL_KEY}.{}.driverClassName must not be blank", self.name),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(DataSourceError::configuration(
                &self.name,
                format!("{PLURAL_KEY}.{}.url must not be blank", self.name),
            ));
        }
        self.pool.validate(&self.name)
    }

    /// Options handed to the driver for every new physical connection.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let credentials = !self.username.trim().is_empty();
        ConnectOptions {
            url: self.url.clone(),
            username: credentials.then(|| self.username.clone()),
            password: credentials.then(|| self.password.clone()),
        }
    }
}

/// What a driver needs to open one physical connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Connection URL.
    pub url: String,
    /// Login, if credentials are configured.
    pub username: Option<String>,
    /// Password, if credentials are configured.
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Merges global defaults with named overrides.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    root: Value,
    names: IndexSet<String>,
}

impl ConfigResolver {
    /// Create a resolver over the given configuration tree.
    #[must_use]
    pub fn new(root: Value) -> Self {
        let mut names = IndexSet::new();
        names.insert(DEFAULT_NAME.to_string());
        if let Some(Value::Object(named)) = plural_section(&root) {
            names.extend(named.keys().cloned());
        }
        Self { root, names }
    }

    /// Configured names, default first, then in configuration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    /// Whether `name` appears in the configuration.
    #[must_use]
    pub fn is_configured(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Produce the effective configuration for `name`.
    pub fn resolve(&self, name: &str) -> Result<DataSourceConfig> {
        let name = resolve_name(Some(name))?;
        DataSourceConfig::from_value(name, self.merged(name))
    }

    /// Defaults deep-merged with the override for `name`, before deserialization.
    #[must_use]
    pub fn merged(&self, name: &str) -> Value {
        let mut merged = single_section(&self.root)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Some(named) = plural_section(&self.root).and_then(|section| section.get(name)) {
            deep_merge(&mut merged, named);
        }
        merged
    }

    /// Whether `name` asks to be created on host startup.
    ///
    /// Read from the merged tree without validating the rest, so a broken
    /// entry that is not eager never fails startup.
    #[must_use]
    pub fn connects_on_startup(&self, name: &str) -> bool {
        let merged = self.merged(name);
        merged
            .get("connect_on_startup")
            .or_else(|| merged.get("connectOnStartup"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn single_section(root: &Value) -> Option<&Value> {
    root.get(SINGLE_KEY).or_else(|| root.get(SHORT_SINGLE_KEY))
}

fn plural_section(root: &Value) -> Option<&Value> {
    root.get(PLURAL_KEY).or_else(|| root.get(SHORT_PLURAL_KEY))
}

/// Objects merge key by key; anything else in `overlay` replaces `base`.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
