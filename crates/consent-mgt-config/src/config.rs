// crates/consent-mgt-config/src/config.rs
// ============================================================================
// Module: Consent Management Configuration
// Description: Configuration structures and loading for the consent engine.
// Purpose: Provide strict, fail-closed config parsing with safe defaults.
// Dependencies: consent-mgt-core, consent-mgt-store-sqlite, consent-mgt-store-postgres, serde, toml
// ============================================================================

//! ## Overview
//! Config input is untrusted: the path is length-checked, the file is size
//! capped and must be UTF-8, unknown fields are rejected, and
//! [`ConsentMgtConfig::validate`] runs before a config is returned.
//! Resolution order is the explicit path, then `CONSENT_MGT_CONFIG`, then
//! `consent-mgt.toml` in the working directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use consent_mgt_core::ConsentStoreOptions;
use consent_mgt_core::Dialect;
use consent_mgt_store_postgres::PostgresStoreConfig;
use consent_mgt_store_sqlite::SqliteStoreConfig;
use consent_mgt_store_sqlite::SqliteStoreMode;
use consent_mgt_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default config file name.
pub const DEFAULT_CONFIG_NAME: &str = "consent-mgt.toml";
/// Environment variable naming the config path.
pub const CONFIG_ENV_VAR: &str = "CONSENT_MGT_CONFIG";
/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound accepted for `query.max_page_size`.
const MAX_PAGE_SIZE_LIMIT: u64 = 10_000;
/// Default `query.max_page_size`.
const DEFAULT_MAX_PAGE_SIZE: u64 = 1_000;
/// Default retention horizon: 90 days.
const DEFAULT_RETENTION_HORIZON_SECONDS: u64 = 90 * 24 * 60 * 60;
/// Default `SQLite` busy timeout.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default `SQLite` read pool size.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Default Postgres pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 16;
/// Default Postgres connect timeout.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
/// Default Postgres statement timeout.
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;
/// Default Postgres lock timeout.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
/// Maximum Postgres pool size.
const MAX_CONNECTIONS_LIMIT: u32 = 1_024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading config.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Validation error.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Consent engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsentMgtConfig {
    /// Storage backend settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Audit snapshot and event sink settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Ledger retention settings.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Query rendering and paging settings.
    #[serde(default)]
    pub query: QueryConfig,
}

impl ConsentMgtConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.audit.validate()?;
        self.retention.validate()?;
        self.query.validate()?;
        Ok(())
    }

    /// Returns the consent store options derived from config.
    #[must_use]
    pub const fn store_options(&self) -> ConsentStoreOptions {
        ConsentStoreOptions {
            history_snapshots: self.audit.history_snapshots,
            max_page_size: Some(self.query.max_page_size),
        }
    }
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Embedded `SQLite` file.
    #[default]
    Sqlite,
    /// Shared Postgres database.
    Postgres,
}

/// Storage backend configuration.
///
/// # Invariants
/// - `sqlite` requires `path` and forbids `connection`.
/// - `postgres` requires `connection` and forbids `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// `SQLite` reader connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Postgres connection string.
    #[serde(default)]
    pub connection: Option<String>,
    /// Postgres pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Postgres connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Postgres statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Postgres lock wait timeout in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::Sqlite,
            path: Some(PathBuf::from("consent-mgt.db")),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            connection: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Validates backend selection and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a setting is missing or out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Sqlite => {
                if self.connection.is_some() {
                    return Err(ConfigError::Invalid(
                        "store.connection is only valid for postgres stores".to_string(),
                    ));
                }
                if self.busy_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "store.busy_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                self.sqlite_config()?;
            }
            StoreType::Postgres => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "store.path is only valid for sqlite stores".to_string(),
                    ));
                }
                if self.max_connections > MAX_CONNECTIONS_LIMIT {
                    return Err(ConfigError::Invalid(format!(
                        "store.max_connections must be at most {MAX_CONNECTIONS_LIMIT}"
                    )));
                }
                for (name, value) in [
                    ("connect_timeout_ms", self.connect_timeout_ms),
                    ("statement_timeout_ms", self.statement_timeout_ms),
                    ("lock_timeout_ms", self.lock_timeout_ms),
                ] {
                    if value == 0 {
                        return Err(ConfigError::Invalid(format!(
                            "store.{name} must be greater than zero"
                        )));
                    }
                }
                self.postgres_config()?;
            }
        }
        Ok(())
    }

    /// Builds the `SQLite` backend config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the store is not `SQLite`, the
    /// path is missing, or the backend rejects the settings.
    pub fn sqlite_config(&self) -> Result<SqliteStoreConfig, ConfigError> {
        if self.store_type != StoreType::Sqlite {
            return Err(ConfigError::Invalid("store.type is not sqlite".to_string()));
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| ConfigError::Invalid("store.path is required for sqlite".to_string()))?;
        let config = SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            read_pool_size: self.read_pool_size,
        };
        config.validate().map_err(|err| ConfigError::Invalid(format!("store: {err}")))?;
        Ok(config)
    }

    /// Builds the Postgres backend config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the store is not Postgres, the
    /// connection string is missing, or the backend rejects the settings.
    pub fn postgres_config(&self) -> Result<PostgresStoreConfig, ConfigError> {
        if self.store_type != StoreType::Postgres {
            return Err(ConfigError::Invalid("store.type is not postgres".to_string()));
        }
        let connection = self.connection.clone().ok_or_else(|| {
            ConfigError::Invalid("store.connection is required for postgres".to_string())
        })?;
        let config = PostgresStoreConfig {
            connection,
            max_connections: self.max_connections,
            connect_timeout_ms: self.connect_timeout_ms,
            statement_timeout_ms: self.statement_timeout_ms,
            lock_timeout_ms: self.lock_timeout_ms,
        };
        config.validate().map_err(|err| ConfigError::Invalid(format!("store: {err}")))?;
        Ok(config)
    }

    /// Returns the dialect the configured backend executes.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self.store_type {
            StoreType::Sqlite => Dialect::Default,
            StoreType::Postgres => Dialect::Postgres,
        }
    }
}

/// Default busy timeout for serde.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Default read pool size for serde.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

/// Default Postgres pool size for serde.
const fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

/// Default connect timeout for serde.
const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Default statement timeout for serde.
const fn default_statement_timeout_ms() -> u64 {
    DEFAULT_STATEMENT_TIMEOUT_MS
}

/// Default lock timeout for serde.
const fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

// ============================================================================
// SECTION: Audit Config
// ============================================================================

/// Destination for committed consent events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `audit.path`.
    File,
    /// Events are discarded.
    None,
}

/// Audit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Write a history snapshot for every status or attribute change.
    #[serde(default = "default_history_snapshots")]
    pub history_snapshots: bool,
    /// Event sink type.
    #[serde(default)]
    pub sink: EventSinkType,
    /// Event log path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            history_snapshots: true,
            sink: EventSinkType::Stderr,
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates sink and path pairing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the file sink has no path or a
    /// path is set for another sink.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (EventSinkType::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for the file sink".to_string()))
            }
            (EventSinkType::File, Some(path)) => validate_path(path),
            (EventSinkType::Stderr | EventSinkType::None, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid for the file sink".to_string(),
            )),
            (EventSinkType::Stderr | EventSinkType::None, None) => Ok(()),
        }
    }
}

/// Default history snapshot flag for serde.
const fn default_history_snapshots() -> bool {
    true
}

// ============================================================================
// SECTION: Retention Config
// ============================================================================

/// Retention configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Age in seconds after which ledger and history rows move to retention.
    #[serde(default = "default_horizon_seconds")]
    pub horizon_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_seconds: DEFAULT_RETENTION_HORIZON_SECONDS,
        }
    }
}

impl RetentionConfig {
    /// Validates the horizon.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero horizon or one that does
    /// not fit a signed timestamp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_seconds == 0 {
            return Err(ConfigError::Invalid(
                "retention.horizon_seconds must be greater than zero".to_string(),
            ));
        }
        i64::try_from(self.horizon_seconds).map_err(|_| {
            ConfigError::Invalid("retention.horizon_seconds is too large".to_string())
        })?;
        Ok(())
    }

    /// Returns the purge cutoff for `now`: rows older than this move.
    #[must_use]
    pub fn cutoff(&self, now: i64) -> i64 {
        let horizon = i64::try_from(self.horizon_seconds).unwrap_or(i64::MAX);
        now.saturating_sub(horizon)
    }
}

/// Default retention horizon for serde.
const fn default_horizon_seconds() -> u64 {
    DEFAULT_RETENTION_HORIZON_SECONDS
}

// ============================================================================
// SECTION: Query Config
// ============================================================================

/// Query configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Dialect used when rendering statements without executing them.
    #[serde(default)]
    pub dialect: Option<Dialect>,
    /// Largest page a search or audit read may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            dialect: None,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl QueryConfig {
    /// Validates paging bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_page_size` is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 || self.max_page_size > MAX_PAGE_SIZE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "query.max_page_size must be between 1 and {MAX_PAGE_SIZE_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// Default max page size for serde.
const fn default_max_page_size() -> u64 {
    DEFAULT_MAX_PAGE_SIZE
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Resolves the config path from the argument, environment, or default name.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        Ok(_) => Err(ConfigError::Invalid(format!("{CONFIG_ENV_VAR} must not be empty"))),
        Err(std::env::VarError::NotPresent) => Ok(PathBuf::from(DEFAULT_CONFIG_NAME)),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(ConfigError::Invalid(format!("{CONFIG_ENV_VAR} must be utf-8")))
        }
    }
}

/// Enforces length limits on a configured path.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}
