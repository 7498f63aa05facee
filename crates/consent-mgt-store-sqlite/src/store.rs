// crates/consent-mgt-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Consent Backend
// Description: SqlBackend implementation backed by SQLite WAL.
// Purpose: Execute consent statements with transactional write serialization.
// Dependencies: consent-mgt-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteConsentBackend`] opens one writer connection and a round-robin
//! pool of reader connections on the same database file. Write transactions
//! start with `BEGIN IMMEDIATE`, so the row lock the consent store asks for is
//! the database write lock taken up front. Busy and locked engine states map
//! to [`BackendError::Transient`]; unique and primary key violations map to
//! [`BackendError::Conflict`].
//! Security posture: database contents are untrusted; cells of unexpected
//! storage class fail closed as corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use consent_mgt_core::BackendError;
use consent_mgt_core::BoundQuery;
use consent_mgt_core::ConsentError;
use consent_mgt_core::Dialect;
use consent_mgt_core::SqlBackend;
use consent_mgt_core::SqlCell;
use consent_mgt_core::SqlRow;
use consent_mgt_core::SqlTransaction;
use consent_mgt_core::SqlValue;
use consent_mgt_core::TransactionMode;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::ffi;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::schema::initialize_schema;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of reader connections.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Maximum number of reader connections.
const MAX_READ_POOL_SIZE: usize = 64;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Sleep between attempts to acquire a busy connection.
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(2);

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// `SQLite` synchronous mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Configuration for the `SQLite` consent backend.
///
/// # Invariants
/// - `busy_timeout_ms` bounds both engine busy waits and connection acquisition.
/// - `read_pool_size` is between 1 and 64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// Synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of reader connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default tuning.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }

    /// Validates path safety and pool bounds.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a limit is violated.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        validate_store_path(&self.path)?;
        if self.read_pool_size == 0 || self.read_pool_size > MAX_READ_POOL_SIZE {
            return Err(SqliteStoreError::Invalid(format!(
                "read_pool_size must be between 1 and {MAX_READ_POOL_SIZE}"
            )));
        }
        Ok(())
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

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors raised while opening the backend.
///
/// # Invariants
/// - Error messages avoid embedding consent payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid configuration.
    #[error("sqlite store invalid config: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for ConsentError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// `SQLite`-backed consent storage.
///
/// # Invariants
/// - At most one write transaction is open at a time.
/// - Every connection has foreign keys enabled and the schema at [`crate::SCHEMA_VERSION`].
pub struct SqliteConsentBackend {
    /// Backend configuration.
    config: SqliteStoreConfig,
    /// Writer connection guarded by a mutex.
    write_connection: Mutex<Connection>,
    /// Reader connections used for read path isolation under WAL.
    read_connections: Vec<Mutex<Connection>>,
    /// Round-robin cursor for reader selection.
    read_cursor: AtomicUsize,
}

impl SqliteConsentBackend {
    /// Opens the database, creating the file and schema when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the configuration is invalid or the
    /// database cannot be opened or initialized.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let mut write_connection = open_connection(&config)?;
        initialize_schema(&mut write_connection)?;
        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            let mut read_connection = open_connection(&config)?;
            initialize_schema(&mut read_connection)?;
            read_connections.push(Mutex::new(read_connection));
        }
        Ok(Self {
            config,
            write_connection: Mutex::new(write_connection),
            read_connections,
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the backend configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Verifies a reader can execute a trivial statement.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when no reader is available or the query fails.
    pub fn readiness(&self) -> Result<(), BackendError> {
        let guard = acquire(self.read_connection(), self.busy_timeout())?;
        guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(map_sqlite_error)?;
        Ok(())
    }

    /// Busy timeout as a duration.
    const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.config.busy_timeout_ms)
    }

    /// Selects the next reader in round-robin order.
    fn read_connection(&self) -> &Mutex<Connection> {
        let len = self.read_connections.len().max(1);
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % len;
        self.read_connections.get(index).unwrap_or(&self.write_connection)
    }
}

impl SqlBackend for SqliteConsentBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Default
    }

    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn SqlTransaction + '_>, BackendError> {
        let (connection, begin) = match mode {
            TransactionMode::Write => (&self.write_connection, "BEGIN IMMEDIATE"),
            TransactionMode::Read => (self.read_connection(), "BEGIN DEFERRED"),
        };
        let guard = acquire(connection, self.busy_timeout())?;
        recover_open_transaction(&guard)?;
        guard.execute_batch(begin).map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteTransaction {
            connection: guard,
            finished: false,
        }))
    }
}

// ============================================================================
// SECTION: Transaction
// ============================================================================

/// An open `SQLite` transaction holding its connection.
struct SqliteTransaction<'a> {
    /// Connection the transaction runs on.
    connection: MutexGuard<'a, Connection>,
    /// True once committed.
    finished: bool,
}

impl SqlTransaction for SqliteTransaction<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Default
    }

    fn execute(&mut self, query: &BoundQuery) -> Result<u64, BackendError> {
        let mut statement = self.connection.prepare_cached(&query.sql).map_err(map_sqlite_error)?;
        let changed =
            statement.execute(params_from_iter(bind_values(&query.params))).map_err(map_sqlite_error)?;
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }

    fn query(&mut self, query: &BoundQuery) -> Result<Vec<SqlRow>, BackendError> {
        let mut statement = self.connection.prepare_cached(&query.sql).map_err(map_sqlite_error)?;
        let column_count = statement.column_count();
        let mut rows =
            statement.query(params_from_iter(bind_values(&query.params))).map_err(map_sqlite_error)?;
        let mut output = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut cells = Vec::with_capacity(column_count);
            for index in 0 .. column_count {
                let value = row.get_ref(index).map_err(map_sqlite_error)?;
                cells.push(read_cell(value, index)?);
            }
            output.push(SqlRow::new(cells));
        }
        Ok(output)
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        self.connection.execute_batch("COMMIT").map_err(map_sqlite_error)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // A failed rollback leaves the connection inside the transaction;
            // the next `begin` on it rolls back before starting over.
            let _ = self.connection.execute_batch("ROLLBACK");
        }
    }
}

/// Rolls back a transaction an earlier holder of `connection` left open.
fn recover_open_transaction(connection: &Connection) -> Result<(), BackendError> {
    if connection.is_autocommit() {
        return Ok(());
    }
    connection.execute_batch("ROLLBACK").map_err(map_sqlite_error)
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

/// Converts bind values to `SQLite` values.
fn bind_values(params: &[SqlValue]) -> impl Iterator<Item = Value> + '_ {
    params.iter().map(|param| match param {
        SqlValue::Integer(Some(value)) => Value::Integer(*value),
        SqlValue::Text(Some(value)) => Value::Text(value.clone()),
        SqlValue::Integer(None) | SqlValue::Text(None) => Value::Null,
    })
}

/// Converts one result cell, rejecting storage classes the store never writes.
fn read_cell(value: ValueRef<'_>, index: usize) -> Result<SqlCell, BackendError> {
    match value {
        ValueRef::Null => Ok(SqlCell::Null),
        ValueRef::Integer(value) => Ok(SqlCell::Integer(value)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| SqlCell::Text(text.to_string()))
            .map_err(|_| BackendError::Corrupt(format!("column {index} is not valid utf-8"))),
        ValueRef::Real(_) | ValueRef::Blob(_) => {
            Err(BackendError::Corrupt(format!("column {index} has an unexpected storage class")))
        }
    }
}

/// Classifies an engine error.
fn map_sqlite_error(error: rusqlite::Error) -> BackendError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return BackendError::Transient(error.to_string());
            }
            ErrorCode::ConstraintViolation
                if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                return BackendError::Conflict(error.to_string());
            }
            _ => {}
        }
    }
    BackendError::Db(error.to_string())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Acquires a connection, waiting at most `timeout`.
fn acquire(
    connection: &Mutex<Connection>,
    timeout: Duration,
) -> Result<MutexGuard<'_, Connection>, BackendError> {
    let deadline = Instant::now() + timeout;
    loop {
        match connection.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(_)) => {
                return Err(BackendError::Db("sqlite connection mutex poisoned".to_string()));
            }
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(BackendError::Transient(
                        "timed out waiting for a sqlite connection".to_string(),
                    ));
                }
                thread::sleep(CONNECTION_POLL_INTERVAL);
            }
        }
    }
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durability pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability and integrity.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]
mod tests {
    use consent_mgt_core::SqlBackend;
    use consent_mgt_core::SqlTransaction;
    use consent_mgt_core::TransactionMode;
    use tempfile::TempDir;

    use super::SqliteConsentBackend;
    use super::SqliteStoreConfig;

    #[test]
    fn begin_recovers_connection_left_inside_a_transaction() {
        let dir = TempDir::new().unwrap();
        let backend =
            SqliteConsentBackend::open(SqliteStoreConfig::new(dir.path().join("consent.db"))).unwrap();
        {
            let connection = backend.write_connection.lock().unwrap();
            connection.execute_batch("BEGIN IMMEDIATE").unwrap();
            assert!(!connection.is_autocommit());
        }
        let tx = backend.begin(TransactionMode::Write).unwrap();
        tx.commit().unwrap();
        assert!(backend.write_connection.lock().unwrap().is_autocommit());
        drop(backend.begin(TransactionMode::Write).unwrap());
        assert!(backend.write_connection.lock().unwrap().is_autocommit());
    }
}
