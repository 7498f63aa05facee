// crates/consent-mgt-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Consent Schema
// Description: Table definitions for live and retention consent tables.
// Purpose: Create and version the SQLite schema the consent statements target.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Six live tables hold consents, authorizations, mappings, attributes, the
//! status ledger, and history snapshots. Each has a `RET_` twin without
//! foreign keys so purged rows keep their shape. The schema version lives in
//! `store_meta`; an unknown version refuses to open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqliteStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the consent store.
pub const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// SECTION: Table Definitions
// ============================================================================

/// Renders the six consent tables with `prefix`, optionally with foreign keys.
fn table_ddl(prefix: &str, foreign_keys: bool) -> String {
    let consent_fk = if foreign_keys {
        format!(",\n    FOREIGN KEY (CONSENT_ID) REFERENCES {prefix}OB_CONSENT(CONSENT_ID)")
    } else {
        String::new()
    };
    let auth_fk = if foreign_keys {
        format!(",\n    FOREIGN KEY (AUTH_ID) REFERENCES {prefix}OB_CONSENT_AUTH_RESOURCE(AUTH_ID)")
    } else {
        String::new()
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT (
    CONSENT_ID TEXT NOT NULL PRIMARY KEY,
    RECEIPT TEXT NOT NULL,
    CREATED_TIME INTEGER NOT NULL,
    UPDATED_TIME INTEGER NOT NULL,
    CLIENT_ID TEXT NOT NULL,
    CONSENT_TYPE TEXT NOT NULL,
    CURRENT_STATUS TEXT NOT NULL,
    CONSENT_FREQUENCY INTEGER NOT NULL,
    VALIDITY_TIME INTEGER NOT NULL,
    RECURRING_INDICATOR INTEGER NOT NULL,
    VERSION INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_AUTH_RESOURCE (
    AUTH_ID TEXT NOT NULL PRIMARY KEY,
    CONSENT_ID TEXT NOT NULL,
    USER_ID TEXT,
    AUTH_STATUS TEXT NOT NULL,
    AUTH_TYPE TEXT NOT NULL,
    UPDATED_TIME INTEGER NOT NULL{consent_fk}
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_MAPPING (
    MAPPING_ID TEXT NOT NULL PRIMARY KEY,
    AUTH_ID TEXT NOT NULL,
    ACCOUNT_ID TEXT NOT NULL,
    PERMISSION TEXT NOT NULL,
    MAPPING_STATUS TEXT NOT NULL{auth_fk}
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_ATTRIBUTE (
    CONSENT_ID TEXT NOT NULL,
    ATT_KEY TEXT NOT NULL,
    ATT_VALUE TEXT,
    PRIMARY KEY (CONSENT_ID, ATT_KEY){consent_fk}
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_STATUS_AUDIT (
    STATUS_AUDIT_ID TEXT NOT NULL PRIMARY KEY,
    CONSENT_ID TEXT NOT NULL,
    AUDIT_SEQ INTEGER NOT NULL,
    CURRENT_STATUS TEXT NOT NULL,
    PREVIOUS_STATUS TEXT,
    ACTION_BY TEXT NOT NULL,
    ACTION_TIME INTEGER NOT NULL,
    REASON TEXT,
    UNIQUE (CONSENT_ID, AUDIT_SEQ)
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_HISTORY (
    HISTORY_ID TEXT NOT NULL PRIMARY KEY,
    CONSENT_ID TEXT NOT NULL,
    EFFECTIVE_TIMESTAMP INTEGER NOT NULL,
    REASON TEXT NOT NULL,
    DETAILED_CONSENT TEXT NOT NULL,
    CHANGED_VALUES TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS IDX_{prefix}CONSENT_UPDATED ON {prefix}OB_CONSENT (UPDATED_TIME);
CREATE INDEX IF NOT EXISTS IDX_{prefix}AUTH_CONSENT ON {prefix}OB_CONSENT_AUTH_RESOURCE (CONSENT_ID);
CREATE INDEX IF NOT EXISTS IDX_{prefix}AUTH_USER ON {prefix}OB_CONSENT_AUTH_RESOURCE (USER_ID);
CREATE INDEX IF NOT EXISTS IDX_{prefix}MAPPING_AUTH ON {prefix}OB_CONSENT_MAPPING (AUTH_ID);
CREATE INDEX IF NOT EXISTS IDX_{prefix}AUDIT_TIME ON {prefix}OB_CONSENT_STATUS_AUDIT (ACTION_TIME);
CREATE INDEX IF NOT EXISTS IDX_{prefix}HISTORY_CONSENT ON {prefix}OB_CONSENT_HISTORY (CONSENT_ID, EFFECTIVE_TIMESTAMP);
"
    )
}

// ============================================================================
// SECTION: Initialization
// ============================================================================

/// Creates the schema on an empty database or validates an existing version.
///
/// # Errors
///
/// Returns [`SqliteStoreError::VersionMismatch`] for an unknown schema version
/// and [`SqliteStoreError::Db`] when a statement fails.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(&table_ddl("", true))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(&table_ddl("RET_", false))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}
