// crates/consent-mgt-store-postgres/src/schema.rs
// ============================================================================
// Module: Postgres Consent Schema
// Description: Table definitions for live and retention consent tables.
// Purpose: Create and version the Postgres schema the consent statements target.
// Dependencies: postgres
// ============================================================================

//! ## Overview
//! Mirrors the `SQLite` layout with `BIGINT` integers so every integer bind
//! is an `INT8`. Retention twins carry the `RET_` prefix and no foreign keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;

use crate::store::PostgresStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Postgres schema version for the consent store.
pub const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// SECTION: Table Definitions
// ============================================================================

/// Renders the six consent tables with `prefix`, optionally with foreign keys.
#[must_use]
pub fn table_ddl(prefix: &str, foreign_keys: bool) -> String {
    let consent_ref = if foreign_keys {
        format!(" REFERENCES {prefix}OB_CONSENT(CONSENT_ID)")
    } else {
        String::new()
    };
    let auth_ref = if foreign_keys {
        format!(" REFERENCES {prefix}OB_CONSENT_AUTH_RESOURCE(AUTH_ID)")
    } else {
        String::new()
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT (
    CONSENT_ID VARCHAR(255) NOT NULL PRIMARY KEY,
    RECEIPT TEXT NOT NULL,
    CREATED_TIME BIGINT NOT NULL,
    UPDATED_TIME BIGINT NOT NULL,
    CLIENT_ID VARCHAR(255) NOT NULL,
    CONSENT_TYPE VARCHAR(64) NOT NULL,
    CURRENT_STATUS VARCHAR(64) NOT NULL,
    CONSENT_FREQUENCY BIGINT NOT NULL,
    VALIDITY_TIME BIGINT NOT NULL,
    RECURRING_INDICATOR BIGINT NOT NULL,
    VERSION BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_AUTH_RESOURCE (
    AUTH_ID VARCHAR(255) NOT NULL PRIMARY KEY,
    CONSENT_ID VARCHAR(255) NOT NULL{consent_ref},
    USER_ID VARCHAR(255),
    AUTH_STATUS VARCHAR(64) NOT NULL,
    AUTH_TYPE VARCHAR(64) NOT NULL,
    UPDATED_TIME BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_MAPPING (
    MAPPING_ID VARCHAR(255) NOT NULL PRIMARY KEY,
    AUTH_ID VARCHAR(255) NOT NULL{auth_ref},
    ACCOUNT_ID VARCHAR(255) NOT NULL,
    PERMISSION VARCHAR(64) NOT NULL,
    MAPPING_STATUS VARCHAR(64) NOT NULL
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_ATTRIBUTE (
    CONSENT_ID VARCHAR(255) NOT NULL{consent_ref},
    ATT_KEY VARCHAR(255) NOT NULL,
    ATT_VALUE TEXT,
    PRIMARY KEY (CONSENT_ID, ATT_KEY)
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_STATUS_AUDIT (
    STATUS_AUDIT_ID VARCHAR(255) NOT NULL PRIMARY KEY,
    CONSENT_ID VARCHAR(255) NOT NULL,
    AUDIT_SEQ BIGINT NOT NULL,
    CURRENT_STATUS VARCHAR(64) NOT NULL,
    PREVIOUS_STATUS VARCHAR(64),
    ACTION_BY VARCHAR(255) NOT NULL,
    ACTION_TIME BIGINT NOT NULL,
    REASON TEXT,
    UNIQUE (CONSENT_ID, AUDIT_SEQ)
);
CREATE TABLE IF NOT EXISTS {prefix}OB_CONSENT_HISTORY (
    HISTORY_ID VARCHAR(255) NOT NULL PRIMARY KEY,
    CONSENT_ID VARCHAR(255) NOT NULL,
    EFFECTIVE_TIMESTAMP BIGINT NOT NULL,
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
// SECTION: Migration
// ============================================================================

/// Creates the schema on an empty database or validates an existing version.
///
/// # Errors
///
/// Returns [`PostgresStoreError::VersionMismatch`] for an unknown schema
/// version and [`PostgresStoreError::Postgres`] when a statement fails.
pub fn migrate(client: &mut Client) -> Result<(), PostgresStoreError> {
    let mut tx = client.transaction().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    tx.batch_execute(
        "CREATE TABLE IF NOT EXISTS CONSENT_STORE_META (VERSION BIGINT NOT NULL); LOCK TABLE \
         CONSENT_STORE_META IN EXCLUSIVE MODE;",
    )
    .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    let version: Option<i64> = tx
        .query_opt("SELECT VERSION FROM CONSENT_STORE_META LIMIT 1", &[])
        .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?
        .map(|row| row.try_get(0))
        .transpose()
        .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO CONSENT_STORE_META (VERSION) VALUES ($1)", &[&SCHEMA_VERSION])
                .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
            tx.batch_execute(&table_ddl("", true))
                .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
            tx.batch_execute(&table_ddl("RET_", false))
                .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(PostgresStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
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
    use super::table_ddl;

    #[test]
    fn retention_tables_have_no_foreign_keys() {
        let ddl = table_ddl("RET_", false);
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS RET_OB_CONSENT_STATUS_AUDIT"));
        assert!(!ddl.contains("REFERENCES"));
    }

    #[test]
    fn live_tables_reference_their_parents() {
        let ddl = table_ddl("", true);
        assert!(ddl.contains("CONSENT_ID VARCHAR(255) NOT NULL REFERENCES OB_CONSENT(CONSENT_ID)"));
        assert!(ddl.contains("AUTH_ID VARCHAR(255) NOT NULL REFERENCES OB_CONSENT_AUTH_RESOURCE(AUTH_ID)"));
        assert!(!ddl.contains(" INTEGER "));
    }
}
