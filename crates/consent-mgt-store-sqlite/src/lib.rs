// crates/consent-mgt-store-sqlite/src/lib.rs
// ============================================================================
// Module: Consent SQLite Store
// Description: SQLite engine for the consent backend contract.
// Purpose: Run consent transactions against a local SQLite database.
// Dependencies: consent-mgt-core, rusqlite
// ============================================================================

//! ## Overview
//! [`SqliteConsentBackend`] implements [`consent_mgt_core::SqlBackend`] for
//! the default SQL profile. Writes serialize on one connection that takes the
//! database write lock when a transaction begins; reads rotate over a small
//! pool of WAL readers.

pub mod schema;
pub mod store;

pub use schema::SCHEMA_VERSION;
pub use store::SqliteConsentBackend;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
