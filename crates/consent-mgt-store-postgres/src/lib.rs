// crates/consent-mgt-store-postgres/src/lib.rs
// ============================================================================
// Module: Consent Postgres Store
// Description: Postgres engine for the consent backend contract.
// Purpose: Run consent transactions against a pooled Postgres database.
// Dependencies: consent-mgt-core, postgres, r2d2
// ============================================================================

//! ## Overview
//! [`PostgresConsentBackend`] implements [`consent_mgt_core::SqlBackend`] for
//! the Postgres profile. Each transaction checks a connection out of an r2d2
//! pool and returns it when committed or dropped.

pub mod schema;
pub mod store;

pub use schema::SCHEMA_VERSION;
pub use store::PostgresConsentBackend;
pub use store::PostgresStoreConfig;
pub use store::PostgresStoreError;
