// crates/consent-mgt-config/src/lib.rs
// ============================================================================
// Module: Consent Management Config Library
// Description: TOML configuration model, loading, and validation.
// Purpose: Give every entry point one fail-closed view of deployment settings.
// Dependencies: consent-mgt-core, consent-mgt-store-sqlite, consent-mgt-store-postgres, serde, toml
// ============================================================================

//! ## Overview
//! [`ConsentMgtConfig`] is loaded from TOML with strict path and size limits
//! and rejects unknown fields. Backend settings convert into the store
//! crates' own config types so no setting is duplicated.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::ConsentMgtConfig;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::EventSinkType;
pub use config::QueryConfig;
pub use config::RetentionConfig;
pub use config::StoreConfig;
pub use config::StoreType;
