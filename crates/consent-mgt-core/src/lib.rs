// consent-mgt-core/src/lib.rs
// ============================================================================
// Module: Consent Management Core Library
// Description: Public API surface for the consent persistence engine.
// Purpose: Expose consent types, storage interfaces, SQL builders, and runtime services.
// Dependencies: crate::{core, interfaces, query, runtime}
// ============================================================================

//! ## Overview
//! Consent management core stores open-banking consents together with their
//! authorization resources, account mappings, and attributes. It enforces the
//! consent lifecycle, renders dialect-specific SQL, folds aggregated result rows
//! back into nested consent views, and records every status change to an
//! append-only ledger. Storage engines plug in through [`SqlBackend`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod query;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::*;

pub use interfaces::BackendError;
pub use interfaces::ConsentError;
pub use interfaces::ConsentEvent;
pub use interfaces::ConsentEventSink;
pub use interfaces::SqlBackend;
pub use interfaces::SqlCell;
pub use interfaces::SqlRow;
pub use interfaces::SqlTransaction;
pub use interfaces::TransactionMode;
pub use interfaces::run_in_transaction;
pub use query::BoundQuery;
pub use query::Dialect;
pub use query::Pagination;
pub use query::SqlValue;
pub use query::TableSet;
pub use runtime::AggregateRow;
pub use runtime::AuditTrailRecorder;
pub use runtime::ConsentSearchService;
pub use runtime::ConsentStore;
pub use runtime::ConsentStoreOptions;
pub use runtime::FileEventSink;
pub use runtime::LifecycleStateMachine;
pub use runtime::NoopEventSink;
pub use runtime::RetentionSummary;
pub use runtime::SkippedConsent;
pub use runtime::StderrEventSink;
pub use runtime::SweepSummary;
pub use runtime::fold_rows;
