// consent-mgt-core/src/runtime/mod.rs
// ============================================================================
// Module: Consent Runtime
// Description: Store, lifecycle, audit, search, and row folding services.
// Purpose: Execute consent operations over a pluggable SQL backend.
// Dependencies: crate::{core, interfaces, query}
// ============================================================================

//! ## Overview
//! Runtime services sit between callers and a [`crate::SqlBackend`].
//! [`ConsentStore`] owns every write; [`ConsentSearchService`] serves
//! listings; [`AuditTrailRecorder`] appends ledger and history rows inside the
//! caller's transaction.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod events;
pub mod folder;
pub mod lifecycle;
pub mod search;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditTrailRecorder;
pub use audit::RetentionSummary;
pub use audit::StatusChange;
pub use events::FileEventSink;
pub use events::NoopEventSink;
pub use events::StderrEventSink;
pub use folder::AggregateRow;
pub use folder::fold_rows;
pub use lifecycle::LifecycleStateMachine;
pub use search::ConsentSearchService;
pub use store::ConsentStore;
pub use store::ConsentStoreOptions;
pub use store::EXPIRY_REASON;
pub use store::SYSTEM_ACTOR;
pub use store::SkippedConsent;
pub use store::SweepSummary;
