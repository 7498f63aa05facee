// consent-mgt-core/src/core/mod.rs
// ============================================================================
// Module: Consent Core Types
// Description: Canonical consent records, identifiers, statuses, and time values.
// Purpose: Provide stable, serializable types shared by stores and callers.
// Dependencies: serde, serde_json, time, uuid
// ============================================================================

//! ## Overview
//! Core types define the consent aggregate and its children. These types are
//! the canonical source of truth for any derived surface (CLI output, admin
//! APIs, audit payloads).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod model;
pub mod status;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::AuthorizationId;
pub use identifiers::ConsentId;
pub use identifiers::HistoryId;
pub use identifiers::MappingId;
pub use identifiers::StatusAuditId;
pub use model::AuditSource;
pub use model::AuthorizableConsentRequest;
pub use model::AuthorizationResource;
pub use model::BindResourcesRequest;
pub use model::ConsentHistoryResource;
pub use model::ConsentMapping;
pub use model::ConsentResource;
pub use model::ConsentSearchQuery;
pub use model::ConsentStatusAuditRecord;
pub use model::DEFAULT_PERMISSION;
pub use model::DetailedConsentResource;
pub use model::NewAuthorization;
pub use model::NewConsent;
pub use model::ResourcePermission;
pub use model::StatusAuditQuery;
pub use status::ApprovalOutcome;
pub use status::AuthorizationStatus;
pub use status::ConsentStatus;
pub use status::MappingStatus;
pub use time::Clock;
pub use time::FixedClock;
pub use time::SystemClock;
