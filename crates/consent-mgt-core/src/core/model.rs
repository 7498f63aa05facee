// consent-mgt-core/src/core/model.rs
// ============================================================================
// Module: Consent Data Model
// Description: Consent aggregate, child records, audit records, and requests.
// Purpose: Provide the serializable shapes exchanged with consent stores.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A consent owns zero or more authorization resources, each of which owns
//! zero or more account mappings, plus a free-form attribute map. The
//! [`DetailedConsentResource`] is the read-only aggregate built by the row
//! folder. History and status audit records are append-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::AuthorizationId;
use crate::core::identifiers::ConsentId;
use crate::core::identifiers::HistoryId;
use crate::core::identifiers::MappingId;
use crate::core::identifiers::StatusAuditId;
use crate::core::status::ApprovalOutcome;
use crate::core::status::AuthorizationStatus;
use crate::core::status::ConsentStatus;
use crate::core::status::MappingStatus;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Permission assigned to a bound resource when the caller gives none.
pub const DEFAULT_PERMISSION: &str = "primary";

// ============================================================================
// SECTION: Stored Records
// ============================================================================

/// Primary consent record.
///
/// # Invariants
/// - `current_status` equals the status of the latest ledger row for the consent.
/// - `validity_time == 0` means the consent never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentResource {
    /// Consent identifier.
    pub consent_id: ConsentId,
    /// Client (third-party application) identifier.
    pub client_id: String,
    /// Opaque consent receipt payload.
    pub receipt: Value,
    /// Consent type label (e.g. `accounts`, `payments`).
    pub consent_type: String,
    /// Lifecycle status. Reads report the effective status.
    pub current_status: ConsentStatus,
    /// Allowed access frequency per day.
    pub consent_frequency: i64,
    /// Expiry time in unix seconds; zero disables expiry.
    pub validity_time: i64,
    /// Whether the consent allows recurring access.
    pub recurring_indicator: bool,
    /// Creation time in unix seconds.
    pub created_time: i64,
    /// Last update time in unix seconds.
    pub updated_time: i64,
    /// Free-form attributes, empty unless requested.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// One authorization attempt for a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResource {
    /// Authorization identifier.
    pub auth_id: AuthorizationId,
    /// Owning consent (lookup only).
    pub consent_id: ConsentId,
    /// Customer that acted on the authorization, once known.
    pub user_id: Option<String>,
    /// Authorization status.
    pub auth_status: AuthorizationStatus,
    /// Authorization type label (e.g. `authorization`, `reauthorization`).
    pub auth_type: String,
    /// Last update time in unix seconds.
    pub updated_time: i64,
}

/// A resource bound to an authorization with one granted permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentMapping {
    /// Mapping identifier.
    pub mapping_id: MappingId,
    /// Owning authorization.
    pub auth_id: AuthorizationId,
    /// Bound account (or other resource) identifier.
    pub account_id: String,
    /// Granted permission.
    pub permission: String,
    /// Mapping status.
    pub mapping_status: MappingStatus,
}

/// Aggregate view of a consent with all of its children.
///
/// # Invariants
/// - `authorizations` is ordered by authorization id.
/// - `mappings` is ordered by mapping id and references only listed authorizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedConsentResource {
    /// Consent record including its attributes.
    pub consent: ConsentResource,
    /// Authorization resources.
    pub authorizations: Vec<AuthorizationResource>,
    /// Account mappings across all authorizations.
    pub mappings: Vec<ConsentMapping>,
}

impl DetailedConsentResource {
    /// Returns the authorization with the provided identifier.
    #[must_use]
    pub fn authorization(&self, auth_id: &AuthorizationId) -> Option<&AuthorizationResource> {
        self.authorizations.iter().find(|auth| &auth.auth_id == auth_id)
    }

    /// Returns the mappings bound under one authorization.
    pub fn mappings_for<'a>(
        &'a self,
        auth_id: &'a AuthorizationId,
    ) -> impl Iterator<Item = &'a ConsentMapping> + 'a {
        self.mappings.iter().filter(move |mapping| &mapping.auth_id == auth_id)
    }
}

/// Point-in-time snapshot of a consent aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentHistoryResource {
    /// History row identifier.
    pub history_id: HistoryId,
    /// Consent the snapshot belongs to.
    pub consent_id: ConsentId,
    /// Snapshot time in unix seconds.
    pub timestamp: i64,
    /// Reason recorded with the change.
    pub reason: String,
    /// Aggregate state after the change.
    pub detailed_consent: DetailedConsentResource,
    /// Previous values of the fields that changed, keyed by field name.
    pub changed_attributes: BTreeMap<String, Value>,
}

/// One row of the status-change ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentStatusAuditRecord {
    /// Ledger row identifier.
    pub status_audit_id: StatusAuditId,
    /// Consent the transition applies to.
    pub consent_id: ConsentId,
    /// Per-consent insertion sequence, starting at 1.
    pub sequence: i64,
    /// Status after the transition.
    pub current_status: ConsentStatus,
    /// Status before the transition; `None` for the creation row.
    pub previous_status: Option<ConsentStatus>,
    /// Actor responsible for the transition.
    pub action_by: String,
    /// Transition time in unix seconds.
    pub action_time: i64,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Caller-provided fields for a new consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsent {
    /// Client identifier (required).
    pub client_id: String,
    /// Consent receipt (required, non-null).
    pub receipt: Value,
    /// Consent type (required).
    pub consent_type: String,
    /// Allowed access frequency per day.
    #[serde(default)]
    pub consent_frequency: i64,
    /// Expiry time in unix seconds; zero disables expiry.
    #[serde(default)]
    pub validity_time: i64,
    /// Whether recurring access is allowed.
    #[serde(default)]
    pub recurring_indicator: bool,
    /// Initial attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl NewConsent {
    /// Creates a consent request with the required fields and neutral defaults.
    #[must_use]
    pub fn new(client_id: impl Into<String>, consent_type: impl Into<String>, receipt: Value) -> Self {
        Self {
            client_id: client_id.into(),
            receipt,
            consent_type: consent_type.into(),
            consent_frequency: 0,
            validity_time: 0,
            recurring_indicator: false,
            attributes: BTreeMap::new(),
        }
    }
}

/// Caller-provided fields for a new authorization resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuthorization {
    /// Pre-assigned identifier; minted when absent.
    #[serde(default)]
    pub auth_id: Option<AuthorizationId>,
    /// Customer identifier when already known.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Request to create a consent together with its first authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizableConsentRequest {
    /// Consent fields.
    pub consent: NewConsent,
    /// Authorization fields; `None` creates no authorization unless ids are generated.
    #[serde(default)]
    pub authorization: Option<NewAuthorization>,
    /// Status of the initial authorization.
    pub initial_auth_status: AuthorizationStatus,
    /// Authorization type label.
    pub auth_type: String,
    /// Mint a new authorization id instead of using the caller's.
    pub generate_auth_id: bool,
}

/// A resource to bind with its permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePermission {
    /// Account (or other resource) identifier.
    pub account_id: String,
    /// Granted permission.
    pub permission: String,
}

impl ResourcePermission {
    /// Binds an account with the default permission.
    #[must_use]
    pub fn primary(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            permission: DEFAULT_PERMISSION.to_string(),
        }
    }
}

/// Request to record a customer's decision and bind resources to a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindResourcesRequest {
    /// Consent to bind to.
    pub consent_id: ConsentId,
    /// Authorization carrying the decision.
    pub auth_id: AuthorizationId,
    /// Customer that made the decision.
    pub user_id: String,
    /// Resources to bind.
    pub resources: Vec<ResourcePermission>,
    /// Authorization status to record.
    pub auth_status: AuthorizationStatus,
    /// Consent status to transition to.
    pub consent_status: ConsentStatus,
    /// Actor recorded in the ledger.
    pub actor: String,
    /// Optional ledger reason.
    #[serde(default)]
    pub reason: Option<String>,
}

impl BindResourcesRequest {
    /// Builds a bind request from an approval decision.
    #[must_use]
    pub fn from_approval(
        consent_id: ConsentId,
        auth_id: AuthorizationId,
        user_id: impl Into<String>,
        resources: Vec<ResourcePermission>,
        approved: bool,
    ) -> Self {
        let outcome = ApprovalOutcome::from_approval(approved);
        let user_id = user_id.into();
        Self {
            consent_id,
            auth_id,
            actor: user_id.clone(),
            user_id,
            resources,
            auth_status: outcome.auth_status,
            consent_status: outcome.consent_status,
            reason: None,
        }
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Consent search filters.
///
/// Empty filter lists do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSearchQuery {
    /// Consent ids to match.
    #[serde(default)]
    pub consent_ids: Vec<ConsentId>,
    /// Client ids to match.
    #[serde(default)]
    pub client_ids: Vec<String>,
    /// Consent types to match.
    #[serde(default)]
    pub consent_types: Vec<String>,
    /// Consent statuses to match, as reads report them at query time.
    #[serde(default)]
    pub consent_statuses: Vec<ConsentStatus>,
    /// Only consents with an authorization for this user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Inclusive lower bound on `updatedTime`.
    #[serde(default)]
    pub from_time: Option<i64>,
    /// Inclusive upper bound on `updatedTime`.
    #[serde(default)]
    pub to_time: Option<i64>,
    /// Maximum number of consents.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Consents to skip; ignored without `limit`.
    #[serde(default)]
    pub offset: Option<u64>,
}

/// Which ledger or history tables a read targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    /// Live tables only.
    #[default]
    Active,
    /// Retention tables only.
    Retention,
    /// Live and retention tables.
    All,
}

/// Status audit ledger query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAuditQuery {
    /// Consents to read; empty reads all.
    #[serde(default)]
    pub consent_ids: Vec<ConsentId>,
    /// Tables to read.
    #[serde(default)]
    pub source: AuditSource,
    /// Maximum number of rows.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Rows to skip; ignored without `limit`.
    #[serde(default)]
    pub offset: Option<u64>,
}
