// consent-mgt-core/src/core/status.rs
// ============================================================================
// Module: Consent Status Model
// Description: Consent, authorization, and mapping status labels.
// Purpose: Define the lifecycle states and the legal transition table.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Statuses are stored as stable upper-case labels for consents and
//! authorizations and lower-case labels for mappings. The transition table
//! lives here so every caller (store, sweep, CLI) consults the same rules.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Consent Status
// ============================================================================

/// Consent lifecycle state.
///
/// # Invariants
/// - `CREATED` is the only initial state.
/// - `REVOKED` and `EXPIRED` are terminal.
/// - Self-transitions are never legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    /// Consent stored, no authorization attempt yet.
    Created,
    /// An authorization resource exists and awaits the customer's decision.
    AwaitingAuthorization,
    /// Customer approved the consent.
    Authorized,
    /// Customer rejected the consent.
    Rejected,
    /// Consent withdrawn after a decision.
    Revoked,
    /// Validity window elapsed.
    Expired,
}

impl ConsentStatus {
    /// All consent states in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::AwaitingAuthorization,
        Self::Authorized,
        Self::Rejected,
        Self::Revoked,
        Self::Expired,
    ];

    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::AwaitingAuthorization => "AWAITING_AUTHORIZATION",
            Self::Authorized => "AUTHORIZED",
            Self::Rejected => "REJECTED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }

    /// Returns true when no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }

    /// Returns true when `target` is reachable from this state in one step.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Created => matches!(target, Self::AwaitingAuthorization | Self::Expired),
            Self::AwaitingAuthorization => {
                matches!(target, Self::Authorized | Self::Rejected | Self::Expired)
            }
            Self::Authorized | Self::Rejected => matches!(target, Self::Revoked | Self::Expired),
            Self::Revoked | Self::Expired => false,
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Authorization Status
// ============================================================================

/// Status of one authorization attempt.
///
/// # Invariants
/// - `CREATED` moves to exactly one of `AUTHORIZED` or `REJECTED`, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    /// Authorization attempt opened.
    Created,
    /// Customer approved.
    Authorized,
    /// Customer rejected.
    Rejected,
}

impl AuthorizationStatus {
    /// All authorization states.
    pub const ALL: [Self; 3] = [Self::Created, Self::Authorized, Self::Rejected];

    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Authorized => "AUTHORIZED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }

    /// Returns true when `target` is reachable from this state in one step.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!((self, target), (Self::Created, Self::Authorized | Self::Rejected))
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Mapping Status
// ============================================================================

/// Status of a bound resource mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Mapping grants access.
    Active,
    /// Mapping was deactivated (revocation).
    Inactive,
}

impl MappingStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Approval Mapping
// ============================================================================

/// Status pair applied when a customer approves or rejects an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// Status written to the authorization resource.
    pub auth_status: AuthorizationStatus,
    /// Status the consent transitions to.
    pub consent_status: ConsentStatus,
}

impl ApprovalOutcome {
    /// Maps an approval flag to its (authorization, consent) status pair.
    #[must_use]
    pub const fn from_approval(approved: bool) -> Self {
        if approved {
            Self {
                auth_status: AuthorizationStatus::Authorized,
                consent_status: ConsentStatus::Authorized,
            }
        } else {
            Self {
                auth_status: AuthorizationStatus::Rejected,
                consent_status: ConsentStatus::Rejected,
            }
        }
    }
}
