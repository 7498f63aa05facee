// consent-mgt-core/src/core/identifiers.rs
// ============================================================================
// Module: Consent Identifiers
// Description: Opaque identifiers for consents and their child records.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Identifiers are opaque strings. Store-minted identifiers are random v4
//! UUIDs, so they are globally unique and never reused. Caller-supplied
//! identifiers (pre-assigned authorization ids) are accepted as-is; their
//! uniqueness is the caller's responsibility and is enforced by primary keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Declares a string-backed identifier newtype.
macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mints a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_identifier!(
    /// Consent identifier.
    ConsentId
);

string_identifier!(
    /// Authorization resource identifier.
    AuthorizationId
);

string_identifier!(
    /// Consent mapping identifier.
    MappingId
);

string_identifier!(
    /// Status audit ledger row identifier.
    StatusAuditId
);

string_identifier!(
    /// Consent history snapshot identifier.
    HistoryId
);
