// consent-mgt-core/src/runtime/folder.rs
// ============================================================================
// Module: Row Folder
// Description: Decodes aggregated consent rows into nested consent views.
// Purpose: Rebuild authorization, mapping, and attribute sequences without loss.
// Dependencies: crate::{core, interfaces, query}, serde_json
// ============================================================================

//! ## Overview
//! Aggregated child columns arrive as `||`-joined strings. Columns of the
//! same child group are split and zipped by position, so every column in a
//! group must yield the same number of tokens; any difference is reported as
//! [`ConsentError::Aggregation`] instead of silently shifting values. A token
//! that begins or ends with `|` can only come from a split in the wrong place,
//! so it fails the same way. A NULL column means the consent has no children
//! in that group.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::core::identifiers::AuthorizationId;
use crate::core::identifiers::ConsentId;
use crate::core::identifiers::MappingId;
use crate::core::model::AuthorizationResource;
use crate::core::model::ConsentMapping;
use crate::core::model::ConsentResource;
use crate::core::model::DetailedConsentResource;
use crate::core::status::AuthorizationStatus;
use crate::core::status::ConsentStatus;
use crate::core::status::MappingStatus;
use crate::interfaces::BackendError;
use crate::interfaces::ConsentError;
use crate::interfaces::SqlRow;
use crate::query::AGGREGATE_DELIMITER;

// ============================================================================
// SECTION: Aggregate Row
// ============================================================================

/// One row of the aggregation select, in
/// [`AGGREGATE_COLUMNS`](crate::query::statements::AGGREGATE_COLUMNS) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateRow {
    /// Consent identifier.
    pub consent_id: String,
    /// Receipt JSON text.
    pub receipt: String,
    /// Creation time.
    pub created_time: i64,
    /// Update time.
    pub updated_time: i64,
    /// Client identifier.
    pub client_id: String,
    /// Consent type.
    pub consent_type: String,
    /// Stored status label.
    pub current_status: String,
    /// Access frequency.
    pub consent_frequency: i64,
    /// Expiry time.
    pub validity_time: i64,
    /// Recurring flag (0 or 1).
    pub recurring_indicator: i64,
    /// Attribute keys.
    pub att_key: Option<String>,
    /// Attribute values, marker-encoded.
    pub att_value: Option<String>,
    /// Authorization ids.
    pub auth_id: Option<String>,
    /// Authorization statuses.
    pub auth_status: Option<String>,
    /// Authorization types.
    pub auth_type: Option<String>,
    /// Authorization update times.
    pub auth_updated_time: Option<String>,
    /// Authorization user ids, marker-encoded.
    pub user_id: Option<String>,
    /// Mapping ids.
    pub mapping_id: Option<String>,
    /// Mapping authorization ids.
    pub mapping_auth_id: Option<String>,
    /// Mapped account ids.
    pub account_id: Option<String>,
    /// Mapping permissions.
    pub permission: Option<String>,
    /// Mapping statuses.
    pub mapping_status: Option<String>,
}

impl AggregateRow {
    /// Decodes a backend row by column position.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when a column is missing or mistyped.
    pub fn from_row(row: &SqlRow) -> Result<Self, BackendError> {
        Ok(Self {
            consent_id: row.text(0)?,
            receipt: row.text(1)?,
            created_time: row.integer(2)?,
            updated_time: row.integer(3)?,
            client_id: row.text(4)?,
            consent_type: row.text(5)?,
            current_status: row.text(6)?,
            consent_frequency: row.integer(7)?,
            validity_time: row.integer(8)?,
            recurring_indicator: row.integer(9)?,
            att_key: row.opt_text(10)?,
            att_value: row.opt_text(11)?,
            auth_id: row.opt_text(12)?,
            auth_status: row.opt_text(13)?,
            auth_type: row.opt_text(14)?,
            auth_updated_time: row.opt_text(15)?,
            user_id: row.opt_text(16)?,
            mapping_id: row.opt_text(17)?,
            mapping_auth_id: row.opt_text(18)?,
            account_id: row.opt_text(19)?,
            permission: row.opt_text(20)?,
            mapping_status: row.opt_text(21)?,
        })
    }
}

// ============================================================================
// SECTION: Folding
// ============================================================================

/// Folds aggregated rows into one detailed consent per distinct consent id.
///
/// Output order follows the first appearance of each consent id. Repeated rows
/// for the same consent contribute children not already present.
///
/// # Errors
///
/// Returns [`ConsentError::Aggregation`] when aligned columns disagree on token
/// counts, a token cannot be decoded, or a mapping references an unknown
/// authorization.
pub fn fold_rows(rows: Vec<AggregateRow>) -> Result<Vec<DetailedConsentResource>, ConsentError> {
    let mut folded: Vec<DetailedConsentResource> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let detailed = fold_row(&row)?;
        match positions.get(&row.consent_id).copied() {
            Some(position) => {
                if let Some(existing) = folded.get_mut(position) {
                    merge_children(existing, detailed);
                }
            }
            None => {
                positions.insert(row.consent_id.clone(), folded.len());
                folded.push(detailed);
            }
        }
    }
    Ok(folded)
}

/// Folds one aggregated row.
fn fold_row(row: &AggregateRow) -> Result<DetailedConsentResource, ConsentError> {
    let consent_id = row.consent_id.as_str();
    let current_status = ConsentStatus::from_label(&row.current_status).ok_or_else(|| {
        aggregation(consent_id, &format!("unknown consent status {}", row.current_status))
    })?;
    let receipt = serde_json::from_str(&row.receipt)
        .map_err(|err| aggregation(consent_id, &format!("invalid receipt json: {err}")))?;

    let mut attributes = BTreeMap::new();
    for record in aligned(
        consent_id,
        &[("ATT_KEY", row.att_key.as_deref()), ("ATT_VALUE", row.att_value.as_deref())],
    )? {
        let [key, value] = record.as_slice() else {
            return Err(aggregation(consent_id, "attribute arity"));
        };
        let value = decode_nullable(consent_id, "ATT_VALUE", value)?.unwrap_or_default();
        attributes.insert((*key).to_string(), value);
    }

    let mut authorizations = Vec::new();
    for record in aligned(
        consent_id,
        &[
            ("AUTH_ID", row.auth_id.as_deref()),
            ("AUTH_STATUS", row.auth_status.as_deref()),
            ("AUTH_TYPE", row.auth_type.as_deref()),
            ("AUTH_UPDATED_TIME", row.auth_updated_time.as_deref()),
            ("USER_ID", row.user_id.as_deref()),
        ],
    )? {
        let [auth_id, status, auth_type, updated_time, user_id] = record.as_slice() else {
            return Err(aggregation(consent_id, "authorization arity"));
        };
        let auth_status = AuthorizationStatus::from_label(status).ok_or_else(|| {
            aggregation(consent_id, &format!("unknown authorization status {status}"))
        })?;
        let updated_time = updated_time.parse::<i64>().map_err(|_| {
            aggregation(consent_id, &format!("invalid authorization time {updated_time}"))
        })?;
        let user_id = decode_nullable(consent_id, "USER_ID", user_id)?.filter(|id| !id.is_empty());
        authorizations.push(AuthorizationResource {
            auth_id: AuthorizationId::new(*auth_id),
            consent_id: ConsentId::new(consent_id),
            user_id,
            auth_status,
            auth_type: (*auth_type).to_string(),
            updated_time,
        });
    }

    let mut mappings = Vec::new();
    for record in aligned(
        consent_id,
        &[
            ("MAPPING_ID", row.mapping_id.as_deref()),
            ("MAPPING_AUTH_ID", row.mapping_auth_id.as_deref()),
            ("ACCOUNT_ID", row.account_id.as_deref()),
            ("PERMISSION", row.permission.as_deref()),
            ("MAPPING_STATUS", row.mapping_status.as_deref()),
        ],
    )? {
        let [mapping_id, auth_id, account_id, permission, status] = record.as_slice() else {
            return Err(aggregation(consent_id, "mapping arity"));
        };
        let mapping_status = MappingStatus::from_label(status).ok_or_else(|| {
            aggregation(consent_id, &format!("unknown mapping status {status}"))
        })?;
        let auth_id = AuthorizationId::new(*auth_id);
        if !authorizations.iter().any(|auth| auth.auth_id == auth_id) {
            return Err(aggregation(
                consent_id,
                &format!("mapping {mapping_id} references unknown authorization {auth_id}"),
            ));
        }
        mappings.push(ConsentMapping {
            mapping_id: MappingId::new(*mapping_id),
            auth_id,
            account_id: (*account_id).to_string(),
            permission: (*permission).to_string(),
            mapping_status,
        });
    }

    Ok(DetailedConsentResource {
        consent: ConsentResource {
            consent_id: ConsentId::new(consent_id),
            client_id: row.client_id.clone(),
            receipt,
            consent_type: row.consent_type.clone(),
            current_status,
            consent_frequency: row.consent_frequency,
            validity_time: row.validity_time,
            recurring_indicator: row.recurring_indicator != 0,
            created_time: row.created_time,
            updated_time: row.updated_time,
            attributes,
        },
        authorizations,
        mappings,
    })
}

/// Adds children from `other` that `target` does not already hold.
fn merge_children(target: &mut DetailedConsentResource, other: DetailedConsentResource) {
    for (key, value) in other.consent.attributes {
        target.consent.attributes.entry(key).or_insert(value);
    }
    for authorization in other.authorizations {
        if target.authorization(&authorization.auth_id).is_none() {
            target.authorizations.push(authorization);
        }
    }
    for mapping in other.mappings {
        if !target.mappings.iter().any(|existing| existing.mapping_id == mapping.mapping_id) {
            target.mappings.push(mapping);
        }
    }
    target.authorizations.sort_by(|left, right| left.auth_id.cmp(&right.auth_id));
    target.mappings.sort_by(|left, right| left.mapping_id.cmp(&right.mapping_id));
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Splits aligned columns and returns one token record per child.
fn aligned<'a>(
    consent_id: &str,
    columns: &[(&str, Option<&'a str>)],
) -> Result<Vec<Vec<&'a str>>, ConsentError> {
    let split: Vec<(&str, Vec<&'a str>)> =
        columns.iter().map(|(name, value)| (*name, tokens(*value))).collect();
    let Some((first_name, first_tokens)) = split.first() else {
        return Ok(Vec::new());
    };
    let count = first_tokens.len();
    for (name, column_tokens) in &split {
        if column_tokens.iter().any(|token| token.starts_with('|') || token.ends_with('|')) {
            return Err(aggregation(consent_id, &format!("{name} has a token with a stray delimiter")));
        }
        if column_tokens.len() != count {
            return Err(aggregation(
                consent_id,
                &format!(
                    "{name} has {} tokens but {first_name} has {count}",
                    column_tokens.len()
                ),
            ));
        }
    }
    Ok((0 .. count)
        .map(|index| {
            split
                .iter()
                .filter_map(|(_, column_tokens)| column_tokens.get(index).copied())
                .collect()
        })
        .collect())
}

/// Splits one aggregated column; NULL yields no tokens.
fn tokens(value: Option<&str>) -> Vec<&str> {
    value.map_or_else(Vec::new, |text| text.split(AGGREGATE_DELIMITER).collect())
}

/// Decodes a marker-encoded nullable token.
fn decode_nullable(
    consent_id: &str,
    column: &str,
    token: &str,
) -> Result<Option<String>, ConsentError> {
    if token == "-" {
        return Ok(None);
    }
    token.strip_prefix('+').map(|value| Some(value.to_string())).ok_or_else(|| {
        aggregation(consent_id, &format!("{column} token lacks a null marker"))
    })
}

/// Builds an aggregation error for a consent.
fn aggregation(consent_id: &str, detail: &str) -> ConsentError {
    ConsentError::Aggregation(format!("consent {consent_id}: {detail}"))
}
