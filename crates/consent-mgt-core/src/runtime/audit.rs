// consent-mgt-core/src/runtime/audit.rs
// ============================================================================
// Module: Audit Trail Recorder
// Description: Status-change ledger and history snapshot persistence.
// Purpose: Append audit rows inside the caller's transaction and manage retention.
// Dependencies: crate::{core, interfaces, query}, serde, serde_json
// ============================================================================

//! ## Overview
//! The recorder writes through the caller's open transaction, so a failed
//! audit write rolls back the change it describes. Ledger rows carry a
//! per-consent sequence assigned under the consent row lock. Rows are only
//! ever inserted; retention moves old rows into the `RET_` tables and never
//! moves a consent's latest ledger row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ConsentId;
use crate::core::identifiers::HistoryId;
use crate::core::identifiers::StatusAuditId;
use crate::core::model::AuditSource;
use crate::core::model::ConsentHistoryResource;
use crate::core::model::ConsentStatusAuditRecord;
use crate::core::model::DetailedConsentResource;
use crate::core::model::StatusAuditQuery;
use crate::core::status::ConsentStatus;
use crate::interfaces::ConsentError;
use crate::interfaces::SqlRow;
use crate::interfaces::SqlTransaction;
use crate::query::statements;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A status change to append to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct StatusChange<'a> {
    /// Consent that changed.
    pub consent_id: &'a ConsentId,
    /// Status before the change; `None` on creation.
    pub previous: Option<ConsentStatus>,
    /// Status after the change.
    pub current: ConsentStatus,
    /// Responsible actor.
    pub actor: &'a str,
    /// Change time.
    pub timestamp: i64,
    /// Optional reason.
    pub reason: Option<&'a str>,
}

/// Outcome of a retention purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSummary {
    /// Rows older than this time were eligible.
    pub cutoff: i64,
    /// Ledger rows moved to the retention table.
    pub moved_audit_rows: u64,
    /// History rows moved to the retention table.
    pub moved_history_rows: u64,
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Appends ledger and history rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditTrailRecorder;

impl AuditTrailRecorder {
    /// Appends one ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the insert fails.
    pub fn record_status_change(
        &self,
        tx: &mut dyn SqlTransaction,
        change: &StatusChange<'_>,
    ) -> Result<ConsentStatusAuditRecord, ConsentError> {
        let dialect = tx.dialect();
        let rows = tx.query(&statements::max_audit_sequence(dialect, change.consent_id))?;
        let latest = match rows.first() {
            Some(row) => row.integer(0)?,
            None => 0,
        };
        let record = ConsentStatusAuditRecord {
            status_audit_id: StatusAuditId::generate(),
            consent_id: change.consent_id.clone(),
            sequence: latest.saturating_add(1),
            current_status: change.current,
            previous_status: change.previous,
            action_by: change.actor.to_string(),
            action_time: change.timestamp,
            reason: change.reason.map(str::to_string),
        };
        tx.execute(&statements::insert_status_audit(dialect, &record))?;
        Ok(record)
    }

    /// Appends one history snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when serialization or the insert fails.
    pub fn record_history_snapshot(
        &self,
        tx: &mut dyn SqlTransaction,
        reason: &str,
        detailed: DetailedConsentResource,
        changed_attributes: BTreeMap<String, Value>,
        timestamp: i64,
    ) -> Result<ConsentHistoryResource, ConsentError> {
        let history = ConsentHistoryResource {
            history_id: HistoryId::generate(),
            consent_id: detailed.consent.consent_id.clone(),
            timestamp,
            reason: reason.to_string(),
            detailed_consent: detailed,
            changed_attributes,
        };
        let detailed_json = serde_json::to_string(&history.detailed_consent)
            .map_err(|err| ConsentError::Store(err.to_string()))?;
        let changed_json = serde_json::to_string(&history.changed_attributes)
            .map_err(|err| ConsentError::Store(err.to_string()))?;
        let dialect = tx.dialect();
        tx.execute(&statements::insert_history(
            dialect,
            &history,
            &detailed_json,
            &changed_json,
        ))?;
        Ok(history)
    }

    /// Moves ledger and history rows older than `cutoff` into the retention tables.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when a statement fails or copy and delete counts disagree.
    pub fn purge_retention(
        &self,
        tx: &mut dyn SqlTransaction,
        cutoff: i64,
    ) -> Result<RetentionSummary, ConsentError> {
        let dialect = tx.dialect();
        let copied_audit = tx.execute(&statements::copy_audit_to_retention(dialect, cutoff))?;
        let deleted_audit = tx.execute(&statements::delete_purged_audit(dialect, cutoff))?;
        if copied_audit != deleted_audit {
            return Err(ConsentError::Store(format!(
                "retention moved {copied_audit} ledger rows but removed {deleted_audit}"
            )));
        }
        let copied_history = tx.execute(&statements::copy_history_to_retention(dialect, cutoff))?;
        let deleted_history = tx.execute(&statements::delete_purged_history(dialect, cutoff))?;
        if copied_history != deleted_history {
            return Err(ConsentError::Store(format!(
                "retention moved {copied_history} history rows but removed {deleted_history}"
            )));
        }
        Ok(RetentionSummary {
            cutoff,
            moved_audit_rows: copied_audit,
            moved_history_rows: copied_history,
        })
    }

    /// Reads ledger rows.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the query fails or a row is malformed.
    pub fn status_audit_records(
        &self,
        tx: &mut dyn SqlTransaction,
        query: &StatusAuditQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, ConsentError> {
        let dialect = tx.dialect();
        let rows = tx.query(&statements::select_status_audit(dialect, query))?;
        rows.iter().map(decode_audit_row).collect()
    }

    /// Reads a consent's history snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when the query fails or a row is malformed.
    pub fn history(
        &self,
        tx: &mut dyn SqlTransaction,
        consent_id: &ConsentId,
        source: AuditSource,
    ) -> Result<Vec<ConsentHistoryResource>, ConsentError> {
        let dialect = tx.dialect();
        let rows = tx.query(&statements::select_history(dialect, consent_id, source))?;
        rows.iter().map(decode_history_row).collect()
    }
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// Decodes a ledger row in [`statements::AUDIT_COLUMNS`] order.
fn decode_audit_row(row: &SqlRow) -> Result<ConsentStatusAuditRecord, ConsentError> {
    let current = row.text(3)?;
    let previous = row.opt_text(4)?;
    Ok(ConsentStatusAuditRecord {
        status_audit_id: StatusAuditId::new(row.text(0)?),
        consent_id: ConsentId::new(row.text(1)?),
        sequence: row.integer(2)?,
        current_status: parse_status(&current)?,
        previous_status: previous.as_deref().map(parse_status).transpose()?,
        action_by: row.text(5)?,
        action_time: row.integer(6)?,
        reason: row.opt_text(7)?,
    })
}

/// Decodes a history row in [`statements::HISTORY_COLUMNS`] order.
fn decode_history_row(row: &SqlRow) -> Result<ConsentHistoryResource, ConsentError> {
    let detailed_json = row.text(4)?;
    let changed_json = row.text(5)?;
    Ok(ConsentHistoryResource {
        history_id: HistoryId::new(row.text(0)?),
        consent_id: ConsentId::new(row.text(1)?),
        timestamp: row.integer(2)?,
        reason: row.text(3)?,
        detailed_consent: serde_json::from_str(&detailed_json)
            .map_err(|err| ConsentError::Store(format!("corrupt history snapshot: {err}")))?,
        changed_attributes: serde_json::from_str(&changed_json)
            .map_err(|err| ConsentError::Store(format!("corrupt history delta: {err}")))?,
    })
}

/// Parses a stored consent status label.
fn parse_status(label: &str) -> Result<ConsentStatus, ConsentError> {
    ConsentStatus::from_label(label)
        .ok_or_else(|| ConsentError::Store(format!("unknown consent status {label}")))
}
