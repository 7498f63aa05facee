// consent-mgt-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Lifecycle State Machine
// Description: Validates and applies consent and authorization transitions.
// Purpose: Keep stored status, version, and ledger consistent per transition.
// Dependencies: crate::{core, interfaces, query, runtime::audit}
// ============================================================================

//! ## Overview
//! Transitions are validated against the table in
//! [`ConsentStatus::can_transition_to`]. Applying a transition locks the
//! consent row, re-validates against the locked status, updates the row only
//! if its version is unchanged, and appends a ledger row in the same
//! transaction. Expiry is lazy: reads report `EXPIRED` once `validityTime`
//! has passed; only the sweep writes it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::ConsentId;
use crate::core::model::ConsentStatusAuditRecord;
use crate::core::status::AuthorizationStatus;
use crate::core::status::ConsentStatus;
use crate::interfaces::ConsentError;
use crate::interfaces::SqlTransaction;
use crate::query::statements;
use crate::runtime::audit::AuditTrailRecorder;
use crate::runtime::audit::StatusChange;

// ============================================================================
// SECTION: State Machine
// ============================================================================

/// Consent lifecycle rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    /// Checks a consent transition.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::InvalidStateTransition`] when `to` is not reachable from `from`.
    pub fn check_consent(from: ConsentStatus, to: ConsentStatus) -> Result<(), ConsentError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(ConsentError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Checks an authorization transition.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::InvalidStateTransition`] when `to` is not reachable from `from`.
    pub fn check_authorization(
        from: AuthorizationStatus,
        to: AuthorizationStatus,
    ) -> Result<(), ConsentError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(ConsentError::InvalidStateTransition {
                from: format!("authorization {from}"),
                to: format!("authorization {to}"),
            })
        }
    }

    /// Returns true once a consent's validity window has passed.
    #[must_use]
    pub const fn is_lapsed(validity_time: i64, now: i64) -> bool {
        validity_time > 0 && validity_time < now
    }

    /// Returns the status reads should report at `now`.
    #[must_use]
    pub const fn effective_status(
        stored: ConsentStatus,
        validity_time: i64,
        now: i64,
    ) -> ConsentStatus {
        if !stored.is_terminal() && Self::is_lapsed(validity_time, now) {
            ConsentStatus::Expired
        } else {
            stored
        }
    }
}

// ============================================================================
// SECTION: Application
// ============================================================================

/// Consent row fields read under lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockedConsent {
    /// Stored status.
    pub(crate) status: ConsentStatus,
    /// Optimistic version.
    pub(crate) version: i64,
    /// Expiry time.
    pub(crate) validity_time: i64,
}

impl LockedConsent {
    /// Returns the status reads would report at `now`.
    pub(crate) const fn effective_status(&self, now: i64) -> ConsentStatus {
        LifecycleStateMachine::effective_status(self.status, self.validity_time, now)
    }
}

/// Locks the consent row for the rest of the transaction.
pub(crate) fn lock_consent(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
) -> Result<LockedConsent, ConsentError> {
    let dialect = tx.dialect();
    let rows = tx.query(&statements::lock_consent(dialect, consent_id))?;
    let Some(row) = rows.first() else {
        return Err(ConsentError::NotFound(format!("consent {consent_id}")));
    };
    let label = row.text(0)?;
    let status = ConsentStatus::from_label(&label)
        .ok_or_else(|| ConsentError::Store(format!("consent {consent_id}: unknown status {label}")))?;
    Ok(LockedConsent {
        status,
        version: row.integer(1)?,
        validity_time: row.integer(2)?,
    })
}

/// A transition to apply inside an open transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Transition<'a> {
    /// Consent to transition.
    pub(crate) consent_id: &'a ConsentId,
    /// Target status.
    pub(crate) target: ConsentStatus,
    /// Actor recorded in the ledger.
    pub(crate) actor: &'a str,
    /// Optional ledger reason.
    pub(crate) reason: Option<&'a str>,
    /// Transition time.
    pub(crate) now: i64,
}

/// Locks, validates, updates, and audits one consent transition.
///
/// Transitions to `EXPIRED` validate against the stored status; all others
/// validate against the effective status, so a lapsed consent cannot be
/// authorized or revoked.
pub(crate) fn apply_transition(
    tx: &mut dyn SqlTransaction,
    recorder: &AuditTrailRecorder,
    transition: Transition<'_>,
) -> Result<ConsentStatusAuditRecord, ConsentError> {
    let locked = lock_consent(tx, transition.consent_id)?;
    let from = if transition.target == ConsentStatus::Expired {
        locked.status
    } else {
        locked.effective_status(transition.now)
    };
    LifecycleStateMachine::check_consent(from, transition.target)?;
    let dialect = tx.dialect();
    let affected = tx.execute(&statements::update_consent_status(
        dialect,
        transition.consent_id,
        transition.target,
        transition.now,
        locked.version,
    ))?;
    if affected == 0 {
        return Err(ConsentError::Conflict(format!(
            "consent {} changed concurrently",
            transition.consent_id
        )));
    }
    recorder.record_status_change(
        tx,
        &StatusChange {
            consent_id: transition.consent_id,
            previous: Some(locked.status),
            current: transition.target,
            actor: transition.actor,
            timestamp: transition.now,
            reason: transition.reason,
        },
    )
}
