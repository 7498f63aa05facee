// consent-mgt-core/src/interfaces/mod.rs
// ============================================================================
// Module: Consent Interfaces
// Description: Storage backend, transaction, error, and event sink contracts.
// Purpose: Define the seams between consent runtime services and engines.
// Dependencies: crate::{core, query}, serde, thiserror
// ============================================================================

//! ## Overview
//! Runtime services speak to storage only through [`SqlBackend`] and
//! [`SqlTransaction`]: parameterized SQL text plus ordered bind values, with
//! the dialect fixed when the backend is constructed. Every multi-statement
//! mutation runs inside one transaction; dropping a transaction without
//! committing rolls it back. Notifications leave the engine through
//! [`ConsentEventSink`] after the owning transaction commits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::core::model::ConsentHistoryResource;
use crate::core::model::ConsentStatusAuditRecord;
use crate::query::BoundQuery;
use crate::query::Dialect;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Consent engine errors surfaced to callers.
///
/// # Invariants
/// - Only [`ConsentError::Transient`] is safe to retry as-is.
/// - [`ConsentError::Conflict`] asks the caller to re-read before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsentError {
    /// Missing or malformed required field.
    #[error("validation error: {0}")]
    Validation(String),
    /// Referenced consent, authorization, or mapping is absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Requested status change is not legal from the current state.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status label.
        from: String,
        /// Requested status label.
        to: String,
    },
    /// Aggregated child columns could not be folded without misalignment.
    #[error("aggregation error: {0}")]
    Aggregation(String),
    /// Connection, timeout, or lock contention.
    #[error("transient store error: {0}")]
    Transient(String),
    /// A concurrent writer won the race.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any other storage failure.
    #[error("store error: {0}")]
    Store(String),
}

impl ConsentError {
    /// Returns true when the operation may be retried unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns a stable label for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::InvalidStateTransition {
                ..
            } => "invalid_state_transition",
            Self::Aggregation(_) => "aggregation",
            Self::Transient(_) => "transient",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store",
        }
    }
}

/// Errors reported by storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Busy database, lock timeout, statement timeout, or exhausted pool.
    #[error("backend transient error: {0}")]
    Transient(String),
    /// Unique or primary key violation.
    #[error("backend conflict: {0}")]
    Conflict(String),
    /// Engine error.
    #[error("backend db error: {0}")]
    Db(String),
    /// Stored data does not match the expected shape.
    #[error("backend corruption: {0}")]
    Corrupt(String),
}

impl From<BackendError> for ConsentError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Transient(message) => Self::Transient(message),
            BackendError::Conflict(message) => Self::Conflict(message),
            BackendError::Db(message) => Self::Store(message),
            BackendError::Corrupt(message) => Self::Store(format!("corrupt data: {message}")),
        }
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// A single value read from a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlCell {
    /// SQL NULL.
    Null,
    /// Integer value.
    Integer(i64),
    /// Text value.
    Text(String),
}

/// A result row in select-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRow {
    /// Cell values.
    cells: Vec<SqlCell>,
}

impl SqlRow {
    /// Creates a row from cells in select-list order.
    #[must_use]
    pub const fn new(cells: Vec<SqlCell>) -> Self {
        Self {
            cells,
        }
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Returns the cell at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when the column is missing.
    pub fn cell(&self, index: usize) -> Result<&SqlCell, BackendError> {
        self.cells
            .get(index)
            .ok_or_else(|| BackendError::Corrupt(format!("missing column {index}")))
    }

    /// Reads a non-null text column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when the column is null or not text.
    pub fn text(&self, index: usize) -> Result<String, BackendError> {
        self.opt_text(index)?
            .ok_or_else(|| BackendError::Corrupt(format!("column {index} is null")))
    }

    /// Reads a nullable text column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when the column is not text.
    pub fn opt_text(&self, index: usize) -> Result<Option<String>, BackendError> {
        match self.cell(index)? {
            SqlCell::Null => Ok(None),
            SqlCell::Text(value) => Ok(Some(value.clone())),
            SqlCell::Integer(_) => {
                Err(BackendError::Corrupt(format!("column {index}: expected text")))
            }
        }
    }

    /// Reads a non-null integer column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when the column is null or not an integer.
    pub fn integer(&self, index: usize) -> Result<i64, BackendError> {
        match self.cell(index)? {
            SqlCell::Integer(value) => Ok(*value),
            SqlCell::Null => Err(BackendError::Corrupt(format!("column {index} is null"))),
            SqlCell::Text(_) => {
                Err(BackendError::Corrupt(format!("column {index}: expected integer")))
            }
        }
    }
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// Lock intent declared when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    Read,
    /// Reads and writes; engines may take write locks eagerly.
    Write,
}

/// An open transaction. Dropping it without [`SqlTransaction::commit`] rolls back.
pub trait SqlTransaction {
    /// Returns the dialect statements must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Executes a statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the statement fails.
    fn execute(&mut self, query: &BoundQuery) -> Result<u64, BackendError>;

    /// Runs a query and returns every row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the query fails.
    fn query(&mut self, query: &BoundQuery) -> Result<Vec<SqlRow>, BackendError>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the commit fails; the transaction is rolled back.
    fn commit(self: Box<Self>) -> Result<(), BackendError>;
}

/// Transactional SQL engine bound to one dialect.
pub trait SqlBackend: Send + Sync {
    /// Returns the dialect this backend executes.
    fn dialect(&self) -> Dialect;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transient`] when no connection or lock is available in time.
    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn SqlTransaction + '_>, BackendError>;
}

/// Runs `work` inside one transaction, committing only when it succeeds.
///
/// # Errors
///
/// Returns the error produced by `work`, or the backend error from begin or commit.
pub fn run_in_transaction<T, F>(
    backend: &dyn SqlBackend,
    mode: TransactionMode,
    work: F,
) -> Result<T, ConsentError>
where
    F: FnOnce(&mut dyn SqlTransaction) -> Result<T, ConsentError>,
{
    let mut tx = backend.begin(mode)?;
    let value = work(tx.as_mut())?;
    tx.commit()?;
    Ok(value)
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Notification emitted after an audited write commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (unix seconds).
    pub timestamp: i64,
    /// Consent identifier when the event concerns one consent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<String>,
    /// Previous consent status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    /// New consent status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    /// Actor or reason text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Ledger or history row identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Number of rows affected (retention purges).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
}

impl ConsentEvent {
    /// Builds the event for a committed ledger row.
    #[must_use]
    pub fn status_changed(record: &ConsentStatusAuditRecord) -> Self {
        Self {
            event: "consent_status_changed",
            timestamp: record.action_time,
            consent_id: Some(record.consent_id.to_string()),
            previous_status: record.previous_status.map(|status| status.as_str().to_string()),
            current_status: Some(record.current_status.as_str().to_string()),
            detail: Some(record.action_by.clone()),
            record_id: Some(record.status_audit_id.to_string()),
            rows: None,
        }
    }

    /// Builds the event for a committed history snapshot.
    #[must_use]
    pub fn history_recorded(history: &ConsentHistoryResource) -> Self {
        Self {
            event: "consent_history_recorded",
            timestamp: history.timestamp,
            consent_id: Some(history.consent_id.to_string()),
            previous_status: None,
            current_status: Some(
                history.detailed_consent.consent.current_status.as_str().to_string(),
            ),
            detail: Some(history.reason.clone()),
            record_id: Some(history.history_id.to_string()),
            rows: None,
        }
    }

    /// Builds the event for a committed retention purge.
    #[must_use]
    pub const fn retention_purged(timestamp: i64, rows: u64) -> Self {
        Self {
            event: "audit_retention_purged",
            timestamp,
            consent_id: None,
            previous_status: None,
            current_status: None,
            detail: None,
            record_id: None,
            rows: Some(rows),
        }
    }
}

/// Receives committed consent events.
pub trait ConsentEventSink: Send + Sync {
    /// Records one event. Sinks must not fail the caller.
    fn record(&self, event: &ConsentEvent);
}
