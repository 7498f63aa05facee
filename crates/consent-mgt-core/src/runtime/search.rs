// consent-mgt-core/src/runtime/search.rs
// ============================================================================
// Module: Search & Pagination Service
// Description: Filtered, paginated consent listings.
// Purpose: Compose the dialect query builder and the row folder.
// Dependencies: crate::{core, interfaces, query, runtime::folder}
// ============================================================================

//! ## Overview
//! Search results are ordered by `updatedTime` descending with ties broken by
//! consent id, so consecutive pages over unchanged data are disjoint and
//! contiguous. Absent `limit` returns every match; `offset` without `limit`
//! is ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::identifiers::ConsentId;
use crate::core::model::ConsentSearchQuery;
use crate::core::model::DetailedConsentResource;
use crate::core::time::Clock;
use crate::interfaces::ConsentError;
use crate::interfaces::SqlBackend;
use crate::interfaces::SqlTransaction;
use crate::interfaces::TransactionMode;
use crate::interfaces::run_in_transaction;
use crate::query::BoundQuery;
use crate::query::statements;
use crate::runtime::folder::AggregateRow;
use crate::runtime::folder::fold_rows;
use crate::runtime::lifecycle::LifecycleStateMachine;

// ============================================================================
// SECTION: Service
// ============================================================================

/// Serves consent searches against one backend.
#[derive(Clone)]
pub struct ConsentSearchService {
    /// Storage backend.
    backend: Arc<dyn SqlBackend>,
    /// Time source for lazy expiry.
    clock: Arc<dyn Clock>,
    /// Largest accepted `limit`, when bounded.
    max_page_size: Option<u64>,
}

impl ConsentSearchService {
    /// Creates a search service.
    #[must_use]
    pub fn new(backend: Arc<dyn SqlBackend>, clock: Arc<dyn Clock>, max_page_size: Option<u64>) -> Self {
        Self {
            backend,
            clock,
            max_page_size,
        }
    }

    /// Returns consents matching `query`, each with its full child sequences.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Validation`] for an inverted date range or an
    /// oversized page, [`ConsentError::Aggregation`] when rows cannot be folded,
    /// and store errors otherwise.
    pub fn search(
        &self,
        query: &ConsentSearchQuery,
    ) -> Result<Vec<DetailedConsentResource>, ConsentError> {
        if let (Some(from), Some(to)) = (query.from_time, query.to_time)
            && from > to
        {
            return Err(ConsentError::Validation(format!(
                "date range start {from} is after end {to}"
            )));
        }
        if let (Some(limit), Some(max)) = (query.limit, self.max_page_size)
            && limit > max
        {
            return Err(ConsentError::Validation(format!(
                "limit {limit} exceeds maximum page size {max}"
            )));
        }
        let now = self.clock.now();
        let mut consents =
            run_in_transaction(self.backend.as_ref(), TransactionMode::Read, |tx| {
                let dialect = tx.dialect();
                fold_query(tx, &statements::search_consents(dialect, query, now))
            })?;
        for detailed in &mut consents {
            apply_effective_status(detailed, now);
        }
        Ok(consents)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs an aggregation query and folds its rows.
pub(crate) fn fold_query(
    tx: &mut dyn SqlTransaction,
    query: &BoundQuery,
) -> Result<Vec<DetailedConsentResource>, ConsentError> {
    let rows = tx.query(query)?;
    let decoded = rows.iter().map(AggregateRow::from_row).collect::<Result<Vec<_>, _>>()?;
    fold_rows(decoded)
}

/// Loads one detailed consent inside an open transaction.
pub(crate) fn load_detailed(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
) -> Result<Option<DetailedConsentResource>, ConsentError> {
    let dialect = tx.dialect();
    let folded = fold_query(tx, &statements::detailed_consent(dialect, consent_id))?;
    Ok(folded.into_iter().next())
}

/// Replaces the stored status with the status reads report at `now`.
pub(crate) fn apply_effective_status(detailed: &mut DetailedConsentResource, now: i64) {
    let consent = &mut detailed.consent;
    consent.current_status = LifecycleStateMachine::effective_status(
        consent.current_status,
        consent.validity_time,
        now,
    );
}
