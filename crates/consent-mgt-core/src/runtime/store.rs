// consent-mgt-core/src/runtime/store.rs
// ============================================================================
// Module: Consent Store
// Description: Transactional consent operations over a SQL backend.
// Purpose: Persist consents and children, drive transitions, and keep audit in step.
// Dependencies: crate::{core, interfaces, query, runtime}, serde, serde_json
// ============================================================================

//! ## Overview
//! [`ConsentStore`] is the single write path for consents. Every mutation
//! runs in one backend transaction together with its ledger and history
//! rows; any failure rolls the whole unit back. Transitions lock the consent
//! row and update it under a version check, so racing writers either
//! serialize or lose with [`ConsentError::Conflict`]. Events reach the sink
//! only after commit.
//!
//! Security posture: inputs are untrusted; text that would collide with the
//! aggregation delimiter is rejected before any statement runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::AuthorizationId;
use crate::core::identifiers::ConsentId;
use crate::core::identifiers::MappingId;
use crate::core::model::AuditSource;
use crate::core::model::AuthorizableConsentRequest;
use crate::core::model::AuthorizationResource;
use crate::core::model::BindResourcesRequest;
use crate::core::model::ConsentHistoryResource;
use crate::core::model::ConsentMapping;
use crate::core::model::ConsentResource;
use crate::core::model::ConsentSearchQuery;
use crate::core::model::ConsentStatusAuditRecord;
use crate::core::model::DetailedConsentResource;
use crate::core::model::NewAuthorization;
use crate::core::model::NewConsent;
use crate::core::model::StatusAuditQuery;
use crate::core::status::AuthorizationStatus;
use crate::core::status::ConsentStatus;
use crate::core::status::MappingStatus;
use crate::core::time::Clock;
use crate::interfaces::ConsentError;
use crate::interfaces::ConsentEvent;
use crate::interfaces::ConsentEventSink;
use crate::interfaces::SqlBackend;
use crate::interfaces::SqlRow;
use crate::interfaces::SqlTransaction;
use crate::interfaces::TransactionMode;
use crate::interfaces::run_in_transaction;
use crate::query::AGGREGATE_DELIMITER;
use crate::query::TableSet;
use crate::query::statements;
use crate::runtime::audit::AuditTrailRecorder;
use crate::runtime::audit::RetentionSummary;
use crate::runtime::audit::StatusChange;
use crate::runtime::lifecycle::LifecycleStateMachine;
use crate::runtime::lifecycle::Transition;
use crate::runtime::lifecycle::apply_transition;
use crate::runtime::lifecycle::lock_consent;
use crate::runtime::search::ConsentSearchService;
use crate::runtime::search::apply_effective_status;
use crate::runtime::search::load_detailed;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Actor recorded for transitions the engine performs on its own.
pub const SYSTEM_ACTOR: &str = "consent-mgt";

/// Ledger reason recorded by the expiry sweep.
pub const EXPIRY_REASON: &str = "validity period elapsed";

/// History reason for creation snapshots.
const HISTORY_CREATED: &str = "consent created";
/// History reason for status transitions.
const HISTORY_STATUS: &str = "status changed";
/// History reason for resource binding.
const HISTORY_BOUND: &str = "resources bound";
/// History reason for attribute writes.
const HISTORY_ATTRIBUTES: &str = "attributes stored";

// ============================================================================
// SECTION: Options & Summaries
// ============================================================================

/// Store behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentStoreOptions {
    /// Append a history snapshot after every status or attribute change.
    pub history_snapshots: bool,
    /// Largest accepted page size for searches and ledger reads.
    pub max_page_size: Option<u64>,
}

/// A consent the expiry sweep could not expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedConsent {
    /// Consent identifier.
    pub consent_id: ConsentId,
    /// Why the consent was skipped.
    pub reason: String,
}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    /// Consents moved to `EXPIRED`.
    pub expired: Vec<ConsentId>,
    /// Consents left unchanged, typically because a concurrent writer won.
    pub skipped: Vec<SkippedConsent>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Consent persistence and lifecycle engine.
///
/// # Invariants
/// - A consent's stored status always equals the status of its latest ledger row.
/// - Mappings only reference authorizations of the same consent.
/// - Ledger and history rows are never updated.
#[derive(Clone)]
pub struct ConsentStore {
    /// Storage backend.
    backend: Arc<dyn SqlBackend>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Post-commit event sink.
    sink: Arc<dyn ConsentEventSink>,
    /// Ledger and history writer.
    recorder: AuditTrailRecorder,
    /// Behavior switches.
    options: ConsentStoreOptions,
    /// Search service sharing the backend.
    search: ConsentSearchService,
}

impl ConsentStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn SqlBackend>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ConsentEventSink>,
        options: ConsentStoreOptions,
    ) -> Self {
        let search =
            ConsentSearchService::new(Arc::clone(&backend), Arc::clone(&clock), options.max_page_size);
        Self {
            backend,
            clock,
            sink,
            recorder: AuditTrailRecorder,
            options,
            search,
        }
    }

    /// Returns the store options.
    #[must_use]
    pub const fn options(&self) -> ConsentStoreOptions {
        self.options
    }

    /// Returns the search service bound to this store's backend.
    #[must_use]
    pub const fn search_service(&self) -> &ConsentSearchService {
        &self.search
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Creates a consent in `CREATED` and records its first ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Validation`] for missing or malformed fields and
    /// store errors otherwise.
    pub fn create_consent(&self, request: NewConsent) -> Result<ConsentResource, ConsentError> {
        let now = self.clock.now();
        validate_new_consent(&request, now)?;
        self.write(|tx, events| {
            let consent = self.insert_consent(tx, request, now, events)?;
            self.snapshot(tx, &consent.consent_id, HISTORY_CREATED, BTreeMap::new(), now, events)?;
            Ok(consent)
        })
    }

    /// Creates a consent and its initial authorization in one transaction.
    ///
    /// When an authorization is created the consent moves on to
    /// `AWAITING_AUTHORIZATION`. With `generate_auth_id` an id is minted even
    /// when no authorization fields were supplied; otherwise a supplied
    /// authorization must carry its own id.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Validation`] for malformed input,
    /// [`ConsentError::Conflict`] when a caller-supplied authorization id
    /// already exists, and store errors otherwise.
    pub fn create_authorizable_consent(
        &self,
        request: AuthorizableConsentRequest,
    ) -> Result<DetailedConsentResource, ConsentError> {
        let now = self.clock.now();
        let AuthorizableConsentRequest {
            consent,
            authorization,
            initial_auth_status,
            auth_type,
            generate_auth_id,
        } = request;
        validate_new_consent(&consent, now)?;
        require_text("authType", &auth_type)?;
        let authorization = match (authorization, generate_auth_id) {
            (Some(supplied), true) => Some(NewAuthorization {
                auth_id: Some(AuthorizationId::generate()),
                user_id: supplied.user_id,
            }),
            (None, true) => Some(NewAuthorization {
                auth_id: Some(AuthorizationId::generate()),
                user_id: None,
            }),
            (Some(supplied), false) => {
                if supplied.auth_id.is_none() {
                    return Err(ConsentError::Validation(
                        "authId is required when generateAuthId is false".to_string(),
                    ));
                }
                Some(supplied)
            }
            (None, false) => None,
        };
        if let Some(authorization) = &authorization {
            validate_new_authorization(authorization)?;
        }
        let detailed = self.write(|tx, events| {
            let created = self.insert_consent(tx, consent, now, events)?;
            if let Some(authorization) = authorization {
                insert_authorization(
                    tx,
                    &created.consent_id,
                    authorization,
                    initial_auth_status,
                    &auth_type,
                    now,
                )?;
                let record = apply_transition(
                    tx,
                    &self.recorder,
                    Transition {
                        consent_id: &created.consent_id,
                        target: ConsentStatus::AwaitingAuthorization,
                        actor: &created.client_id,
                        reason: None,
                        now,
                    },
                )?;
                events.push(ConsentEvent::status_changed(&record));
            }
            self.snapshot(tx, &created.consent_id, HISTORY_CREATED, BTreeMap::new(), now, events)?;
            load_required(tx, &created.consent_id)
        })?;
        Ok(with_effective_status(detailed, now))
    }

    /// Adds an authorization attempt to a consent that has not been decided yet.
    ///
    /// A consent still in `CREATED` moves to `AWAITING_AUTHORIZATION`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the consent is absent,
    /// [`ConsentError::InvalidStateTransition`] once the consent has been decided
    /// or has lapsed, and store errors otherwise.
    pub fn create_authorization(
        &self,
        consent_id: &ConsentId,
        authorization: NewAuthorization,
        auth_type: &str,
    ) -> Result<AuthorizationResource, ConsentError> {
        let now = self.clock.now();
        require_text("authType", auth_type)?;
        validate_new_authorization(&authorization)?;
        self.write(|tx, events| {
            let locked = lock_consent(tx, consent_id)?;
            let status = locked.effective_status(now);
            if !matches!(status, ConsentStatus::Created | ConsentStatus::AwaitingAuthorization) {
                return Err(ConsentError::InvalidStateTransition {
                    from: status.as_str().to_string(),
                    to: ConsentStatus::AwaitingAuthorization.as_str().to_string(),
                });
            }
            let resource = insert_authorization(
                tx,
                consent_id,
                authorization,
                AuthorizationStatus::Created,
                auth_type,
                now,
            )?;
            if status == ConsentStatus::Created {
                let record = apply_transition(
                    tx,
                    &self.recorder,
                    Transition {
                        consent_id,
                        target: ConsentStatus::AwaitingAuthorization,
                        actor: SYSTEM_ACTOR,
                        reason: None,
                        now,
                    },
                )?;
                events.push(ConsentEvent::status_changed(&record));
                self.snapshot(tx, consent_id, HISTORY_STATUS, status_delta(&record), now, events)?;
            }
            Ok(resource)
        })
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Records an authorization decision, binds resources, and transitions the consent.
    ///
    /// The authorization update, mapping inserts, consent transition, and
    /// ledger row commit together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the consent or authorization is
    /// absent, [`ConsentError::InvalidStateTransition`] when either transition
    /// is illegal, [`ConsentError::Conflict`] when a concurrent writer won, and
    /// store errors otherwise.
    pub fn bind_resources_to_consent(
        &self,
        request: BindResourcesRequest,
    ) -> Result<DetailedConsentResource, ConsentError> {
        let now = self.clock.now();
        require_text("userId", &request.user_id)?;
        require_text("actor", &request.actor)?;
        check_delimiter("authId", request.auth_id.as_str())?;
        for resource in &request.resources {
            require_text("accountId", &resource.account_id)?;
            require_text("permission", &resource.permission)?;
        }
        let detailed = self.write(|tx, events| {
            let consent_id = &request.consent_id;
            let locked = lock_consent(tx, consent_id)?;
            let dialect = tx.dialect();
            let rows = tx.query(&statements::select_authorization(dialect, &request.auth_id))?;
            let authorization = rows
                .first()
                .map(decode_authorization)
                .transpose()?
                .filter(|authorization| &authorization.consent_id == consent_id)
                .ok_or_else(|| {
                    ConsentError::NotFound(format!(
                        "authorization {} for consent {consent_id}",
                        request.auth_id
                    ))
                })?;
            LifecycleStateMachine::check_authorization(
                authorization.auth_status,
                request.auth_status,
            )?;
            LifecycleStateMachine::check_consent(
                locked.effective_status(now),
                request.consent_status,
            )?;
            tx.execute(&statements::update_authorization(
                dialect,
                &request.auth_id,
                request.auth_status,
                &request.user_id,
                now,
            ))?;
            for resource in &request.resources {
                tx.execute(&statements::insert_mapping(
                    dialect,
                    &ConsentMapping {
                        mapping_id: MappingId::generate(),
                        auth_id: request.auth_id.clone(),
                        account_id: resource.account_id.clone(),
                        permission: resource.permission.clone(),
                        mapping_status: MappingStatus::Active,
                    },
                ))?;
            }
            let record = apply_transition(
                tx,
                &self.recorder,
                Transition {
                    consent_id,
                    target: request.consent_status,
                    actor: &request.actor,
                    reason: request.reason.as_deref(),
                    now,
                },
            )?;
            events.push(ConsentEvent::status_changed(&record));
            self.snapshot(tx, consent_id, HISTORY_BOUND, status_delta(&record), now, events)?;
            load_required(tx, consent_id)
        })?;
        Ok(with_effective_status(detailed, now))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Reads one consent, optionally with its attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the consent is absent.
    pub fn get_consent(
        &self,
        consent_id: &ConsentId,
        with_attributes: bool,
    ) -> Result<ConsentResource, ConsentError> {
        let mut consent = self.read(|tx| load_consent(tx, consent_id, with_attributes))?;
        consent.current_status = LifecycleStateMachine::effective_status(
            consent.current_status,
            consent.validity_time,
            self.clock.now(),
        );
        Ok(consent)
    }

    /// Reads one consent with all its children through the aggregation query.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the consent is absent and
    /// [`ConsentError::Aggregation`] when its rows cannot be folded.
    pub fn get_detailed_consent(
        &self,
        consent_id: &ConsentId,
    ) -> Result<DetailedConsentResource, ConsentError> {
        let detailed = self.read(|tx| load_required(tx, consent_id))?;
        Ok(with_effective_status(detailed, self.clock.now()))
    }

    /// Reads one authorization resource.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the authorization is absent.
    pub fn get_authorization(
        &self,
        auth_id: &AuthorizationId,
    ) -> Result<AuthorizationResource, ConsentError> {
        self.read(|tx| {
            let dialect = tx.dialect();
            let rows = tx.query(&statements::select_authorization(dialect, auth_id))?;
            let row =
                rows.first().ok_or_else(|| ConsentError::NotFound(format!("authorization {auth_id}")))?;
            decode_authorization(row)
        })
    }

    /// Searches consents; see [`ConsentSearchService::search`].
    ///
    /// # Errors
    ///
    /// Returns the search service's errors.
    pub fn search_consents(
        &self,
        query: &ConsentSearchQuery,
    ) -> Result<Vec<DetailedConsentResource>, ConsentError> {
        self.search.search(query)
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Upserts attributes: existing keys are overwritten, new keys inserted.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Validation`] for empty or malformed attributes,
    /// [`ConsentError::NotFound`] when the consent is absent, and store errors otherwise.
    pub fn store_consent_attributes(
        &self,
        consent_id: &ConsentId,
        attributes: BTreeMap<String, String>,
    ) -> Result<(), ConsentError> {
        if attributes.is_empty() {
            return Err(ConsentError::Validation("no attributes to store".to_string()));
        }
        validate_attributes(&attributes)?;
        let now = self.clock.now();
        self.write(|tx, events| {
            let locked = lock_consent(tx, consent_id)?;
            let existing = load_attributes(tx, consent_id)?;
            let dialect = tx.dialect();
            let mut previous = Map::new();
            for (key, value) in &attributes {
                if let Some(old) = existing.get(key) {
                    tx.execute(&statements::update_attribute(dialect, consent_id, key, value))?;
                    previous.insert(key.clone(), Value::String(old.clone()));
                } else {
                    tx.execute(&statements::insert_attribute(dialect, consent_id, key, value))?;
                    previous.insert(key.clone(), Value::Null);
                }
            }
            let touched =
                tx.execute(&statements::touch_consent(dialect, consent_id, now, locked.version))?;
            if touched == 0 {
                return Err(ConsentError::Conflict(format!(
                    "consent {consent_id} changed concurrently"
                )));
            }
            let mut changed = BTreeMap::new();
            changed.insert("attributes".to_string(), Value::Object(previous));
            self.snapshot(tx, consent_id, HISTORY_ATTRIBUTES, changed, now, events)
        })
    }

    // ------------------------------------------------------------------------
    // Status Changes
    // ------------------------------------------------------------------------

    /// Applies an audited status transition.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`], [`ConsentError::InvalidStateTransition`],
    /// [`ConsentError::Conflict`], or store errors.
    pub fn update_consent_status(
        &self,
        consent_id: &ConsentId,
        status: ConsentStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<ConsentResource, ConsentError> {
        self.transition(consent_id, status, actor, reason, false)
    }

    /// Revokes a consent and deactivates all of its mappings.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`], [`ConsentError::InvalidStateTransition`],
    /// [`ConsentError::Conflict`], or store errors.
    pub fn revoke_consent(
        &self,
        consent_id: &ConsentId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<ConsentResource, ConsentError> {
        self.transition(consent_id, ConsentStatus::Revoked, actor, reason, true)
    }

    /// Deletes every mapping under a consent's authorizations.
    ///
    /// Returns the number of mappings deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when targeting active tables and the
    /// consent is absent, and store errors otherwise.
    pub fn delete_consent_mappings(
        &self,
        consent_id: &ConsentId,
        tables: TableSet,
    ) -> Result<u64, ConsentError> {
        self.write(|tx, _events| {
            if tables == TableSet::Active {
                lock_consent(tx, consent_id)?;
            }
            let dialect = tx.dialect();
            Ok(tx.execute(&statements::delete_mappings_for_consent(dialect, consent_id, tables))?)
        })
    }

    /// Persists `EXPIRED` for every consent whose validity has passed.
    ///
    /// Each consent is expired in its own transaction. Consents another writer
    /// changed first are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] when listing fails or a non-race error occurs.
    pub fn expire_overdue_consents(&self) -> Result<SweepSummary, ConsentError> {
        let now = self.clock.now();
        let overdue = self.read(|tx| {
            let dialect = tx.dialect();
            let rows = tx.query(&statements::select_overdue_consents(dialect, now))?;
            rows.iter()
                .map(|row| row.text(0).map(ConsentId::new).map_err(ConsentError::from))
                .collect::<Result<Vec<_>, _>>()
        })?;
        let mut summary = SweepSummary::default();
        for consent_id in overdue {
            let outcome = self.write(|tx, events| {
                let record = apply_transition(
                    tx,
                    &self.recorder,
                    Transition {
                        consent_id: &consent_id,
                        target: ConsentStatus::Expired,
                        actor: SYSTEM_ACTOR,
                        reason: Some(EXPIRY_REASON),
                        now,
                    },
                )?;
                events.push(ConsentEvent::status_changed(&record));
                self.snapshot(tx, &consent_id, HISTORY_STATUS, status_delta(&record), now, events)
            });
            match outcome {
                Ok(()) => summary.expired.push(consent_id),
                Err(
                    err @ (ConsentError::Conflict(_)
                    | ConsentError::InvalidStateTransition { .. }
                    | ConsentError::NotFound(_)
                    | ConsentError::Transient(_)),
                ) => summary.skipped.push(SkippedConsent {
                    consent_id,
                    reason: err.to_string(),
                }),
                Err(err) => return Err(err),
            }
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Audit Reads & Retention
    // ------------------------------------------------------------------------

    /// Reads ledger rows ordered by consent id then sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Validation`] for an oversized page and store errors otherwise.
    pub fn get_status_audit_records(
        &self,
        query: &StatusAuditQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, ConsentError> {
        self.check_page(query.limit)?;
        self.read(|tx| self.recorder.status_audit_records(tx, query))
    }

    /// Reads a consent's history snapshots ordered by time.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn get_consent_history(
        &self,
        consent_id: &ConsentId,
        source: AuditSource,
    ) -> Result<Vec<ConsentHistoryResource>, ConsentError> {
        self.read(|tx| self.recorder.history(tx, consent_id, source))
    }

    /// Moves ledger and history rows older than `cutoff` into the retention tables.
    ///
    /// # Errors
    ///
    /// Returns store errors; nothing moves on failure.
    pub fn purge_retention(&self, cutoff: i64) -> Result<RetentionSummary, ConsentError> {
        let now = self.clock.now();
        self.write(|tx, events| {
            let summary = self.recorder.purge_retention(tx, cutoff)?;
            events.push(ConsentEvent::retention_purged(
                now,
                summary.moved_audit_rows.saturating_add(summary.moved_history_rows),
            ));
            Ok(summary)
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Runs `work` in a write transaction and publishes its events after commit.
    fn write<T, F>(&self, work: F) -> Result<T, ConsentError>
    where
        F: FnOnce(&mut dyn SqlTransaction, &mut Vec<ConsentEvent>) -> Result<T, ConsentError>,
    {
        let mut events = Vec::new();
        let value = run_in_transaction(self.backend.as_ref(), TransactionMode::Write, |tx| {
            work(tx, &mut events)
        })?;
        for event in &events {
            self.sink.record(event);
        }
        Ok(value)
    }

    /// Runs `work` in a read transaction.
    fn read<T, F>(&self, work: F) -> Result<T, ConsentError>
    where
        F: FnOnce(&mut dyn SqlTransaction) -> Result<T, ConsentError>,
    {
        run_in_transaction(self.backend.as_ref(), TransactionMode::Read, work)
    }

    /// Rejects pages above the configured maximum.
    fn check_page(&self, limit: Option<u64>) -> Result<(), ConsentError> {
        match (limit, self.options.max_page_size) {
            (Some(limit), Some(max)) if limit > max => Err(ConsentError::Validation(format!(
                "limit {limit} exceeds maximum page size {max}"
            ))),
            _ => Ok(()),
        }
    }

    /// Shared body of audited status changes.
    fn transition(
        &self,
        consent_id: &ConsentId,
        target: ConsentStatus,
        actor: &str,
        reason: Option<&str>,
        deactivate_mappings: bool,
    ) -> Result<ConsentResource, ConsentError> {
        require_text("actor", actor)?;
        let now = self.clock.now();
        let consent = self.write(|tx, events| {
            let record = apply_transition(
                tx,
                &self.recorder,
                Transition {
                    consent_id,
                    target,
                    actor,
                    reason,
                    now,
                },
            )?;
            if deactivate_mappings {
                let dialect = tx.dialect();
                tx.execute(&statements::update_mapping_status_for_consent(
                    dialect,
                    consent_id,
                    MappingStatus::Inactive,
                ))?;
            }
            events.push(ConsentEvent::status_changed(&record));
            self.snapshot(tx, consent_id, HISTORY_STATUS, status_delta(&record), now, events)?;
            load_consent(tx, consent_id, true)
        })?;
        Ok(ConsentResource {
            current_status: LifecycleStateMachine::effective_status(
                consent.current_status,
                consent.validity_time,
                now,
            ),
            ..consent
        })
    }

    /// Inserts a consent, its attributes, and its creation ledger row.
    fn insert_consent(
        &self,
        tx: &mut dyn SqlTransaction,
        request: NewConsent,
        now: i64,
        events: &mut Vec<ConsentEvent>,
    ) -> Result<ConsentResource, ConsentError> {
        let receipt_json = serde_json::to_string(&request.receipt)
            .map_err(|err| ConsentError::Validation(format!("receipt is not serializable: {err}")))?;
        let consent = ConsentResource {
            consent_id: ConsentId::generate(),
            client_id: request.client_id,
            receipt: request.receipt,
            consent_type: request.consent_type,
            current_status: ConsentStatus::Created,
            consent_frequency: request.consent_frequency,
            validity_time: request.validity_time,
            recurring_indicator: request.recurring_indicator,
            created_time: now,
            updated_time: now,
            attributes: request.attributes,
        };
        let dialect = tx.dialect();
        tx.execute(&statements::insert_consent(dialect, &consent, &receipt_json))?;
        for (key, value) in &consent.attributes {
            tx.execute(&statements::insert_attribute(dialect, &consent.consent_id, key, value))?;
        }
        let record = self.recorder.record_status_change(
            tx,
            &StatusChange {
                consent_id: &consent.consent_id,
                previous: None,
                current: ConsentStatus::Created,
                actor: &consent.client_id,
                timestamp: now,
                reason: None,
            },
        )?;
        events.push(ConsentEvent::status_changed(&record));
        Ok(consent)
    }

    /// Appends a history snapshot of the current aggregate when enabled.
    fn snapshot(
        &self,
        tx: &mut dyn SqlTransaction,
        consent_id: &ConsentId,
        reason: &str,
        changed: BTreeMap<String, Value>,
        now: i64,
        events: &mut Vec<ConsentEvent>,
    ) -> Result<(), ConsentError> {
        if !self.options.history_snapshots {
            return Ok(());
        }
        let detailed = load_required(tx, consent_id)?;
        let history = self.recorder.record_history_snapshot(tx, reason, detailed, changed, now)?;
        events.push(ConsentEvent::history_recorded(&history));
        Ok(())
    }
}

// ============================================================================
// SECTION: Row Helpers
// ============================================================================

/// Inserts one authorization resource.
fn insert_authorization(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
    authorization: NewAuthorization,
    status: AuthorizationStatus,
    auth_type: &str,
    now: i64,
) -> Result<AuthorizationResource, ConsentError> {
    let resource = AuthorizationResource {
        auth_id: authorization.auth_id.unwrap_or_else(AuthorizationId::generate),
        consent_id: consent_id.clone(),
        user_id: authorization.user_id,
        auth_status: status,
        auth_type: auth_type.to_string(),
        updated_time: now,
    };
    let dialect = tx.dialect();
    tx.execute(&statements::insert_authorization(dialect, &resource))?;
    Ok(resource)
}

/// Loads a detailed consent or fails with `NotFound`.
fn load_required(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
) -> Result<DetailedConsentResource, ConsentError> {
    load_detailed(tx, consent_id)?
        .ok_or_else(|| ConsentError::NotFound(format!("consent {consent_id}")))
}

/// Loads the consent row and, on request, its attributes.
fn load_consent(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
    with_attributes: bool,
) -> Result<ConsentResource, ConsentError> {
    let dialect = tx.dialect();
    let rows = tx.query(&statements::select_consent(dialect, consent_id))?;
    let row = rows.first().ok_or_else(|| ConsentError::NotFound(format!("consent {consent_id}")))?;
    let mut consent = decode_consent(row)?;
    if with_attributes {
        consent.attributes = load_attributes(tx, consent_id)?;
    }
    Ok(consent)
}

/// Loads a consent's attributes.
fn load_attributes(
    tx: &mut dyn SqlTransaction,
    consent_id: &ConsentId,
) -> Result<BTreeMap<String, String>, ConsentError> {
    let dialect = tx.dialect();
    let rows = tx.query(&statements::select_attributes(dialect, consent_id))?;
    let mut attributes = BTreeMap::new();
    for row in &rows {
        attributes.insert(row.text(0)?, row.opt_text(1)?.unwrap_or_default());
    }
    Ok(attributes)
}

/// Decodes a consent row in [`statements::CONSENT_COLUMNS`] order.
fn decode_consent(row: &SqlRow) -> Result<ConsentResource, ConsentError> {
    let consent_id = row.text(0)?;
    let receipt = serde_json::from_str(&row.text(1)?).map_err(|err| {
        ConsentError::Store(format!("consent {consent_id}: corrupt receipt: {err}"))
    })?;
    let label = row.text(6)?;
    let current_status = ConsentStatus::from_label(&label).ok_or_else(|| {
        ConsentError::Store(format!("consent {consent_id}: unknown status {label}"))
    })?;
    Ok(ConsentResource {
        consent_id: ConsentId::new(consent_id),
        receipt,
        created_time: row.integer(2)?,
        updated_time: row.integer(3)?,
        client_id: row.text(4)?,
        consent_type: row.text(5)?,
        current_status,
        consent_frequency: row.integer(7)?,
        validity_time: row.integer(8)?,
        recurring_indicator: row.integer(9)? != 0,
        attributes: BTreeMap::new(),
    })
}

/// Decodes an authorization row in [`statements::AUTH_COLUMNS`] order.
fn decode_authorization(row: &SqlRow) -> Result<AuthorizationResource, ConsentError> {
    let auth_id = row.text(0)?;
    let label = row.text(3)?;
    let auth_status = AuthorizationStatus::from_label(&label).ok_or_else(|| {
        ConsentError::Store(format!("authorization {auth_id}: unknown status {label}"))
    })?;
    Ok(AuthorizationResource {
        auth_id: AuthorizationId::new(auth_id),
        consent_id: ConsentId::new(row.text(1)?),
        user_id: row.opt_text(2)?.filter(|user_id| !user_id.is_empty()),
        auth_status,
        auth_type: row.text(4)?,
        updated_time: row.integer(5)?,
    })
}

/// Applies lazy expiry to a detailed consent.
fn with_effective_status(mut detailed: DetailedConsentResource, now: i64) -> DetailedConsentResource {
    apply_effective_status(&mut detailed, now);
    detailed
}

/// Builds the history delta for a status transition.
fn status_delta(record: &ConsentStatusAuditRecord) -> BTreeMap<String, Value> {
    let previous = record
        .previous_status
        .map_or(Value::Null, |status| Value::String(status.as_str().to_string()));
    let mut changed = BTreeMap::new();
    changed.insert("currentStatus".to_string(), previous);
    changed
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates caller-supplied consent fields.
fn validate_new_consent(consent: &NewConsent, now: i64) -> Result<(), ConsentError> {
    require_text("clientId", &consent.client_id)?;
    require_text("consentType", &consent.consent_type)?;
    if consent.receipt.is_null() {
        return Err(ConsentError::Validation("receipt is required".to_string()));
    }
    if consent.consent_frequency < 0 {
        return Err(ConsentError::Validation("consentFrequency must not be negative".to_string()));
    }
    if consent.validity_time < 0 || (consent.validity_time > 0 && consent.validity_time <= now) {
        return Err(ConsentError::Validation(format!(
            "validityTime {} must be zero or in the future",
            consent.validity_time
        )));
    }
    validate_attributes(&consent.attributes)
}

/// Validates caller-supplied authorization fields.
fn validate_new_authorization(authorization: &NewAuthorization) -> Result<(), ConsentError> {
    if let Some(auth_id) = &authorization.auth_id {
        require_text("authId", auth_id.as_str())?;
    }
    if let Some(user_id) = &authorization.user_id {
        require_text("userId", user_id)?;
    }
    Ok(())
}

/// Validates attribute keys and values.
fn validate_attributes(attributes: &BTreeMap<String, String>) -> Result<(), ConsentError> {
    for (key, value) in attributes {
        require_text("attribute key", key)?;
        check_delimiter("attribute value", value)?;
    }
    Ok(())
}

/// Requires non-blank text free of the aggregation delimiter.
fn require_text(field: &str, value: &str) -> Result<(), ConsentError> {
    if value.trim().is_empty() {
        return Err(ConsentError::Validation(format!("{field} is required")));
    }
    check_delimiter(field, value)
}

/// Rejects text that would not split back out of an aggregated column.
///
/// Besides the delimiter itself, a `|` at either edge merges with the
/// neighbouring delimiter once tokens are joined.
fn check_delimiter(field: &str, value: &str) -> Result<(), ConsentError> {
    if value.contains(AGGREGATE_DELIMITER) {
        return Err(ConsentError::Validation(format!(
            "{field} must not contain {AGGREGATE_DELIMITER}"
        )));
    }
    if value.starts_with('|') || value.ends_with('|') {
        return Err(ConsentError::Validation(format!(
            "{field} must not start or end with |"
        )));
    }
    Ok(())
}
