// crates/consent-mgt-store-sqlite/tests/consent_store.rs
// ============================================================================
// Module: SQLite Consent Store Tests
// Description: End-to-end consent operations against a real SQLite file.
// Purpose: Validate transactional writes, audit ledger, search, expiry, and retention.
// ============================================================================

//! ## Overview
//! Drives [`ConsentStore`] over [`SqliteConsentBackend`] with a fixed clock:
//! - Authorization and binding flow with ledger rows
//! - Illegal transitions, missing records, and rollback on audit failure
//! - Search filters and deterministic pagination
//! - Lazy expiry, the expiry sweep, and retention purges
//! - Concurrent binds on one authorization

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use consent_mgt_core::AuditSource;
use consent_mgt_core::AuthorizableConsentRequest;
use consent_mgt_core::AuthorizationId;
use consent_mgt_core::AuthorizationStatus;
use consent_mgt_core::BindResourcesRequest;
use consent_mgt_core::Clock;
use consent_mgt_core::ConsentError;
use consent_mgt_core::ConsentEvent;
use consent_mgt_core::ConsentEventSink;
use consent_mgt_core::ConsentId;
use consent_mgt_core::ConsentSearchQuery;
use consent_mgt_core::ConsentStatus;
use consent_mgt_core::ConsentStore;
use consent_mgt_core::ConsentStoreOptions;
use consent_mgt_core::DetailedConsentResource;
use consent_mgt_core::FixedClock;
use consent_mgt_core::MappingStatus;
use consent_mgt_core::NewAuthorization;
use consent_mgt_core::NewConsent;
use consent_mgt_core::ResourcePermission;
use consent_mgt_core::SqlBackend;
use consent_mgt_core::StatusAuditQuery;
use consent_mgt_core::TableSet;
use consent_mgt_core::runtime::store::EXPIRY_REASON;
use consent_mgt_core::runtime::store::SYSTEM_ACTOR;
use consent_mgt_store_sqlite::SqliteConsentBackend;
use consent_mgt_store_sqlite::SqliteStoreConfig;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const START: i64 = 1_700_000_000;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ConsentEvent>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|event| event.event).collect()
    }
}

impl ConsentEventSink for RecordingSink {
    fn record(&self, event: &ConsentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    _dir: TempDir,
    path: PathBuf,
    clock: Arc<FixedClock>,
    sink: Arc<RecordingSink>,
    store: ConsentStore,
}

fn harness(options: ConsentStoreOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("consent.db");
    let backend: Arc<dyn SqlBackend> =
        Arc::new(SqliteConsentBackend::open(SqliteStoreConfig::new(&path)).unwrap());
    let clock = Arc::new(FixedClock::new(START));
    let sink = Arc::new(RecordingSink::default());
    let clock_handle: Arc<dyn Clock> = clock.clone();
    let sink_handle: Arc<dyn ConsentEventSink> = sink.clone();
    let store = ConsentStore::new(backend, clock_handle, sink_handle, options);
    Harness {
        _dir: dir,
        path,
        clock,
        sink,
        store,
    }
}

fn receipt() -> serde_json::Value {
    json!({"permissions": ["ReadAccountsBasic", "ReadBalances"]})
}

fn awaiting_consent(store: &ConsentStore, client_id: &str) -> DetailedConsentResource {
    store
        .create_authorizable_consent(AuthorizableConsentRequest {
            consent: NewConsent::new(client_id, "accounts", receipt()),
            authorization: None,
            initial_auth_status: AuthorizationStatus::Created,
            auth_type: "authorization".to_string(),
            generate_auth_id: true,
        })
        .unwrap()
}

fn authorized_consent(store: &ConsentStore, user_id: &str, accounts: &[&str]) -> DetailedConsentResource {
    let created = awaiting_consent(store, "app1");
    let auth_id = created.authorizations[0].auth_id.clone();
    store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            created.consent.consent_id,
            auth_id,
            user_id,
            accounts.iter().map(|account| ResourcePermission::primary(*account)).collect(),
            true,
        ))
        .unwrap()
}

fn ledger(store: &ConsentStore, consent_id: &ConsentId, source: AuditSource) -> Vec<(Option<ConsentStatus>, ConsentStatus)> {
    store
        .get_status_audit_records(&StatusAuditQuery {
            consent_ids: vec![consent_id.clone()],
            source,
            ..StatusAuditQuery::default()
        })
        .unwrap()
        .into_iter()
        .map(|record| (record.previous_status, record.current_status))
        .collect()
}

// ============================================================================
// SECTION: Authorization Flow
// ============================================================================

#[test]
fn approval_flow_binds_accounts_and_records_transition() {
    let h = harness(ConsentStoreOptions::default());
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    assert_eq!(consent.current_status, ConsentStatus::Created);

    let mut attributes = BTreeMap::new();
    attributes.insert("idempotencyKey".to_string(), "K1".to_string());
    h.store.store_consent_attributes(&consent.consent_id, attributes).unwrap();

    let auth = h
        .store
        .create_authorization(
            &consent.consent_id,
            NewAuthorization {
                auth_id: Some(AuthorizationId::new("A1")),
                user_id: None,
            },
            "authorization",
        )
        .unwrap();
    assert_eq!(auth.auth_status, AuthorizationStatus::Created);

    h.clock.advance(30);
    let detailed = h
        .store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            consent.consent_id.clone(),
            auth.auth_id.clone(),
            "u1",
            vec![ResourcePermission::primary("acc-1"), ResourcePermission::primary("acc-2")],
            true,
        ))
        .unwrap();

    assert_eq!(detailed.consent.current_status, ConsentStatus::Authorized);
    assert_eq!(detailed.consent.updated_time, START + 30);
    assert_eq!(detailed.consent.attributes.get("idempotencyKey").map(String::as_str), Some("K1"));
    let bound = detailed.authorization(&auth.auth_id).unwrap();
    assert_eq!(bound.auth_status, AuthorizationStatus::Authorized);
    assert_eq!(bound.user_id.as_deref(), Some("u1"));
    let mut accounts: Vec<&str> =
        detailed.mappings_for(&auth.auth_id).map(|mapping| mapping.account_id.as_str()).collect();
    accounts.sort_unstable();
    assert_eq!(accounts, vec!["acc-1", "acc-2"]);

    let records = h
        .store
        .get_status_audit_records(&StatusAuditQuery {
            consent_ids: vec![consent.consent_id.clone()],
            ..StatusAuditQuery::default()
        })
        .unwrap();
    let sequences: Vec<i64> = records.iter().map(|record| record.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    let last = records.last().unwrap();
    assert_eq!(last.previous_status, Some(ConsentStatus::AwaitingAuthorization));
    assert_eq!(last.current_status, ConsentStatus::Authorized);
    assert_eq!(last.action_by, "u1");
    assert_eq!(last.action_time, START + 30);
    assert_eq!(
        records.iter().filter(|record| record.current_status == ConsentStatus::Authorized).count(),
        1
    );
}

#[test]
fn creation_writes_ledger_row_without_previous_status() {
    let h = harness(ConsentStoreOptions::default());
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    let records = h
        .store
        .get_status_audit_records(&StatusAuditQuery {
            consent_ids: vec![consent.consent_id.clone()],
            ..StatusAuditQuery::default()
        })
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].previous_status, None);
    assert_eq!(records[0].current_status, ConsentStatus::Created);
    assert_eq!(records[0].action_by, "app1");
    assert_eq!(h.sink.names(), vec!["consent_status_changed"]);
}

#[test]
fn rejection_records_rejected_status() {
    let h = harness(ConsentStoreOptions::default());
    let created = awaiting_consent(&h.store, "app1");
    let auth_id = created.authorizations[0].auth_id.clone();
    let detailed = h
        .store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            created.consent.consent_id.clone(),
            auth_id.clone(),
            "u1",
            Vec::new(),
            false,
        ))
        .unwrap();
    assert_eq!(detailed.consent.current_status, ConsentStatus::Rejected);
    assert_eq!(detailed.authorization(&auth_id).unwrap().auth_status, AuthorizationStatus::Rejected);
    assert!(detailed.mappings.is_empty());
}

#[test]
fn supplied_authorization_without_id_is_rejected_when_not_generating() {
    let h = harness(ConsentStoreOptions::default());
    let err = h
        .store
        .create_authorizable_consent(AuthorizableConsentRequest {
            consent: NewConsent::new("app1", "accounts", receipt()),
            authorization: Some(NewAuthorization::default()),
            initial_auth_status: AuthorizationStatus::Created,
            auth_type: "authorization".to_string(),
            generate_auth_id: false,
        })
        .unwrap_err();
    assert!(matches!(err, ConsentError::Validation(_)), "{err:?}");
    assert!(h.store.search_consents(&ConsentSearchQuery::default()).unwrap().is_empty());
}

#[test]
fn duplicate_authorization_id_conflicts() {
    let h = harness(ConsentStoreOptions::default());
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    let request = NewAuthorization {
        auth_id: Some(AuthorizationId::new("A1")),
        user_id: None,
    };
    h.store.create_authorization(&consent.consent_id, request.clone(), "authorization").unwrap();
    let err = h
        .store
        .create_authorization(&consent.consent_id, request, "authorization")
        .unwrap_err();
    assert!(matches!(err, ConsentError::Conflict(_)), "{err:?}");
}

// ============================================================================
// SECTION: Failures
// ============================================================================

#[test]
fn illegal_transition_leaves_consent_unchanged() {
    let h = harness(ConsentStoreOptions::default());
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    let err = h
        .store
        .update_consent_status(&consent.consent_id, ConsentStatus::Authorized, "u1", None)
        .unwrap_err();
    assert_eq!(
        err,
        ConsentError::InvalidStateTransition {
            from: "CREATED".to_string(),
            to: "AUTHORIZED".to_string(),
        }
    );
    let stored = h.store.get_consent(&consent.consent_id, false).unwrap();
    assert_eq!(stored.current_status, ConsentStatus::Created);
    assert_eq!(ledger(&h.store, &consent.consent_id, AuditSource::Active).len(), 1);
}

#[test]
fn missing_records_report_not_found() {
    let h = harness(ConsentStoreOptions::default());
    let missing = ConsentId::new("missing");
    assert!(matches!(h.store.get_consent(&missing, true), Err(ConsentError::NotFound(_))));
    assert!(matches!(h.store.get_detailed_consent(&missing), Err(ConsentError::NotFound(_))));
    assert!(matches!(
        h.store.update_consent_status(&missing, ConsentStatus::Revoked, "u1", None),
        Err(ConsentError::NotFound(_))
    ));
    assert!(matches!(
        h.store.get_authorization(&AuthorizationId::new("missing")),
        Err(ConsentError::NotFound(_))
    ));
    assert!(matches!(
        h.store.delete_consent_mappings(&missing, TableSet::Active),
        Err(ConsentError::NotFound(_))
    ));
    assert_eq!(h.store.delete_consent_mappings(&missing, TableSet::Retention).unwrap(), 0);
}

#[test]
fn binding_foreign_authorization_is_not_found() {
    let h = harness(ConsentStoreOptions::default());
    let first = awaiting_consent(&h.store, "app1");
    let second = awaiting_consent(&h.store, "app1");
    let err = h
        .store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            first.consent.consent_id.clone(),
            second.authorizations[0].auth_id.clone(),
            "u1",
            vec![ResourcePermission::primary("acc-1")],
            true,
        ))
        .unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)), "{err:?}");
    let untouched = h.store.get_detailed_consent(&second.consent.consent_id).unwrap();
    assert_eq!(untouched.authorizations[0].auth_status, AuthorizationStatus::Created);
}

#[test]
fn audit_failure_rolls_back_status_change() {
    let h = harness(ConsentStoreOptions::default());
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    let events_before = h.sink.names().len();
    {
        let raw = Connection::open(&h.path).unwrap();
        raw.execute_batch("DROP TABLE OB_CONSENT_STATUS_AUDIT;").unwrap();
    }
    let err = h
        .store
        .update_consent_status(
            &consent.consent_id,
            ConsentStatus::AwaitingAuthorization,
            SYSTEM_ACTOR,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, ConsentError::Store(_)), "{err:?}");
    let stored = h.store.get_consent(&consent.consent_id, false).unwrap();
    assert_eq!(stored.current_status, ConsentStatus::Created);
    assert_eq!(h.sink.names().len(), events_before);
}

#[test]
fn delimiter_in_input_is_rejected() {
    let h = harness(ConsentStoreOptions::default());
    let err = h
        .store
        .create_consent(NewConsent::new("app||1", "accounts", receipt()))
        .unwrap_err();
    assert!(matches!(err, ConsentError::Validation(_)));
    let consent =
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    let mut attributes = BTreeMap::new();
    attributes.insert("key".to_string(), "a||b".to_string());
    assert!(matches!(
        h.store.store_consent_attributes(&consent.consent_id, attributes),
        Err(ConsentError::Validation(_))
    ));
}

#[test]
fn pipe_at_field_edge_is_rejected() {
    let h = harness(ConsentStoreOptions::default());
    let created = awaiting_consent(&h.store, "app1");
    let consent_id = created.consent.consent_id.clone();
    let err = h
        .store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            consent_id.clone(),
            created.authorizations[0].auth_id.clone(),
            "u1",
            vec![ResourcePermission::primary("acc|"), ResourcePermission::primary("acc2|")],
            true,
        ))
        .unwrap_err();
    assert!(matches!(err, ConsentError::Validation(ref message) if message.contains("accountId")));

    for (key, value) in [("a", "v|"), ("|a", "v"), ("a|", "v"), ("a", "|v")] {
        let mut attributes = BTreeMap::new();
        attributes.insert(key.to_string(), value.to_string());
        attributes.insert("b".to_string(), "w".to_string());
        assert!(
            matches!(
                h.store.store_consent_attributes(&consent_id, attributes),
                Err(ConsentError::Validation(_))
            ),
            "{key}={value}"
        );
    }

    let mut attributes = BTreeMap::new();
    attributes.insert("a".to_string(), "v|w".to_string());
    attributes.insert("b".to_string(), "w".to_string());
    h.store.store_consent_attributes(&consent_id, attributes).unwrap();
    let detailed = h.store.get_detailed_consent(&consent_id).unwrap();
    assert_eq!(detailed.consent.attributes.get("a").map(String::as_str), Some("v|w"));
    assert_eq!(detailed.consent.attributes.get("b").map(String::as_str), Some("w"));
    assert_eq!(detailed.consent.current_status, ConsentStatus::AwaitingAuthorization);
}

// ============================================================================
// SECTION: Attributes
// ============================================================================

#[test]
fn attributes_upsert_existing_and_new_keys() {
    let h = harness(ConsentStoreOptions::default());
    let mut request = NewConsent::new("app1", "accounts", receipt());
    request.attributes.insert("a".to_string(), "1".to_string());
    let consent = h.store.create_consent(request).unwrap();

    h.clock.advance(5);
    let mut update = BTreeMap::new();
    update.insert("a".to_string(), "2".to_string());
    update.insert("b".to_string(), "3".to_string());
    h.store.store_consent_attributes(&consent.consent_id, update).unwrap();

    let stored = h.store.get_consent(&consent.consent_id, true).unwrap();
    assert_eq!(stored.attributes.get("a").map(String::as_str), Some("2"));
    assert_eq!(stored.attributes.get("b").map(String::as_str), Some("3"));
    assert_eq!(stored.updated_time, START + 5);
    assert!(h.store.get_consent(&consent.consent_id, false).unwrap().attributes.is_empty());
    assert!(matches!(
        h.store.store_consent_attributes(&consent.consent_id, BTreeMap::new()),
        Err(ConsentError::Validation(_))
    ));
}

// ============================================================================
// SECTION: Search
// ============================================================================

#[test]
fn user_filter_narrows_and_cleared_filter_is_superset() {
    let h = harness(ConsentStoreOptions::default());
    let for_u1 = authorized_consent(&h.store, "u1", &["acc-1"]);
    let for_u2 = authorized_consent(&h.store, "u2", &["acc-2"]);
    let unbound = h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();

    let filtered = h
        .store
        .search_consents(&ConsentSearchQuery {
            user_id: Some("u1".to_string()),
            ..ConsentSearchQuery::default()
        })
        .unwrap();
    let filtered_ids: Vec<&ConsentId> =
        filtered.iter().map(|detailed| &detailed.consent.consent_id).collect();
    assert_eq!(filtered_ids, vec![&for_u1.consent.consent_id]);
    assert_eq!(filtered[0].mappings.len(), 1);

    let all = h.store.search_consents(&ConsentSearchQuery::default()).unwrap();
    let all_ids: Vec<&ConsentId> = all.iter().map(|detailed| &detailed.consent.consent_id).collect();
    for id in &filtered_ids {
        assert!(all_ids.contains(id));
    }
    assert!(all_ids.contains(&&for_u2.consent.consent_id));
    assert!(all_ids.contains(&&unbound.consent_id));
    assert_eq!(all.len(), 3);
}

#[test]
fn search_filters_by_status_client_and_date_range() {
    let h = harness(ConsentStoreOptions::default());
    let early = h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    h.clock.advance(100);
    let late = h.store.create_consent(NewConsent::new("app2", "payments", receipt())).unwrap();

    let by_client = h
        .store
        .search_consents(&ConsentSearchQuery {
            client_ids: vec!["app2".to_string()],
            ..ConsentSearchQuery::default()
        })
        .unwrap();
    assert_eq!(by_client.len(), 1);
    assert_eq!(by_client[0].consent.consent_id, late.consent_id);

    let by_range = h
        .store
        .search_consents(&ConsentSearchQuery {
            from_time: Some(START),
            to_time: Some(START + 50),
            ..ConsentSearchQuery::default()
        })
        .unwrap();
    assert_eq!(by_range.len(), 1);
    assert_eq!(by_range[0].consent.consent_id, early.consent_id);

    let by_status = h
        .store
        .search_consents(&ConsentSearchQuery {
            consent_statuses: vec![ConsentStatus::Authorized],
            ..ConsentSearchQuery::default()
        })
        .unwrap();
    assert!(by_status.is_empty());

    let inverted = h.store.search_consents(&ConsentSearchQuery {
        from_time: Some(START + 10),
        to_time: Some(START),
        ..ConsentSearchQuery::default()
    });
    assert!(matches!(inverted, Err(ConsentError::Validation(_))));
}

#[test]
fn pages_are_disjoint_and_follow_full_ordering() {
    let h = harness(ConsentStoreOptions::default());
    for index in 0 .. 25 {
        if index % 2 == 0 {
            h.clock.advance(1);
        }
        h.store.create_consent(NewConsent::new("app1", "accounts", receipt())).unwrap();
    }
    let full = h.store.search_consents(&ConsentSearchQuery::default()).unwrap();
    assert_eq!(full.len(), 25);
    let ordered = full.windows(2).all(|pair| {
        let (a, b) = (&pair[0].consent, &pair[1].consent);
        a.updated_time > b.updated_time
            || (a.updated_time == b.updated_time && a.consent_id < b.consent_id)
    });
    assert!(ordered);

    let mut paged = Vec::new();
    for page in 0 .. 3 {
        let rows = h
            .store
            .search_consents(&ConsentSearchQuery {
                limit: Some(10),
                offset: Some(page * 10),
                ..ConsentSearchQuery::default()
            })
            .unwrap();
        assert_eq!(rows.len(), if page < 2 { 10 } else { 5 });
        paged.extend(rows.into_iter().map(|detailed| detailed.consent.consent_id));
    }
    let full_ids: Vec<ConsentId> = full.into_iter().map(|detailed| detailed.consent.consent_id).collect();
    assert_eq!(paged, full_ids);
}

#[test]
fn oversized_page_is_rejected() {
    let h = harness(ConsentStoreOptions {
        history_snapshots: false,
        max_page_size: Some(5),
    });
    let query = ConsentSearchQuery {
        limit: Some(6),
        ..ConsentSearchQuery::default()
    };
    assert!(matches!(h.store.search_consents(&query), Err(ConsentError::Validation(_))));
    let audit = StatusAuditQuery {
        limit: Some(6),
        ..StatusAuditQuery::default()
    };
    assert!(matches!(h.store.get_status_audit_records(&audit), Err(ConsentError::Validation(_))));
}

// ============================================================================
// SECTION: Revocation & Mappings
// ============================================================================

#[test]
fn revocation_deactivates_mappings_and_is_terminal() {
    let h = harness(ConsentStoreOptions::default());
    let detailed = authorized_consent(&h.store, "u1", &["acc-1", "acc-2"]);
    let consent_id = detailed.consent.consent_id.clone();
    h.clock.advance(60);
    let revoked = h.store.revoke_consent(&consent_id, "u1", Some("customer request")).unwrap();
    assert_eq!(revoked.current_status, ConsentStatus::Revoked);

    let after = h.store.get_detailed_consent(&consent_id).unwrap();
    assert_eq!(after.mappings.len(), 2);
    assert!(after.mappings.iter().all(|mapping| mapping.mapping_status == MappingStatus::Inactive));

    let err = h.store.revoke_consent(&consent_id, "u1", None).unwrap_err();
    assert!(matches!(err, ConsentError::InvalidStateTransition { .. }));
    let rows = ledger(&h.store, &consent_id, AuditSource::Active);
    assert_eq!(rows.last(), Some(&(Some(ConsentStatus::Authorized), ConsentStatus::Revoked)));
}

#[test]
fn deleting_mappings_reports_count() {
    let h = harness(ConsentStoreOptions::default());
    let detailed = authorized_consent(&h.store, "u1", &["acc-1", "acc-2", "acc-3"]);
    let consent_id = detailed.consent.consent_id;
    assert_eq!(h.store.delete_consent_mappings(&consent_id, TableSet::Active).unwrap(), 3);
    assert!(h.store.get_detailed_consent(&consent_id).unwrap().mappings.is_empty());
    assert_eq!(h.store.delete_consent_mappings(&consent_id, TableSet::Active).unwrap(), 0);
}

// ============================================================================
// SECTION: Expiry
// ============================================================================

#[test]
fn lapsed_consent_reads_expired_until_swept() {
    let h = harness(ConsentStoreOptions::default());
    let mut request = NewConsent::new("app1", "accounts", receipt());
    request.validity_time = START + 100;
    let consent = h.store.create_consent(request).unwrap();
    h.clock.advance(200);

    assert_eq!(
        h.store.get_consent(&consent.consent_id, false).unwrap().current_status,
        ConsentStatus::Expired
    );
    let by_status = |status: ConsentStatus| {
        h.store
            .search_consents(&ConsentSearchQuery {
                consent_statuses: vec![status],
                ..ConsentSearchQuery::default()
            })
            .unwrap()
    };
    assert!(by_status(ConsentStatus::Created).is_empty());
    let lapsed = by_status(ConsentStatus::Expired);
    assert_eq!(lapsed.len(), 1);
    assert_eq!(lapsed[0].consent.current_status, ConsentStatus::Expired);

    let err = h
        .store
        .create_authorization(&consent.consent_id, NewAuthorization::default(), "authorization")
        .unwrap_err();
    assert!(matches!(err, ConsentError::InvalidStateTransition { .. }));

    let summary = h.store.expire_overdue_consents().unwrap();
    assert_eq!(summary.expired, vec![consent.consent_id.clone()]);
    assert!(summary.skipped.is_empty());

    let records = h
        .store
        .get_status_audit_records(&StatusAuditQuery {
            consent_ids: vec![consent.consent_id.clone()],
            ..StatusAuditQuery::default()
        })
        .unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.previous_status, Some(ConsentStatus::Created));
    assert_eq!(last.current_status, ConsentStatus::Expired);
    assert_eq!(last.action_by, SYSTEM_ACTOR);
    assert_eq!(last.reason.as_deref(), Some(EXPIRY_REASON));

    assert!(h.store.expire_overdue_consents().unwrap().expired.is_empty());
}

#[test]
fn status_search_matches_effective_status() {
    let h = harness(ConsentStoreOptions::default());
    let created = awaiting_consent(&h.store, "app1");
    let mut request = NewConsent::new("app1", "accounts", receipt());
    request.validity_time = START + 10;
    let lapsing = h
        .store
        .create_authorizable_consent(AuthorizableConsentRequest {
            consent: request,
            authorization: None,
            initial_auth_status: AuthorizationStatus::Created,
            auth_type: "authorization".to_string(),
            generate_auth_id: true,
        })
        .unwrap();
    h.store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            lapsing.consent.consent_id.clone(),
            lapsing.authorizations[0].auth_id.clone(),
            "u1",
            vec![ResourcePermission::primary("acc-1")],
            true,
        ))
        .unwrap();
    let open_ended = authorized_consent(&h.store, "u1", &["acc-2"]);
    h.clock.advance(20);

    let search = |statuses: Vec<ConsentStatus>| -> Vec<(ConsentId, ConsentStatus)> {
        h.store
            .search_consents(&ConsentSearchQuery {
                consent_statuses: statuses,
                ..ConsentSearchQuery::default()
            })
            .unwrap()
            .into_iter()
            .map(|detailed| (detailed.consent.consent_id, detailed.consent.current_status))
            .collect()
    };
    assert_eq!(
        search(vec![ConsentStatus::Authorized]),
        vec![(open_ended.consent.consent_id.clone(), ConsentStatus::Authorized)]
    );
    assert_eq!(
        search(vec![ConsentStatus::Expired]),
        vec![(lapsing.consent.consent_id.clone(), ConsentStatus::Expired)]
    );
    assert_eq!(
        search(vec![ConsentStatus::AwaitingAuthorization]),
        vec![(created.consent.consent_id.clone(), ConsentStatus::AwaitingAuthorization)]
    );
    assert_eq!(search(vec![ConsentStatus::Authorized, ConsentStatus::Expired]).len(), 2);

    h.store.revoke_consent(&open_ended.consent.consent_id, "ops", None).unwrap();
    h.store.expire_overdue_consents().unwrap();
    assert_eq!(
        search(vec![ConsentStatus::Expired]),
        vec![(lapsing.consent.consent_id.clone(), ConsentStatus::Expired)]
    );
    assert_eq!(
        search(vec![ConsentStatus::Revoked]),
        vec![(open_ended.consent.consent_id, ConsentStatus::Revoked)]
    );
}

#[test]
fn past_validity_is_rejected_at_creation() {
    let h = harness(ConsentStoreOptions::default());
    let mut request = NewConsent::new("app1", "accounts", receipt());
    request.validity_time = START - 1;
    assert!(matches!(h.store.create_consent(request), Err(ConsentError::Validation(_))));
}

// ============================================================================
// SECTION: History & Retention
// ============================================================================

#[test]
fn history_snapshots_record_previous_values() {
    let h = harness(ConsentStoreOptions {
        history_snapshots: true,
        max_page_size: None,
    });
    let detailed = authorized_consent(&h.store, "u1", &["acc-1"]);
    let consent_id = detailed.consent.consent_id;
    let history = h.store.get_consent_history(&consent_id, AuditSource::Active).unwrap();
    assert_eq!(history.len(), 2);
    let bound = &history[1];
    assert_eq!(bound.changed_attributes.get("currentStatus"), Some(&json!("AWAITING_AUTHORIZATION")));
    assert_eq!(bound.detailed_consent.consent.current_status, ConsentStatus::Authorized);
    assert_eq!(bound.detailed_consent.mappings.len(), 1);
    assert!(h.sink.names().contains(&"consent_history_recorded"));
}

#[test]
fn retention_purge_keeps_latest_ledger_row() {
    let h = harness(ConsentStoreOptions {
        history_snapshots: true,
        max_page_size: None,
    });
    let detailed = authorized_consent(&h.store, "u1", &["acc-1"]);
    let consent_id = detailed.consent.consent_id;
    h.clock.advance(1_000);
    h.store.revoke_consent(&consent_id, "u1", None).unwrap();

    let summary = h.store.purge_retention(START + 500).unwrap();
    assert_eq!(summary.moved_audit_rows, 3);
    assert_eq!(summary.moved_history_rows, 2);

    let active = ledger(&h.store, &consent_id, AuditSource::Active);
    assert_eq!(active, vec![(Some(ConsentStatus::Authorized), ConsentStatus::Revoked)]);
    assert_eq!(ledger(&h.store, &consent_id, AuditSource::Retention).len(), 3);
    assert_eq!(ledger(&h.store, &consent_id, AuditSource::All).len(), 4);
    assert_eq!(h.store.get_consent_history(&consent_id, AuditSource::Active).unwrap().len(), 1);
    assert_eq!(h.store.get_consent_history(&consent_id, AuditSource::All).unwrap().len(), 3);
    assert_eq!(h.sink.names().last(), Some(&"audit_retention_purged"));

    let again = h.store.purge_retention(START + 500).unwrap();
    assert_eq!(again.moved_audit_rows, 0);
    assert_eq!(again.moved_history_rows, 0);
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

#[test]
fn concurrent_binds_on_one_authorization_admit_one_winner() {
    let h = harness(ConsentStoreOptions::default());
    let created = awaiting_consent(&h.store, "app1");
    let consent_id = created.consent.consent_id.clone();
    let auth_id = created.authorizations[0].auth_id.clone();

    let outcomes: Vec<Result<DetailedConsentResource, ConsentError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0 .. 6)
            .map(|worker| {
                let store = h.store.clone();
                let consent_id = consent_id.clone();
                let auth_id = auth_id.clone();
                scope.spawn(move || {
                    store.bind_resources_to_consent(BindResourcesRequest::from_approval(
                        consent_id,
                        auth_id,
                        format!("user-{worker}"),
                        vec![ResourcePermission::primary(format!("acc-{worker}"))],
                        true,
                    ))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(err, ConsentError::InvalidStateTransition { .. } | ConsentError::Conflict(_)),
                "{err:?}"
            );
        }
    }
    let stored = h.store.get_detailed_consent(&consent_id).unwrap();
    assert_eq!(stored.consent.current_status, ConsentStatus::Authorized);
    assert_eq!(stored.mappings.len(), 1);
    let authorized = ledger(&h.store, &consent_id, AuditSource::Active)
        .into_iter()
        .filter(|(_, current)| *current == ConsentStatus::Authorized)
        .count();
    assert_eq!(authorized, 1);
}
