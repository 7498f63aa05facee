// crates/consent-mgt-store-postgres/tests/postgres_consent_store.rs
// ============================================================================
// Module: Postgres Consent Store Tests
// Description: Consent flow against a live Postgres database.
// Purpose: Validate placeholder rendering, aggregation, and row locks on Postgres.
// ============================================================================

//! ## Overview
//! These tests run only when `CONSENT_MGT_POSTGRES_URL` names a reachable
//! database; otherwise each test returns early. Identifiers are random, so
//! repeated runs against one database do not collide.

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

use std::sync::Arc;
use std::thread;

use consent_mgt_core::AuditSource;
use consent_mgt_core::AuthorizableConsentRequest;
use consent_mgt_core::AuthorizationStatus;
use consent_mgt_core::BindResourcesRequest;
use consent_mgt_core::ConsentError;
use consent_mgt_core::ConsentId;
use consent_mgt_core::ConsentSearchQuery;
use consent_mgt_core::ConsentStatus;
use consent_mgt_core::ConsentStore;
use consent_mgt_core::ConsentStoreOptions;
use consent_mgt_core::DetailedConsentResource;
use consent_mgt_core::FixedClock;
use consent_mgt_core::NewConsent;
use consent_mgt_core::NoopEventSink;
use consent_mgt_core::ResourcePermission;
use consent_mgt_core::SqlBackend;
use consent_mgt_core::StatusAuditQuery;
use consent_mgt_store_postgres::PostgresConsentBackend;
use consent_mgt_store_postgres::PostgresStoreConfig;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const URL_ENV: &str = "CONSENT_MGT_POSTGRES_URL";

fn store() -> Option<ConsentStore> {
    let Ok(connection) = std::env::var(URL_ENV) else {
        eprintln!("skipping: {URL_ENV} not set");
        return None;
    };
    let config = PostgresStoreConfig {
        connection,
        max_connections: 4,
        ..PostgresStoreConfig::default()
    };
    let backend: Arc<dyn SqlBackend> = Arc::new(PostgresConsentBackend::open(&config).unwrap());
    Some(ConsentStore::new(
        backend,
        Arc::new(FixedClock::new(1_700_000_000)),
        Arc::new(NoopEventSink),
        ConsentStoreOptions {
            history_snapshots: true,
            ..ConsentStoreOptions::default()
        },
    ))
}

fn awaiting(store: &ConsentStore, client_id: &str) -> DetailedConsentResource {
    store
        .create_authorizable_consent(AuthorizableConsentRequest {
            consent: NewConsent::new(client_id, "accounts", json!({"permissions": ["ReadBalances"]})),
            authorization: None,
            initial_auth_status: AuthorizationStatus::Created,
            auth_type: "authorization".to_string(),
            generate_auth_id: true,
        })
        .unwrap()
}

fn unique_client() -> String {
    format!("pg-client-{}", nanos_suffix())
}

fn nanos_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn bind_and_search_round_through_postgres() {
    let Some(store) = store() else {
        return;
    };
    let client_id = unique_client();
    let created = awaiting(&store, &client_id);
    let auth_id = created.authorizations[0].auth_id.clone();
    let detailed = store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            created.consent.consent_id.clone(),
            auth_id.clone(),
            "pg-user",
            vec![ResourcePermission::primary("acc-1"), ResourcePermission::primary("acc-2")],
            true,
        ))
        .unwrap();
    assert_eq!(detailed.consent.current_status, ConsentStatus::Authorized);
    assert_eq!(detailed.mappings_for(&auth_id).count(), 2);

    let found = store
        .search_consents(&ConsentSearchQuery {
            client_ids: vec![client_id],
            ..ConsentSearchQuery::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], store.get_detailed_consent(&created.consent.consent_id).unwrap());

    let ledger = store
        .get_status_audit_records(&StatusAuditQuery {
            consent_ids: vec![created.consent.consent_id.clone()],
            source: AuditSource::Active,
            ..StatusAuditQuery::default()
        })
        .unwrap();
    let sequences: Vec<i64> = ledger.iter().map(|record| record.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(!store.get_consent_history(&created.consent.consent_id, AuditSource::Active).unwrap().is_empty());
}

#[test]
fn concurrent_binds_have_one_winner() {
    let Some(store) = store() else {
        return;
    };
    let created = awaiting(&store, &unique_client());
    let consent_id = created.consent.consent_id.clone();
    let auth_id = created.authorizations[0].auth_id.clone();
    let outcomes: Vec<Result<_, ConsentError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0 .. 4)
            .map(|index| {
                let store = &store;
                let consent_id = consent_id.clone();
                let auth_id = auth_id.clone();
                scope.spawn(move || {
                    store.bind_resources_to_consent(BindResourcesRequest::from_approval(
                        consent_id,
                        auth_id,
                        "pg-user",
                        vec![ResourcePermission::primary(format!("acc-{index}"))],
                        true,
                    ))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1, "{outcomes:?}");
    let detailed = store.get_detailed_consent(&consent_id).unwrap();
    assert_eq!(detailed.mappings.len(), 1);
}

#[test]
fn missing_consent_is_not_found() {
    let Some(store) = store() else {
        return;
    };
    let missing = ConsentId::new(format!("missing-{}", nanos_suffix()));
    let err = store.get_consent(&missing, false).unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)), "{err:?}");
}
