// crates/consent-mgt-cli/tests/cli_workflows.rs
// ============================================================================
// Module: CLI Workflow Tests
// Description: Runs the consent-mgt binary against a seeded SQLite store.
// Purpose: Validate command wiring, JSON output, and exit codes end to end.
// ============================================================================

//! ## Overview
//! Seeds consents through the library with a fixed clock, then drives the
//! compiled binary with a temporary config file and inspects stdout JSON.

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

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use consent_mgt_core::AuthorizableConsentRequest;
use consent_mgt_core::AuthorizationStatus;
use consent_mgt_core::BindResourcesRequest;
use consent_mgt_core::ConsentId;
use consent_mgt_core::ConsentStore;
use consent_mgt_core::ConsentStoreOptions;
use consent_mgt_core::FixedClock;
use consent_mgt_core::NewConsent;
use consent_mgt_core::NoopEventSink;
use consent_mgt_core::ResourcePermission;
use consent_mgt_store_sqlite::SqliteConsentBackend;
use consent_mgt_store_sqlite::SqliteStoreConfig;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

struct Workspace {
    dir: TempDir,
    db: PathBuf,
    config: PathBuf,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("consent.db");
    let config = dir.path().join("consent-mgt.toml");
    let toml = format!(
        "[store]\ntype = \"sqlite\"\npath = {path:?}\n\n[audit]\nsink = \"file\"\npath = {events:?}\n",
        path = db.display().to_string(),
        events = dir.path().join("events.jsonl").display().to_string(),
    );
    std::fs::write(&config, toml).unwrap();
    Workspace {
        dir,
        db,
        config,
    }
}

fn now() -> i64 {
    i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()).unwrap()
}

fn seed_store(db: &Path, at: i64) -> ConsentStore {
    let backend = SqliteConsentBackend::open(SqliteStoreConfig::new(db)).unwrap();
    ConsentStore::new(
        Arc::new(backend),
        Arc::new(FixedClock::new(at)),
        Arc::new(NoopEventSink),
        ConsentStoreOptions {
            history_snapshots: true,
            ..ConsentStoreOptions::default()
        },
    )
}

fn seed_authorized(store: &ConsentStore, client_id: &str, validity_time: i64) -> ConsentId {
    let mut consent = NewConsent::new(client_id, "accounts", json!({"permissions": ["ReadBalances"]}));
    consent.validity_time = validity_time;
    let created = store
        .create_authorizable_consent(AuthorizableConsentRequest {
            consent,
            authorization: None,
            initial_auth_status: AuthorizationStatus::Created,
            auth_type: "authorization".to_string(),
            generate_auth_id: true,
        })
        .unwrap();
    store
        .bind_resources_to_consent(BindResourcesRequest::from_approval(
            created.consent.consent_id.clone(),
            created.authorizations[0].auth_id.clone(),
            "u1",
            vec![ResourcePermission::primary("acc-1")],
            true,
        ))
        .unwrap();
    created.consent.consent_id
}

fn run(workspace: &Workspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_consent-mgt"))
        .arg("--config")
        .arg(&workspace.config)
        .args(args)
        .current_dir(workspace.dir.path())
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn init_creates_schema_and_reports_dialect() {
    let workspace = workspace();
    let output = stdout_json(&run(&workspace, &["init"]));
    assert_eq!(output["status"], "ready");
    assert_eq!(output["store"], "sqlite");
    assert_eq!(output["dialect"], "default");
    assert!(workspace.db.exists());
}

#[test]
fn show_search_and_revoke_round_trip_through_the_binary() {
    let workspace = workspace();
    let consent_id = {
        let store = seed_store(&workspace.db, now() - 60);
        seed_authorized(&store, "app1", 0)
    };

    let shown = stdout_json(&run(&workspace, &["show", consent_id.as_str(), "--detailed"]));
    assert_eq!(shown["consent"]["currentStatus"], "AUTHORIZED");
    assert_eq!(shown["mappings"][0]["accountId"], "acc-1");

    let found = stdout_json(&run(&workspace, &["search", "--client-id", "app1", "--status", "authorized"]));
    assert_eq!(found.as_array().unwrap().len(), 1);

    let revoked = stdout_json(&run(
        &workspace,
        &["revoke", consent_id.as_str(), "--actor", "ops", "--reason", "customer request"],
    ));
    assert_eq!(revoked["currentStatus"], "REVOKED");

    let ledger = stdout_json(&run(&workspace, &["audit", consent_id.as_str()]));
    let rows = ledger.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3]["actionBy"], "ops");
    assert_eq!(rows[3]["previousStatus"], "AUTHORIZED");
    assert_eq!(rows[3]["reason"], "customer request");

    let history = stdout_json(&run(&workspace, &["history", consent_id.as_str()]));
    assert!(!history.as_array().unwrap().is_empty());

    let events = std::fs::read_to_string(workspace.dir.path().join("events.jsonl")).unwrap();
    assert!(events.contains("consent_status_changed"));
}

#[test]
fn expire_sweep_persists_lapsed_consents() {
    let workspace = workspace();
    let seeded_at = now() - 600;
    let (lapsed, open_ended) = {
        let store = seed_store(&workspace.db, seeded_at);
        (seed_authorized(&store, "app1", seeded_at + 60), seed_authorized(&store, "app1", 0))
    };
    let summary = stdout_json(&run(&workspace, &["expire-sweep"]));
    assert_eq!(summary["expired"], json!([lapsed.as_str()]));
    assert_eq!(summary["skipped"], json!([]));
    let shown = stdout_json(&run(&workspace, &["show", open_ended.as_str()]));
    assert_eq!(shown["currentStatus"], "AUTHORIZED");
}

#[test]
fn purge_retention_moves_old_rows() {
    let workspace = workspace();
    let consent_id = {
        let store = seed_store(&workspace.db, now() - 10_000);
        seed_authorized(&store, "app1", 0)
    };
    let summary = stdout_json(&run(&workspace, &["purge-retention", "--horizon-seconds", "60"]));
    assert_eq!(summary["movedAuditRows"], 2);
    assert_eq!(summary["movedHistoryRows"], 2);
    let retained = stdout_json(&run(&workspace, &["audit", consent_id.as_str(), "--source", "retention"]));
    assert_eq!(retained.as_array().unwrap().len(), 2);
    let all = stdout_json(&run(&workspace, &["audit", consent_id.as_str(), "--source", "all"]));
    assert_eq!(all.as_array().unwrap().len(), 3);
    let live = stdout_json(&run(&workspace, &["audit", consent_id.as_str()]));
    assert_eq!(live[0]["currentStatus"], "AUTHORIZED");
}

#[test]
fn sql_renders_without_touching_the_store() {
    let workspace = workspace();
    let output = stdout_json(&run(
        &workspace,
        &["sql", "--operation", "detailed", "--dialect", "oracle", "--consent-id", "c-1"],
    ));
    assert_eq!(output["dialect"], "oracle");
    let sql = output["statements"][0]["sql"].as_str().unwrap();
    assert!(sql.contains("LISTAGG"));
    assert_eq!(output["statements"][0]["params"], json!(["c-1"]));
    assert!(!workspace.db.exists());
}

#[test]
fn missing_consent_fails_with_message_on_stderr() {
    let workspace = workspace();
    let output = run(&workspace, &["show", "does-not-exist"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not_found"), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_config_fails_before_opening_a_store() {
    let workspace = workspace();
    std::fs::write(&workspace.config, "[store]\ntype = \"sqlite\"\nread_pool_size = 0\n").unwrap();
    let output = run(&workspace, &["init"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid config"), "{stderr}");
}
