//! Section validation tests for consent-mgt-config.
// crates/consent-mgt-config/tests/section_validation.rs
// =============================================================================
// Module: Section Validation Tests
// Description: Boundary and pairing checks for each config section.
// Purpose: Ensure misconfigured backends and sinks are rejected before use.
// =============================================================================

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

use std::path::PathBuf;

use consent_mgt_config::AuditConfig;
use consent_mgt_config::ConfigError;
use consent_mgt_config::ConsentMgtConfig;
use consent_mgt_config::EventSinkType;
use consent_mgt_config::QueryConfig;
use consent_mgt_config::RetentionConfig;
use consent_mgt_config::StoreConfig;
use consent_mgt_config::StoreType;

type TestResult = Result<(), String>;

/// Assert that a validation result is an error containing a specific substring.
fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error '{message}' did not contain '{needle}'"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

fn postgres_store() -> StoreConfig {
    StoreConfig {
        store_type: StoreType::Postgres,
        path: None,
        connection: Some("postgres://consent@localhost/consent".to_string()),
        ..StoreConfig::default()
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let store = StoreConfig {
        path: None,
        ..StoreConfig::default()
    };
    assert_invalid(store.validate(), "store.path is required for sqlite")
}

#[test]
fn sqlite_store_rejects_connection_string() -> TestResult {
    let store = StoreConfig {
        connection: Some("postgres://localhost/consent".to_string()),
        ..StoreConfig::default()
    };
    assert_invalid(store.validate(), "only valid for postgres")
}

#[test]
fn sqlite_zero_busy_timeout_rejected() -> TestResult {
    let store = StoreConfig {
        busy_timeout_ms: 0,
        ..StoreConfig::default()
    };
    assert_invalid(store.validate(), "busy_timeout_ms must be greater than zero")
}

#[test]
fn sqlite_read_pool_bounds_are_delegated() -> TestResult {
    let store = StoreConfig {
        read_pool_size: 65,
        ..StoreConfig::default()
    };
    assert_invalid(store.validate(), "read_pool_size must be between 1 and 64")?;
    let store = StoreConfig {
        read_pool_size: 64,
        ..StoreConfig::default()
    };
    store.validate().map_err(|err| err.to_string())
}

#[test]
fn sqlite_config_carries_tuning() -> TestResult {
    let store = StoreConfig {
        path: Some(PathBuf::from("data/consent.db")),
        busy_timeout_ms: 750,
        read_pool_size: 2,
        ..StoreConfig::default()
    };
    let sqlite = store.sqlite_config().map_err(|err| err.to_string())?;
    if sqlite.path != PathBuf::from("data/consent.db") || sqlite.busy_timeout_ms != 750 {
        return Err(format!("unexpected sqlite config {sqlite:?}"));
    }
    if sqlite.read_pool_size != 2 {
        return Err("read pool size not carried".to_string());
    }
    Ok(())
}

#[test]
fn postgres_store_requires_connection() -> TestResult {
    let store = StoreConfig {
        connection: None,
        ..postgres_store()
    };
    assert_invalid(store.validate(), "store.connection is required for postgres")
}

#[test]
fn postgres_store_rejects_path() -> TestResult {
    let store = StoreConfig {
        path: Some(PathBuf::from("consent.db")),
        ..postgres_store()
    };
    assert_invalid(store.validate(), "only valid for sqlite")
}

#[test]
fn postgres_zero_pool_rejected() -> TestResult {
    let store = StoreConfig {
        max_connections: 0,
        ..postgres_store()
    };
    assert_invalid(store.validate(), "max_connections must be at least 1")
}

#[test]
fn postgres_zero_lock_timeout_rejected() -> TestResult {
    let store = StoreConfig {
        lock_timeout_ms: 0,
        ..postgres_store()
    };
    assert_invalid(store.validate(), "store.lock_timeout_ms must be greater than zero")
}

#[test]
fn postgres_malformed_connection_rejected() -> TestResult {
    let store = StoreConfig {
        connection: Some("postgres://host:port-is-not-a-number/db".to_string()),
        ..postgres_store()
    };
    assert_invalid(store.validate(), "postgres store invalid config")
}

#[test]
fn backend_conversion_checks_store_type() -> TestResult {
    match StoreConfig::default().postgres_config() {
        Err(err) if err.to_string().contains("store.type is not postgres") => {}
        other => return Err(format!("unexpected result {other:?}")),
    }
    match postgres_store().sqlite_config() {
        Err(err) if err.to_string().contains("store.type is not sqlite") => Ok(()),
        other => Err(format!("unexpected result {other:?}")),
    }
}

// ============================================================================
// SECTION: Audit, Retention, Query
// ============================================================================

#[test]
fn file_sink_requires_path() -> TestResult {
    let audit = AuditConfig {
        sink: EventSinkType::File,
        path: None,
        ..AuditConfig::default()
    };
    assert_invalid(audit.validate(), "audit.path is required for the file sink")?;
    let audit = AuditConfig {
        sink: EventSinkType::File,
        path: Some(PathBuf::from("events.jsonl")),
        ..AuditConfig::default()
    };
    audit.validate().map_err(|err| err.to_string())
}

#[test]
fn stray_audit_path_rejected() -> TestResult {
    let audit = AuditConfig {
        sink: EventSinkType::None,
        path: Some(PathBuf::from("events.jsonl")),
        ..AuditConfig::default()
    };
    assert_invalid(audit.validate(), "only valid for the file sink")
}

#[test]
fn retention_horizon_bounds() -> TestResult {
    assert_invalid(
        RetentionConfig {
            horizon_seconds: 0,
        }
        .validate(),
        "horizon_seconds must be greater than zero",
    )?;
    assert_invalid(
        RetentionConfig {
            horizon_seconds: u64::MAX,
        }
        .validate(),
        "horizon_seconds is too large",
    )
}

#[test]
fn page_size_bounds() -> TestResult {
    for max_page_size in [0, 10_001] {
        let query = QueryConfig {
            max_page_size,
            ..QueryConfig::default()
        };
        assert_invalid(query.validate(), "max_page_size must be between 1 and 10000")?;
    }
    let query = QueryConfig {
        max_page_size: 10_000,
        ..QueryConfig::default()
    };
    query.validate().map_err(|err| err.to_string())
}

#[test]
fn root_validation_reports_first_failing_section() -> TestResult {
    let mut config = ConsentMgtConfig::default();
    config.query.max_page_size = 0;
    assert_invalid(config.validate(), "query.max_page_size")?;
    config.query = QueryConfig::default();
    config.validate().map_err(|err| err.to_string())
}
