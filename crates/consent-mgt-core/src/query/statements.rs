// consent-mgt-core/src/query/statements.rs
// ============================================================================
// Module: Consent Statements
// Description: Statement builders for consent CRUD, aggregation, and audit.
// Purpose: Produce dialect-specific parameterized SQL for every store operation.
// Dependencies: crate::{core, query}
// ============================================================================

//! ## Overview
//! Each builder returns a [`BoundQuery`]. Select lists are fixed per
//! statement and shared across dialects, so decoders can read columns by
//! position. The aggregation select collapses each child table into
//! `||`-joined columns; columns of the same child group are ordered by the
//! same key so their tokens line up positionally.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::AuthorizationId;
use crate::core::identifiers::ConsentId;
use crate::core::model::AuditSource;
use crate::core::model::AuthorizationResource;
use crate::core::model::ConsentHistoryResource;
use crate::core::model::ConsentMapping;
use crate::core::model::ConsentResource;
use crate::core::model::ConsentSearchQuery;
use crate::core::model::ConsentStatusAuditRecord;
use crate::core::model::StatusAuditQuery;
use crate::core::status::AuthorizationStatus;
use crate::core::status::ConsentStatus;
use crate::core::status::MappingStatus;
use crate::query::BoundQuery;
use crate::query::Dialect;
use crate::query::Pagination;
use crate::query::QueryWriter;
use crate::query::SqlValue;
use crate::query::TableSet;

// ============================================================================
// SECTION: Column Lists
// ============================================================================

/// Consent columns in decode order.
pub const CONSENT_COLUMNS: &str = "CONSENT_ID, RECEIPT, CREATED_TIME, UPDATED_TIME, CLIENT_ID, \
                                   CONSENT_TYPE, CURRENT_STATUS, CONSENT_FREQUENCY, VALIDITY_TIME, \
                                   RECURRING_INDICATOR, VERSION";

/// Authorization resource columns in decode order.
pub const AUTH_COLUMNS: &str = "AUTH_ID, CONSENT_ID, USER_ID, AUTH_STATUS, AUTH_TYPE, UPDATED_TIME";

/// Status audit columns in decode order.
pub const AUDIT_COLUMNS: &str = "STATUS_AUDIT_ID, CONSENT_ID, AUDIT_SEQ, CURRENT_STATUS, \
                                 PREVIOUS_STATUS, ACTION_BY, ACTION_TIME, REASON";

/// History columns in decode order.
pub const HISTORY_COLUMNS: &str =
    "HISTORY_ID, CONSENT_ID, EFFECTIVE_TIMESTAMP, REASON, DETAILED_CONSENT, CHANGED_VALUES";

/// Result columns of the aggregation select, identical for every dialect.
pub const AGGREGATE_COLUMNS: [&str; 22] = [
    "CONSENT_ID",
    "RECEIPT",
    "CREATED_TIME",
    "UPDATED_TIME",
    "CLIENT_ID",
    "CONSENT_TYPE",
    "CURRENT_STATUS",
    "CONSENT_FREQUENCY",
    "VALIDITY_TIME",
    "RECURRING_INDICATOR",
    "ATT_KEY",
    "ATT_VALUE",
    "AUTH_ID",
    "AUTH_STATUS",
    "AUTH_TYPE",
    "AUTH_UPDATED_TIME",
    "USER_ID",
    "MAPPING_ID",
    "MAPPING_AUTH_ID",
    "ACCOUNT_ID",
    "PERMISSION",
    "MAPPING_STATUS",
];

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Child table collapsed into aggregate columns.
#[derive(Debug, Clone, Copy)]
enum ChildGroup {
    /// Consent attributes, ordered by key.
    Attributes,
    /// Authorization resources, ordered by auth id.
    Authorizations,
    /// Account mappings, ordered by mapping id.
    Mappings,
}

impl ChildGroup {
    /// Correlated `FROM ... WHERE` source for the group.
    const fn source(self) -> &'static str {
        match self {
            Self::Attributes => "OB_CONSENT_ATTRIBUTE CA WHERE CA.CONSENT_ID = OBC.CONSENT_ID",
            Self::Authorizations => {
                "OB_CONSENT_AUTH_RESOURCE CAR WHERE CAR.CONSENT_ID = OBC.CONSENT_ID"
            }
            Self::Mappings => {
                "OB_CONSENT_MAPPING CM INNER JOIN OB_CONSENT_AUTH_RESOURCE MAR ON MAR.AUTH_ID = \
                 CM.AUTH_ID WHERE MAR.CONSENT_ID = OBC.CONSENT_ID"
            }
        }
    }

    /// Stable ordering key shared by every column of the group.
    const fn order_key(self) -> &'static str {
        match self {
            Self::Attributes => "CA.ATT_KEY",
            Self::Authorizations => "CAR.AUTH_ID",
            Self::Mappings => "CM.MAPPING_ID",
        }
    }
}

/// How a child value is rendered before aggregation.
#[derive(Debug, Clone, Copy)]
enum ValueKind {
    /// Non-null text.
    Text,
    /// Non-null integer, cast to text.
    Integer,
    /// Nullable text, marker-encoded.
    Nullable,
}

/// One aggregated result column.
#[derive(Debug, Clone, Copy)]
struct AggregatedColumn {
    /// Result alias.
    alias: &'static str,
    /// Source expression.
    value: &'static str,
    /// Rendering kind.
    kind: ValueKind,
    /// Child group the column belongs to.
    group: ChildGroup,
}

/// Aggregated columns in result order.
const AGGREGATED: [AggregatedColumn; 12] = [
    AggregatedColumn {
        alias: "ATT_KEY",
        value: "CA.ATT_KEY",
        kind: ValueKind::Text,
        group: ChildGroup::Attributes,
    },
    AggregatedColumn {
        alias: "ATT_VALUE",
        value: "CA.ATT_VALUE",
        kind: ValueKind::Nullable,
        group: ChildGroup::Attributes,
    },
    AggregatedColumn {
        alias: "AUTH_ID",
        value: "CAR.AUTH_ID",
        kind: ValueKind::Text,
        group: ChildGroup::Authorizations,
    },
    AggregatedColumn {
        alias: "AUTH_STATUS",
        value: "CAR.AUTH_STATUS",
        kind: ValueKind::Text,
        group: ChildGroup::Authorizations,
    },
    AggregatedColumn {
        alias: "AUTH_TYPE",
        value: "CAR.AUTH_TYPE",
        kind: ValueKind::Text,
        group: ChildGroup::Authorizations,
    },
    AggregatedColumn {
        alias: "AUTH_UPDATED_TIME",
        value: "CAR.UPDATED_TIME",
        kind: ValueKind::Integer,
        group: ChildGroup::Authorizations,
    },
    AggregatedColumn {
        alias: "USER_ID",
        value: "CAR.USER_ID",
        kind: ValueKind::Nullable,
        group: ChildGroup::Authorizations,
    },
    AggregatedColumn {
        alias: "MAPPING_ID",
        value: "CM.MAPPING_ID",
        kind: ValueKind::Text,
        group: ChildGroup::Mappings,
    },
    AggregatedColumn {
        alias: "MAPPING_AUTH_ID",
        value: "CM.AUTH_ID",
        kind: ValueKind::Text,
        group: ChildGroup::Mappings,
    },
    AggregatedColumn {
        alias: "ACCOUNT_ID",
        value: "CM.ACCOUNT_ID",
        kind: ValueKind::Text,
        group: ChildGroup::Mappings,
    },
    AggregatedColumn {
        alias: "PERMISSION",
        value: "CM.PERMISSION",
        kind: ValueKind::Text,
        group: ChildGroup::Mappings,
    },
    AggregatedColumn {
        alias: "MAPPING_STATUS",
        value: "CM.MAPPING_STATUS",
        kind: ValueKind::Text,
        group: ChildGroup::Mappings,
    },
];

/// Writes the aggregation select list and `FROM` clause.
fn write_aggregate_select(writer: &mut QueryWriter) {
    let dialect = writer.dialect();
    writer.push(
        "SELECT OBC.CONSENT_ID, OBC.RECEIPT, OBC.CREATED_TIME, OBC.UPDATED_TIME, OBC.CLIENT_ID, \
         OBC.CONSENT_TYPE, OBC.CURRENT_STATUS, OBC.CONSENT_FREQUENCY, OBC.VALIDITY_TIME, \
         OBC.RECURRING_INDICATOR",
    );
    for column in AGGREGATED {
        let value = match column.kind {
            ValueKind::Text => column.value.to_string(),
            ValueKind::Integer => dialect.text_cast(column.value),
            ValueKind::Nullable => nullable_token(column.value),
        };
        let aggregate = dialect.string_agg(&value, column.group.order_key());
        writer
            .push(", (SELECT ")
            .push(&aggregate)
            .push(" FROM ")
            .push(column.group.source())
            .push(") AS ")
            .push(column.alias);
    }
    writer.push(" FROM OB_CONSENT OBC");
}

/// Encodes a nullable text expression as `-` (null) or `+value`.
///
/// Aggregates skip NULL inputs and Oracle stores empty strings as NULL, so
/// nullable columns carry an explicit marker per token.
fn nullable_token(expr: &str) -> String {
    format!("CASE WHEN {expr} IS NULL THEN '-' ELSE CONCAT('+', {expr}) END")
}

/// Appends `AND column IN (...)` when `values` is non-empty.
fn write_in_filter(writer: &mut QueryWriter, column: &str, values: Vec<SqlValue>) {
    if values.is_empty() {
        return;
    }
    writer.push(" AND ").push(column).push(" IN (").bind_list(values).push(")");
}

/// Appends the status filter, matched against the status reads report at `now`.
///
/// A lapsed consent in a non-terminal state reads as `EXPIRED`, so it matches
/// an `EXPIRED` filter and no longer matches its stored status. Terminal
/// states match as stored.
fn write_status_filter(writer: &mut QueryWriter, statuses: &[ConsentStatus], now: i64) {
    if statuses.is_empty() {
        return;
    }
    let live = status_values(statuses.iter().copied().filter(|status| !status.is_terminal()));
    let terminal = status_values(statuses.iter().copied().filter(|status| status.is_terminal()));
    let mut clauses = 0;
    writer.push(" AND (");
    if !live.is_empty() {
        writer
            .push("(C.CURRENT_STATUS IN (")
            .bind_list(live)
            .push(") AND NOT (C.VALIDITY_TIME > 0 AND C.VALIDITY_TIME < ")
            .bind(SqlValue::int(now))
            .push("))");
        clauses += 1;
    }
    if !terminal.is_empty() {
        if clauses > 0 {
            writer.push(" OR ");
        }
        writer.push("C.CURRENT_STATUS IN (").bind_list(terminal).push(")");
        clauses += 1;
    }
    if statuses.contains(&ConsentStatus::Expired) {
        if clauses > 0 {
            writer.push(" OR ");
        }
        let lapsing =
            status_values(ConsentStatus::ALL.into_iter().filter(|status| !status.is_terminal()));
        writer
            .push("(C.CURRENT_STATUS IN (")
            .bind_list(lapsing)
            .push(") AND C.VALIDITY_TIME > 0 AND C.VALIDITY_TIME < ")
            .bind(SqlValue::int(now))
            .push(")");
    }
    writer.push(")");
}

/// Binds status labels as text.
fn status_values(statuses: impl Iterator<Item = ConsentStatus>) -> Vec<SqlValue> {
    statuses.map(|status| SqlValue::text(status.as_str())).collect()
}

/// Builds the filtered, paginated consent search.
///
/// A user filter switches the consent/authorization join from outer to inner
/// and is added to the join condition alongside the consent match. Status
/// filters are evaluated against the effective status at `now`.
#[must_use]
pub fn search_consents(dialect: Dialect, query: &ConsentSearchQuery, now: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    write_aggregate_select(&mut writer);
    writer.push(" WHERE OBC.CONSENT_ID IN (SELECT C.CONSENT_ID FROM OB_CONSENT C ");
    match &query.user_id {
        Some(user_id) => {
            writer
                .push(
                    "INNER JOIN OB_CONSENT_AUTH_RESOURCE OCAR ON C.CONSENT_ID = OCAR.CONSENT_ID \
                     AND OCAR.USER_ID = ",
                )
                .bind(SqlValue::text(user_id.as_str()));
        }
        None => {
            writer.push("LEFT JOIN OB_CONSENT_AUTH_RESOURCE OCAR ON C.CONSENT_ID = OCAR.CONSENT_ID");
        }
    }
    writer.push(" WHERE 1 = 1");
    write_in_filter(
        &mut writer,
        "C.CONSENT_ID",
        query.consent_ids.iter().map(|id| SqlValue::text(id.as_str())).collect(),
    );
    write_in_filter(
        &mut writer,
        "C.CLIENT_ID",
        query.client_ids.iter().map(|id| SqlValue::text(id.as_str())).collect(),
    );
    write_in_filter(
        &mut writer,
        "C.CONSENT_TYPE",
        query.consent_types.iter().map(|kind| SqlValue::text(kind.as_str())).collect(),
    );
    write_status_filter(&mut writer, &query.consent_statuses, now);
    writer
        .push(") AND OBC.UPDATED_TIME >= COALESCE(")
        .bind(SqlValue::opt_int(query.from_time))
        .push(", OBC.UPDATED_TIME) AND OBC.UPDATED_TIME <= COALESCE(")
        .bind(SqlValue::opt_int(query.to_time))
        .push(", OBC.UPDATED_TIME) ORDER BY OBC.UPDATED_TIME DESC, OBC.CONSENT_ID ASC");
    dialect.write_pagination(&mut writer, Pagination::new(query.limit, query.offset));
    writer.finish()
}

/// Builds the aggregation select for a single consent.
#[must_use]
pub fn detailed_consent(dialect: Dialect, consent_id: &ConsentId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    write_aggregate_select(&mut writer);
    writer.push(" WHERE OBC.CONSENT_ID = ").bind(SqlValue::text(consent_id.as_str()));
    writer.finish()
}

// ============================================================================
// SECTION: Consent
// ============================================================================

/// Inserts a consent row at version 1.
#[must_use]
pub fn insert_consent(dialect: Dialect, consent: &ConsentResource, receipt_json: &str) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO OB_CONSENT (")
        .push(CONSENT_COLUMNS)
        .push(") VALUES (")
        .bind_list([
            SqlValue::text(consent.consent_id.as_str()),
            SqlValue::text(receipt_json),
            SqlValue::int(consent.created_time),
            SqlValue::int(consent.updated_time),
            SqlValue::text(consent.client_id.as_str()),
            SqlValue::text(consent.consent_type.as_str()),
            SqlValue::text(consent.current_status.as_str()),
            SqlValue::int(consent.consent_frequency),
            SqlValue::int(consent.validity_time),
            SqlValue::int(i64::from(consent.recurring_indicator)),
            SqlValue::int(1),
        ])
        .push(")");
    writer.finish()
}

/// Reads one consent row.
#[must_use]
pub fn select_consent(dialect: Dialect, consent_id: &ConsentId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT ")
        .push(CONSENT_COLUMNS)
        .push(" FROM OB_CONSENT WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()));
    writer.finish()
}

/// Reads and locks the consent row fields a transition depends on.
///
/// Columns: `CURRENT_STATUS`, `VERSION`, `VALIDITY_TIME`.
#[must_use]
pub fn lock_consent(dialect: Dialect, consent_id: &ConsentId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT CURRENT_STATUS, VERSION, VALIDITY_TIME FROM OB_CONSENT")
        .push(dialect.lock_table_hint())
        .push(" WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(dialect.lock_suffix());
    writer.finish()
}

/// Sets the consent status when the row is still at `expected_version`.
#[must_use]
pub fn update_consent_status(
    dialect: Dialect,
    consent_id: &ConsentId,
    status: ConsentStatus,
    updated_time: i64,
    expected_version: i64,
) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("UPDATE OB_CONSENT SET CURRENT_STATUS = ")
        .bind(SqlValue::text(status.as_str()))
        .push(", UPDATED_TIME = ")
        .bind(SqlValue::int(updated_time))
        .push(", VERSION = VERSION + 1 WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(" AND VERSION = ")
        .bind(SqlValue::int(expected_version));
    writer.finish()
}

/// Bumps the consent update time and version when still at `expected_version`.
#[must_use]
pub fn touch_consent(
    dialect: Dialect,
    consent_id: &ConsentId,
    updated_time: i64,
    expected_version: i64,
) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("UPDATE OB_CONSENT SET UPDATED_TIME = ")
        .bind(SqlValue::int(updated_time))
        .push(", VERSION = VERSION + 1 WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(" AND VERSION = ")
        .bind(SqlValue::int(expected_version));
    writer.finish()
}

/// Lists non-terminal consents whose validity ended before `now`.
#[must_use]
pub fn select_overdue_consents(dialect: Dialect, now: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT CONSENT_ID FROM OB_CONSENT WHERE VALIDITY_TIME > 0 AND VALIDITY_TIME < ")
        .bind(SqlValue::int(now))
        .push(" AND CURRENT_STATUS NOT IN (")
        .bind_list([
            SqlValue::text(ConsentStatus::Revoked.as_str()),
            SqlValue::text(ConsentStatus::Expired.as_str()),
        ])
        .push(") ORDER BY CONSENT_ID");
    writer.finish()
}

// ============================================================================
// SECTION: Attributes
// ============================================================================

/// Reads a consent's attributes ordered by key.
#[must_use]
pub fn select_attributes(dialect: Dialect, consent_id: &ConsentId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT ATT_KEY, ATT_VALUE FROM OB_CONSENT_ATTRIBUTE WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(" ORDER BY ATT_KEY");
    writer.finish()
}

/// Overwrites an existing attribute value.
#[must_use]
pub fn update_attribute(dialect: Dialect, consent_id: &ConsentId, key: &str, value: &str) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("UPDATE OB_CONSENT_ATTRIBUTE SET ATT_VALUE = ")
        .bind(SqlValue::text(value))
        .push(" WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(" AND ATT_KEY = ")
        .bind(SqlValue::text(key));
    writer.finish()
}

/// Inserts a new attribute.
#[must_use]
pub fn insert_attribute(dialect: Dialect, consent_id: &ConsentId, key: &str, value: &str) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO OB_CONSENT_ATTRIBUTE (CONSENT_ID, ATT_KEY, ATT_VALUE) VALUES (")
        .bind_list([
            SqlValue::text(consent_id.as_str()),
            SqlValue::text(key),
            SqlValue::text(value),
        ])
        .push(")");
    writer.finish()
}

// ============================================================================
// SECTION: Authorizations and Mappings
// ============================================================================

/// Inserts an authorization resource.
#[must_use]
pub fn insert_authorization(dialect: Dialect, authorization: &AuthorizationResource) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO OB_CONSENT_AUTH_RESOURCE (")
        .push(AUTH_COLUMNS)
        .push(") VALUES (")
        .bind_list([
            SqlValue::text(authorization.auth_id.as_str()),
            SqlValue::text(authorization.consent_id.as_str()),
            SqlValue::opt_text(authorization.user_id.as_deref()),
            SqlValue::text(authorization.auth_status.as_str()),
            SqlValue::text(authorization.auth_type.as_str()),
            SqlValue::int(authorization.updated_time),
        ])
        .push(")");
    writer.finish()
}

/// Reads one authorization resource.
#[must_use]
pub fn select_authorization(dialect: Dialect, auth_id: &AuthorizationId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT ")
        .push(AUTH_COLUMNS)
        .push(" FROM OB_CONSENT_AUTH_RESOURCE WHERE AUTH_ID = ")
        .bind(SqlValue::text(auth_id.as_str()));
    writer.finish()
}

/// Records an authorization decision.
#[must_use]
pub fn update_authorization(
    dialect: Dialect,
    auth_id: &AuthorizationId,
    status: AuthorizationStatus,
    user_id: &str,
    updated_time: i64,
) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("UPDATE OB_CONSENT_AUTH_RESOURCE SET AUTH_STATUS = ")
        .bind(SqlValue::text(status.as_str()))
        .push(", USER_ID = ")
        .bind(SqlValue::text(user_id))
        .push(", UPDATED_TIME = ")
        .bind(SqlValue::int(updated_time))
        .push(" WHERE AUTH_ID = ")
        .bind(SqlValue::text(auth_id.as_str()));
    writer.finish()
}

/// Inserts an account mapping.
#[must_use]
pub fn insert_mapping(dialect: Dialect, mapping: &ConsentMapping) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push(
            "INSERT INTO OB_CONSENT_MAPPING (MAPPING_ID, AUTH_ID, ACCOUNT_ID, PERMISSION, \
             MAPPING_STATUS) VALUES (",
        )
        .bind_list([
            SqlValue::text(mapping.mapping_id.as_str()),
            SqlValue::text(mapping.auth_id.as_str()),
            SqlValue::text(mapping.account_id.as_str()),
            SqlValue::text(mapping.permission.as_str()),
            SqlValue::text(mapping.mapping_status.as_str()),
        ])
        .push(")");
    writer.finish()
}

/// Sets the status of every mapping under a consent's authorizations.
#[must_use]
pub fn update_mapping_status_for_consent(
    dialect: Dialect,
    consent_id: &ConsentId,
    status: MappingStatus,
) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("UPDATE OB_CONSENT_MAPPING SET MAPPING_STATUS = ")
        .bind(SqlValue::text(status.as_str()))
        .push(" WHERE AUTH_ID IN (SELECT AUTH_ID FROM OB_CONSENT_AUTH_RESOURCE WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(")");
    writer.finish()
}

/// Deletes every mapping under a consent's authorizations.
#[must_use]
pub fn delete_mappings_for_consent(
    dialect: Dialect,
    consent_id: &ConsentId,
    tables: TableSet,
) -> BoundQuery {
    let prefix = tables.prefix();
    let mut writer = QueryWriter::new(dialect);
    match dialect {
        Dialect::MsSql => {
            writer.push(&format!(
                "DELETE {prefix}OB_CONSENT_MAPPING FROM {prefix}OB_CONSENT_MAPPING INNER JOIN \
                 {prefix}OB_CONSENT_AUTH_RESOURCE ON {prefix}OB_CONSENT_MAPPING.AUTH_ID = \
                 {prefix}OB_CONSENT_AUTH_RESOURCE.AUTH_ID WHERE \
                 {prefix}OB_CONSENT_AUTH_RESOURCE.CONSENT_ID = "
            ));
            writer.bind(SqlValue::text(consent_id.as_str()));
        }
        Dialect::Default | Dialect::MySql | Dialect::Postgres | Dialect::Oracle => {
            writer.push(&format!(
                "DELETE FROM {prefix}OB_CONSENT_MAPPING WHERE AUTH_ID IN (SELECT AUTH_ID FROM \
                 {prefix}OB_CONSENT_AUTH_RESOURCE WHERE CONSENT_ID = "
            ));
            writer.bind(SqlValue::text(consent_id.as_str())).push(")");
        }
    }
    writer.finish()
}

// ============================================================================
// SECTION: Status Audit
// ============================================================================

/// Reads the highest ledger sequence for a consent (0 when none).
#[must_use]
pub fn max_audit_sequence(dialect: Dialect, consent_id: &ConsentId) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("SELECT COALESCE(MAX(AUDIT_SEQ), 0) FROM OB_CONSENT_STATUS_AUDIT WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()));
    writer.finish()
}

/// Appends a ledger row.
#[must_use]
pub fn insert_status_audit(dialect: Dialect, record: &ConsentStatusAuditRecord) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO OB_CONSENT_STATUS_AUDIT (")
        .push(AUDIT_COLUMNS)
        .push(") VALUES (")
        .bind_list([
            SqlValue::text(record.status_audit_id.as_str()),
            SqlValue::text(record.consent_id.as_str()),
            SqlValue::int(record.sequence),
            SqlValue::text(record.current_status.as_str()),
            SqlValue::opt_text(record.previous_status.map(ConsentStatus::as_str)),
            SqlValue::text(record.action_by.as_str()),
            SqlValue::int(record.action_time),
            SqlValue::opt_text(record.reason.as_deref()),
        ])
        .push(")");
    writer.finish()
}

/// Writes the `FROM` source for ledger or history reads.
fn write_audit_source(writer: &mut QueryWriter, table: &str, columns: &str, source: AuditSource) {
    match source {
        AuditSource::Active => {
            writer.push(table);
        }
        AuditSource::Retention => {
            writer.push(TableSet::Retention.prefix()).push(table);
        }
        AuditSource::All => {
            writer
                .push("(SELECT ")
                .push(columns)
                .push(" FROM ")
                .push(table)
                .push(" UNION ALL SELECT ")
                .push(columns)
                .push(" FROM ")
                .push(TableSet::Retention.prefix())
                .push(table)
                .push(")");
        }
    }
}

/// Reads ledger rows ordered by consent then sequence.
#[must_use]
pub fn select_status_audit(dialect: Dialect, query: &StatusAuditQuery) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer.push("SELECT ").push(AUDIT_COLUMNS).push(" FROM ");
    write_audit_source(&mut writer, "OB_CONSENT_STATUS_AUDIT", AUDIT_COLUMNS, query.source);
    writer.push(" AUD WHERE 1 = 1");
    write_in_filter(
        &mut writer,
        "CONSENT_ID",
        query.consent_ids.iter().map(|id| SqlValue::text(id.as_str())).collect(),
    );
    writer.push(" ORDER BY CONSENT_ID ASC, AUDIT_SEQ ASC");
    dialect.write_pagination(&mut writer, Pagination::new(query.limit, query.offset));
    writer.finish()
}

// ============================================================================
// SECTION: History
// ============================================================================

/// Appends a history snapshot; payloads are JSON text.
#[must_use]
pub fn insert_history(
    dialect: Dialect,
    history: &ConsentHistoryResource,
    detailed_json: &str,
    changed_json: &str,
) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO OB_CONSENT_HISTORY (")
        .push(HISTORY_COLUMNS)
        .push(") VALUES (")
        .bind_list([
            SqlValue::text(history.history_id.as_str()),
            SqlValue::text(history.consent_id.as_str()),
            SqlValue::int(history.timestamp),
            SqlValue::text(history.reason.as_str()),
            SqlValue::text(detailed_json),
            SqlValue::text(changed_json),
        ])
        .push(")");
    writer.finish()
}

/// Reads a consent's history ordered by time then id.
#[must_use]
pub fn select_history(dialect: Dialect, consent_id: &ConsentId, source: AuditSource) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer.push("SELECT ").push(HISTORY_COLUMNS).push(" FROM ");
    write_audit_source(&mut writer, "OB_CONSENT_HISTORY", HISTORY_COLUMNS, source);
    writer
        .push(" HIS WHERE CONSENT_ID = ")
        .bind(SqlValue::text(consent_id.as_str()))
        .push(" ORDER BY EFFECTIVE_TIMESTAMP ASC, HISTORY_ID ASC");
    writer.finish()
}

// ============================================================================
// SECTION: Retention
// ============================================================================

/// Predicate selecting ledger rows older than the horizon, excluding each consent's latest row.
fn write_purgeable_audit_predicate(writer: &mut QueryWriter, horizon: i64) {
    writer
        .push(" WHERE A.ACTION_TIME < ")
        .bind(SqlValue::int(horizon))
        .push(
            " AND A.AUDIT_SEQ < (SELECT MAX(L.AUDIT_SEQ) FROM OB_CONSENT_STATUS_AUDIT L WHERE \
             L.CONSENT_ID = A.CONSENT_ID)",
        );
}

/// Copies purgeable ledger rows into the retention table.
#[must_use]
pub fn copy_audit_to_retention(dialect: Dialect, horizon: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer.push(
        "INSERT INTO RET_OB_CONSENT_STATUS_AUDIT (STATUS_AUDIT_ID, CONSENT_ID, AUDIT_SEQ, \
         CURRENT_STATUS, PREVIOUS_STATUS, ACTION_BY, ACTION_TIME, REASON) SELECT \
         A.STATUS_AUDIT_ID, A.CONSENT_ID, A.AUDIT_SEQ, A.CURRENT_STATUS, A.PREVIOUS_STATUS, \
         A.ACTION_BY, A.ACTION_TIME, A.REASON FROM OB_CONSENT_STATUS_AUDIT A",
    );
    write_purgeable_audit_predicate(&mut writer, horizon);
    writer.finish()
}

/// Deletes the ledger rows copied by [`copy_audit_to_retention`].
///
/// MySQL refuses a subquery on the table being deleted from, so there the
/// id list is materialized through a `DISTINCT` derived table first.
#[must_use]
pub fn delete_purged_audit(dialect: Dialect, horizon: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer.push("DELETE FROM OB_CONSENT_STATUS_AUDIT WHERE STATUS_AUDIT_ID IN (");
    if dialect == Dialect::MySql {
        writer.push("SELECT P.STATUS_AUDIT_ID FROM (SELECT DISTINCT A.STATUS_AUDIT_ID");
    } else {
        writer.push("SELECT A.STATUS_AUDIT_ID");
    }
    writer.push(" FROM OB_CONSENT_STATUS_AUDIT A");
    write_purgeable_audit_predicate(&mut writer, horizon);
    if dialect == Dialect::MySql {
        writer.push(") P");
    }
    writer.push(")");
    writer.finish()
}

/// Copies history rows older than the horizon into the retention table.
#[must_use]
pub fn copy_history_to_retention(dialect: Dialect, horizon: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("INSERT INTO RET_OB_CONSENT_HISTORY (")
        .push(HISTORY_COLUMNS)
        .push(") SELECT ")
        .push(HISTORY_COLUMNS)
        .push(" FROM OB_CONSENT_HISTORY WHERE EFFECTIVE_TIMESTAMP < ")
        .bind(SqlValue::int(horizon));
    writer.finish()
}

/// Deletes the history rows copied by [`copy_history_to_retention`].
#[must_use]
pub fn delete_purged_history(dialect: Dialect, horizon: i64) -> BoundQuery {
    let mut writer = QueryWriter::new(dialect);
    writer
        .push("DELETE FROM OB_CONSENT_HISTORY WHERE EFFECTIVE_TIMESTAMP < ")
        .bind(SqlValue::int(horizon));
    writer.finish()
}
