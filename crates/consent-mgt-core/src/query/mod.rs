// consent-mgt-core/src/query/mod.rs
// ============================================================================
// Module: Dialect Query Builder
// Description: Parameterized SQL generation for consent storage engines.
// Purpose: Render engine-specific SQL text with ordered bind values.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Builders are pure functions keyed by a [`Dialect`] tag. Each returns a
//! [`BoundQuery`] holding the SQL text and the bind values in placeholder
//! order, so callers never have to track placeholder positions by hand.
//! Result columns are identical across dialects; only the syntax for string
//! aggregation, pagination, row locking, and placeholders differs.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod dialect;
pub mod statements;

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

pub use self::dialect::Dialect;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consent table.
pub const CONSENT_TABLE: &str = "OB_CONSENT";
/// Authorization resource table.
pub const AUTH_RESOURCE_TABLE: &str = "OB_CONSENT_AUTH_RESOURCE";
/// Account mapping table.
pub const MAPPING_TABLE: &str = "OB_CONSENT_MAPPING";
/// Consent attribute table.
pub const ATTRIBUTE_TABLE: &str = "OB_CONSENT_ATTRIBUTE";
/// Status-change ledger table.
pub const STATUS_AUDIT_TABLE: &str = "OB_CONSENT_STATUS_AUDIT";
/// History snapshot table.
pub const HISTORY_TABLE: &str = "OB_CONSENT_HISTORY";
/// Prefix of the parallel retention tables.
pub const RETENTION_PREFIX: &str = "RET_";
/// Delimiter joining aggregated child values.
pub const AGGREGATE_DELIMITER: &str = "||";

// ============================================================================
// SECTION: Values
// ============================================================================

/// A typed bind value. Nulls keep their type so strict engines can bind them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// Integer value or typed NULL.
    Integer(Option<i64>),
    /// Text value or typed NULL.
    Text(Option<String>),
}

impl SqlValue {
    /// Non-null integer.
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::Integer(Some(value))
    }

    /// Non-null text.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(Some(value.into()))
    }

    /// Nullable integer.
    #[must_use]
    pub const fn opt_int(value: Option<i64>) -> Self {
        Self::Integer(value)
    }

    /// Nullable text.
    #[must_use]
    pub fn opt_text(value: Option<&str>) -> Self {
        Self::Text(value.map(str::to_string))
    }
}

/// SQL text with bind values in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    /// Statement text.
    pub sql: String,
    /// Bind values, one per placeholder, in order of appearance.
    pub params: Vec<SqlValue>,
}

/// Row window for paginated reads.
///
/// # Invariants
/// - `offset` without `limit` is ignored; no dialect defines offset-only fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Maximum rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
}

impl Pagination {
    /// Creates a pagination window.
    #[must_use]
    pub const fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit,
            offset,
        }
    }
}

/// Which table family a statement targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSet {
    /// Live tables.
    #[default]
    Active,
    /// Parallel `RET_` retention tables.
    Retention,
}

impl TableSet {
    /// Returns the table-name prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Active => "",
            Self::Retention => RETENTION_PREFIX,
        }
    }
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Appends SQL text and binds values with dialect-correct placeholders.
#[derive(Debug)]
pub(crate) struct QueryWriter {
    /// Target dialect.
    dialect: Dialect,
    /// Accumulated SQL text.
    sql: String,
    /// Accumulated bind values.
    params: Vec<SqlValue>,
}

impl QueryWriter {
    /// Starts an empty statement.
    pub(crate) const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Returns the target dialect.
    pub(crate) const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Appends raw SQL text.
    pub(crate) fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Appends a placeholder and records its value.
    pub(crate) fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.params.push(value);
        let position = self.params.len();
        let placeholder = self.dialect.placeholder(position);
        self.sql.push_str(&placeholder);
        self
    }

    /// Appends a comma-separated placeholder list.
    pub(crate) fn bind_list(&mut self, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    /// Finishes the statement.
    pub(crate) fn finish(self) -> BoundQuery {
        BoundQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}
