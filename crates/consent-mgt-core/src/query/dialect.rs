// consent-mgt-core/src/query/dialect.rs
// ============================================================================
// Module: SQL Dialects
// Description: Engine-specific SQL fragments keyed by a dialect tag.
// Purpose: Isolate every syntax difference between supported engines.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Dialect`] renders the handful of fragments that differ between
//! engines: placeholders, ordered string aggregation, text casts, pagination,
//! and row locks. Everything else in the statement builders is shared text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::query::AGGREGATE_DELIMITER;
use crate::query::Pagination;
use crate::query::QueryWriter;
use crate::query::SqlValue;

// ============================================================================
// SECTION: Dialect
// ============================================================================

/// SQL syntax profile of a database engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Generic engine profile; executed by the `SQLite` backend.
    #[default]
    Default,
    /// `MySQL` / `MariaDB`.
    MySql,
    /// `PostgreSQL`.
    Postgres,
    /// Oracle Database 12c or later.
    Oracle,
    /// SQL Server 2017 or later.
    MsSql,
}

impl Dialect {
    /// All supported dialects.
    pub const ALL: [Self; 5] = [Self::Default, Self::MySql, Self::Postgres, Self::Oracle, Self::MsSql];

    /// Returns the configuration label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Oracle => "oracle",
            Self::MsSql => "mssql",
        }
    }

    /// Parses a configuration label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dialect| dialect.as_str() == label)
    }

    /// Returns the placeholder for the 1-based bind `position`.
    #[must_use]
    pub fn placeholder(self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${position}"),
            Self::Default | Self::MySql | Self::Oracle | Self::MsSql => "?".to_string(),
        }
    }

    /// Collapses `expr` over child rows into one `||`-joined string ordered by `order_key`.
    #[must_use]
    pub fn string_agg(self, expr: &str, order_key: &str) -> String {
        let delimiter = AGGREGATE_DELIMITER;
        match self {
            Self::Default => format!("GROUP_CONCAT({expr}, '{delimiter}' ORDER BY {order_key})"),
            Self::MySql => {
                format!("GROUP_CONCAT({expr} ORDER BY {order_key} SEPARATOR '{delimiter}')")
            }
            Self::Postgres => format!("STRING_AGG({expr}, '{delimiter}' ORDER BY {order_key})"),
            Self::Oracle => {
                format!("LISTAGG({expr}, '{delimiter}') WITHIN GROUP (ORDER BY {order_key})")
            }
            Self::MsSql => {
                format!("STRING_AGG({expr}, '{delimiter}') WITHIN GROUP (ORDER BY {order_key})")
            }
        }
    }

    /// Casts a numeric expression to text.
    #[must_use]
    pub fn text_cast(self, expr: &str) -> String {
        match self {
            Self::Default | Self::Postgres => format!("CAST({expr} AS TEXT)"),
            Self::MySql => format!("CAST({expr} AS CHAR)"),
            Self::Oracle => format!("TO_CHAR({expr})"),
            Self::MsSql => format!("CAST({expr} AS NVARCHAR(MAX))"),
        }
    }

    /// Table hint placed after the table name when locking a row.
    #[must_use]
    pub const fn lock_table_hint(self) -> &'static str {
        match self {
            Self::MsSql => " WITH (UPDLOCK, ROWLOCK)",
            Self::Default | Self::MySql | Self::Postgres | Self::Oracle => "",
        }
    }

    /// Clause appended to a select when locking its rows.
    ///
    /// The default profile relies on the backend taking the write lock when
    /// the transaction begins.
    #[must_use]
    pub const fn lock_suffix(self) -> &'static str {
        match self {
            Self::MySql | Self::Postgres | Self::Oracle => " FOR UPDATE",
            Self::Default | Self::MsSql => "",
        }
    }

    /// Appends the pagination clause; the statement must already be ordered.
    pub(crate) fn write_pagination(self, writer: &mut QueryWriter, pagination: Pagination) {
        let Some(limit) = pagination.limit else {
            return;
        };
        let limit = SqlValue::int(clamp_i64(limit));
        let offset = pagination.offset.map(|offset| SqlValue::int(clamp_i64(offset)));
        match self {
            Self::Default | Self::MySql | Self::Postgres => {
                writer.push(" LIMIT ").bind(limit);
                if let Some(offset) = offset {
                    writer.push(" OFFSET ").bind(offset);
                }
            }
            Self::Oracle => {
                if let Some(offset) = offset {
                    writer.push(" OFFSET ").bind(offset).push(" ROWS");
                }
                writer.push(" FETCH NEXT ").bind(limit).push(" ROWS ONLY");
            }
            Self::MsSql => {
                match offset {
                    Some(offset) => {
                        writer.push(" OFFSET ").bind(offset);
                    }
                    None => {
                        writer.push(" OFFSET 0");
                    }
                }
                writer.push(" ROWS FETCH NEXT ").bind(limit).push(" ROWS ONLY");
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a row count to a bindable integer.
fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
