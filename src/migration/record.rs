//! `LedgerRecord` - one row of the migration ledger table

use chrono::{DateTime, Utc};
use may_postgres::Row;

use crate::executor::DbError;

/// A row of the ledger table: one applied migration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Unit name, the ledger's primary key
    pub name: String,

    pub version: i64,

    /// `SHA-256` of the unit's content at the time it ran (`None` for units without one)
    pub checksum: Option<String>,

    /// When the unit's transaction committed
    pub applied_at: DateTime<Utc>,

    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl LedgerRecord {
    /// Create a `LedgerRecord` stamped with the current time
    #[must_use]
    pub fn new(name: impl Into<String>, version: i64, checksum: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
            checksum,
            applied_at: Utc::now(),
            execution_time_ms: None,
        }
    }

    #[must_use]
    pub fn with_execution_time(mut self, execution_time_ms: i64) -> Self {
        self.execution_time_ms = Some(execution_time_ms);
        self
    }

    /// Create a `LedgerRecord` from a database row
    ///
    /// Expected column order: `name`, `version`, `checksum`, `applied_at`, `execution_time_ms`
    ///
    /// # Errors
    ///
    /// Returns `DbError::Parse` if a column is missing or has an unexpected type.
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        let parse = |column: &str, e: may_postgres::Error| {
            DbError::Parse(format!("ledger column {column}: {e}"))
        };

        Ok(Self {
            name: row.try_get(0).map_err(|e| parse("name", e))?,
            version: row.try_get(1).map_err(|e| parse("version", e))?,
            checksum: row.try_get(2).map_err(|e| parse("checksum", e))?,
            applied_at: row.try_get(3).map_err(|e| parse("applied_at", e))?,
            execution_time_ms: row.try_get(4).map_err(|e| parse("execution_time_ms", e))?,
        })
    }
}
