//! Migration ledger: the durable, append-only record of applied units

use std::collections::BTreeSet;

use super::record::LedgerRecord;
use crate::executor::{DbError, Executor};
use crate::migration::MigrationError;

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// Longest ledger table name whose `idx_{table}_applied_at` index name still fits
pub const MAX_TABLE_NAME_LEN: usize = MAX_IDENTIFIER_LEN - "idx__applied_at".len();

/// Storage for applied-unit records
///
/// There is deliberately no way to remove or edit a record.
pub trait Ledger {
    /// Create the ledger table if it does not exist yet
    ///
    /// Idempotent; a no-op on an already initialized ledger.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LedgerInit` if the table cannot be created.
    fn ensure_initialized(&self) -> Result<(), MigrationError>;

    /// Whether the ledger table exists, without creating it
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LedgerRead` if the check fails.
    fn is_initialized(&self) -> Result<bool, MigrationError>;

    /// Every applied record, oldest first
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LedgerRead` if the ledger cannot be read.
    fn applied(&self) -> Result<Vec<LedgerRecord>, MigrationError>;

    /// Names of all applied units; empty on a fresh ledger
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LedgerRead` if the ledger cannot be read.
    fn applied_names(&self) -> Result<BTreeSet<String>, MigrationError> {
        Ok(self.applied()?.into_iter().map(|record| record.name).collect())
    }

    /// Append one record
    ///
    /// Called inside the unit's transaction, so the record commits or rolls back
    /// with the unit's statements.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LedgerWrite` if the insert fails, including when
    /// the name is already recorded.
    fn record_applied(&self, record: &LedgerRecord) -> Result<(), MigrationError>;
}

/// Check that `name` is a plain, unquoted SQL identifier
///
/// The ledger table name is interpolated into SQL, so only
/// `[A-Za-z_][A-Za-z0-9_]*` is accepted. It is limited to
/// [`MAX_TABLE_NAME_LEN`] bytes so the derived index name is not truncated.
///
/// # Errors
///
/// Returns `MigrationError::InvalidTableName` otherwise.
pub fn validate_table_name(name: &str) -> Result<(), MigrationError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_TABLE_NAME_LEN {
        Ok(())
    } else {
        Err(MigrationError::InvalidTableName(name.to_string()))
    }
}

/// Concurrent `CREATE TABLE IF NOT EXISTS` can still race on the catalog
fn is_concurrent_create(error: &DbError) -> bool {
    let message = error.to_string();
    message.contains("already exists") || message.contains("duplicate key value")
}

/// Ledger stored in a PostgreSQL table
pub struct PgLedger<'a> {
    executor: &'a dyn Executor,
    table: String,
}

impl<'a> PgLedger<'a> {
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidTableName` if `table` is not a plain identifier.
    pub fn new(executor: &'a dyn Executor, table: impl Into<String>) -> Result<Self, MigrationError> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { executor, table })
    }

    /// `table` must already have passed [`validate_table_name`]
    pub(crate) fn from_validated(executor: &'a dyn Executor, table: &str) -> Self {
        Self {
            executor,
            table: table.to_string(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn create_sql(&self) -> String {
        let table = &self.table;
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   name TEXT PRIMARY KEY,\n\
             \x20   version BIGINT NOT NULL,\n\
             \x20   checksum TEXT,\n\
             \x20   applied_at TIMESTAMPTZ NOT NULL,\n\
             \x20   execution_time_ms BIGINT\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_{table}_applied_at ON {table} (applied_at);"
        )
    }
}

impl Ledger for PgLedger<'_> {
    fn ensure_initialized(&self) -> Result<(), MigrationError> {
        let sql = self.create_sql();
        match self.executor.batch_execute(&sql) {
            Ok(()) => Ok(()),
            Err(e) if is_concurrent_create(&e) => {
                log::debug!("ledger table {} created concurrently, retrying", self.table);
                self.executor
                    .batch_execute(&sql)
                    .map_err(MigrationError::LedgerInit)
            }
            Err(e) => Err(MigrationError::LedgerInit(e)),
        }
    }

    fn is_initialized(&self) -> Result<bool, MigrationError> {
        let rows = self
            .executor
            .query_all("SELECT to_regclass($1) IS NOT NULL", &[&self.table])
            .map_err(MigrationError::LedgerRead)?;
        match rows.first() {
            Some(row) => row
                .try_get::<_, bool>(0)
                .map_err(|e| MigrationError::LedgerRead(DbError::Parse(e.to_string()))),
            None => Ok(false),
        }
    }

    fn applied(&self) -> Result<Vec<LedgerRecord>, MigrationError> {
        let sql = format!(
            "SELECT name, version, checksum, applied_at, execution_time_ms \
             FROM {} ORDER BY version, name",
            self.table
        );
        let rows = self
            .executor
            .query_all(&sql, &[])
            .map_err(MigrationError::LedgerRead)?;

        rows.iter()
            .map(|row| LedgerRecord::from_row(row).map_err(MigrationError::LedgerRead))
            .collect()
    }

    fn record_applied(&self, record: &LedgerRecord) -> Result<(), MigrationError> {
        let sql = format!(
            "INSERT INTO {} (name, version, checksum, applied_at, execution_time_ms) \
             VALUES ($1, $2, $3, $4, $5)",
            self.table
        );
        self.executor
            .execute(
                &sql,
                &[
                    &record.name,
                    &record.version,
                    &record.checksum,
                    &record.applied_at,
                    &record.execution_time_ms,
                ],
            )
            .map(|_| ())
            .map_err(|source| MigrationError::LedgerWrite {
                name: record.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemoryDatabase;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("shoreline_migrations").is_ok());
        assert!(validate_table_name("_ledger2").is_ok());
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN)).is_ok());

        for bad in ["", "2ledger", "public.ledger", "ledger; DROP TABLE users", "lédger"] {
            assert!(
                matches!(validate_table_name(bad), Err(MigrationError::InvalidTableName(_))),
                "{bad:?} accepted"
            );
        }
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_longest_table_name_keeps_full_index_name() {
        assert_eq!(MAX_TABLE_NAME_LEN, 48);

        let db = MemoryDatabase::new();
        let table = "l".repeat(MAX_TABLE_NAME_LEN);
        let ledger = PgLedger::new(&db, table.as_str()).unwrap();
        ledger.ensure_initialized().unwrap();

        let index = format!("idx_{table}_applied_at");
        assert_eq!(index.len(), MAX_IDENTIFIER_LEN);
        assert!(db.committed_statements()[0].contains(&index));

        // one byte longer would have been silently truncated by PostgreSQL
        assert!(PgLedger::new(&db, format!("{table}x")).is_err());
    }

    #[test]
    fn test_applied_names_empty_on_fresh_ledger() {
        let db = MemoryDatabase::new();
        db.ensure_initialized().unwrap();
        assert!(db.applied_names().unwrap().is_empty());

        db.record_applied(&LedgerRecord::new("002_add_email_index", 2, None)).unwrap();
        db.record_applied(&LedgerRecord::new("001_create_users", 1, None)).unwrap();

        let names: Vec<String> = db.applied_names().unwrap().into_iter().collect();
        assert_eq!(names, ["001_create_users", "002_add_email_index"]);
    }

    #[test]
    fn test_pg_ledger_rejects_bad_table_name() {
        let db = MemoryDatabase::new();
        assert!(PgLedger::new(&db, "bad-name").is_err());
    }

    #[test]
    fn test_ensure_initialized_creates_table_and_index() {
        let db = MemoryDatabase::new();
        let ledger = PgLedger::new(&db, "schema_history").unwrap();
        ledger.ensure_initialized().unwrap();

        let statements = db.committed_statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS schema_history"));
        assert!(statements[0].contains("name TEXT PRIMARY KEY"));
        assert!(statements[0].contains("idx_schema_history_applied_at"));
    }

    #[test]
    fn test_ensure_initialized_retries_concurrent_create() {
        let db = MemoryDatabase::new();
        db.fail_once_on("CREATE TABLE IF NOT EXISTS", "relation \"schema_history\" already exists");
        let ledger = PgLedger::new(&db, "schema_history").unwrap();

        ledger.ensure_initialized().unwrap();
        assert_eq!(db.committed_statements().len(), 1);
    }

    #[test]
    fn test_ensure_initialized_surfaces_other_errors() {
        let db = MemoryDatabase::new();
        db.fail_on("CREATE TABLE IF NOT EXISTS");
        let ledger = PgLedger::new(&db, "schema_history").unwrap();

        assert!(matches!(
            ledger.ensure_initialized().unwrap_err(),
            MigrationError::LedgerInit(_)
        ));
    }

    #[test]
    fn test_record_applied_failure_names_unit() {
        let db = MemoryDatabase::new();
        db.fail_on("INSERT INTO schema_history");
        let ledger = PgLedger::new(&db, "schema_history").unwrap();

        let err = ledger
            .record_applied(&LedgerRecord::new("001_create_users", 1, None))
            .unwrap_err();
        assert_eq!(err.unit_name(), Some("001_create_users"));
    }
}
