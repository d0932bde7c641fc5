//! `PgSession` - one pooled PostgreSQL connection used for a whole migration run

use may_postgres::types::ToSql;
use may_postgres::Row;

use super::ledger::{Ledger, PgLedger};
use super::lock::{MigrationLock, PgAdvisoryLock};
use super::record::LedgerRecord;
use crate::config::MigrationsConfig;
use crate::connection::PostgresConnectionManager;
use crate::executor::{DbError, Executor, PgExecutor};
use crate::migration::MigrationError;
use crate::pool::PooledConnection;

/// A checked-out connection acting as executor, ledger and lock at once
///
/// The advisory lock is session-scoped and the ledger insert must share the
/// unit's transaction, so all three go through this one connection.
pub struct PgSession {
    conn: PooledConnection<PostgresConnectionManager>,
    table: String,
    lock_key: i64,
}

impl PgSession {
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidTableName` if the configured ledger table
    /// is not a plain identifier.
    pub fn new(
        conn: PooledConnection<PostgresConnectionManager>,
        config: &MigrationsConfig,
    ) -> Result<Self, MigrationError> {
        super::ledger::validate_table_name(&config.table_name)?;
        Ok(Self {
            conn,
            table: config.table_name.clone(),
            lock_key: config.lock_key(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    fn executor(&self) -> &PgExecutor {
        &self.conn
    }

    fn ledger(&self) -> PgLedger<'_> {
        PgLedger::from_validated(self.executor(), &self.table)
    }

    fn advisory_lock(&self) -> PgAdvisoryLock<'_> {
        PgAdvisoryLock::new(self.executor(), self.lock_key)
    }

    /// Drop the connection instead of returning it to the pool
    ///
    /// Used after a failure that may have left the session in an unknown state.
    pub fn discard(mut self) {
        self.conn.mark_broken();
    }
}

impl Executor for PgSession {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.executor().execute(query, params)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.executor().batch_execute(sql)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.executor().query_all(query, params)
    }
}

impl Ledger for PgSession {
    fn ensure_initialized(&self) -> Result<(), MigrationError> {
        self.ledger().ensure_initialized()
    }

    fn is_initialized(&self) -> Result<bool, MigrationError> {
        self.ledger().is_initialized()
    }

    fn applied(&self) -> Result<Vec<LedgerRecord>, MigrationError> {
        self.ledger().applied()
    }

    fn record_applied(&self, record: &LedgerRecord) -> Result<(), MigrationError> {
        self.ledger().record_applied(record)
    }
}

impl MigrationLock for PgSession {
    fn try_acquire(&self) -> Result<bool, MigrationError> {
        self.advisory_lock().try_acquire()
    }

    fn release(&self) -> Result<(), MigrationError> {
        self.advisory_lock().release()
    }
}
