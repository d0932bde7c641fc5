//! In-memory database double for exercising the migrator without PostgreSQL
//!
//! `MemoryDatabase` records every statement it is given, models one
//! transaction per session, keeps a typed ledger and a single migration lock.
//! Sessions created with [`MemoryDatabase::session`] share the same state, the
//! way several connections share one server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use may_postgres::types::ToSql;
use may_postgres::Row;

use crate::executor::{DbError, Executor};
use crate::migration::{Ledger, LedgerRecord, MigrationError, MigrationLock};

static NEXT_SESSION: AtomicUsize = AtomicUsize::new(1);

#[derive(Default)]
struct OpenTransaction {
    statements: Vec<String>,
    ledger: Vec<LedgerRecord>,
}

struct Failure {
    pattern: String,
    message: String,
    once: bool,
}

#[derive(Default)]
struct State {
    statements: Vec<String>,
    committed: Vec<String>,
    ledger: Option<Vec<LedgerRecord>>,
    transactions: HashMap<usize, OpenTransaction>,
    lock_holder: Option<usize>,
    failures: Vec<Failure>,
    failing_ledger_writes: HashSet<String>,
    fail_ledger_init: bool,
}

impl State {
    fn injected_failure(&mut self, sql: &str) -> Option<DbError> {
        let index = self.failures.iter().position(|f| sql.contains(&f.pattern))?;
        let message = if self.failures[index].once {
            self.failures.remove(index).message
        } else {
            self.failures[index].message.clone()
        };
        Some(DbError::Query(message))
    }
}

/// One session of an in-memory database
pub struct MemoryDatabase {
    session: usize,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// A fresh, empty database with no ledger table
    pub fn new() -> Self {
        Self {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Another session on the same database
    pub fn session(&self) -> Self {
        Self {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every statement any session ran, including `BEGIN`/`COMMIT`/`ROLLBACK`
    /// and statements that failed
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Statements that took effect: run outside a transaction or committed
    pub fn committed_statements(&self) -> Vec<String> {
        self.state().committed.clone()
    }

    /// Whether this session has an open transaction
    pub fn in_transaction(&self) -> bool {
        self.state().transactions.contains_key(&self.session)
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(&self, pattern: &str) {
        self.state().failures.push(Failure {
            pattern: pattern.to_string(),
            message: format!("simulated failure on {pattern:?}"),
            once: false,
        });
    }

    /// Fail the next statement containing `pattern` with `message`
    pub fn fail_once_on(&self, pattern: &str, message: &str) {
        self.state().failures.push(Failure {
            pattern: pattern.to_string(),
            message: message.to_string(),
            once: true,
        });
    }

    /// Reject ledger inserts for the unit `name`
    pub fn fail_ledger_write_for(&self, name: &str) {
        self.state().failing_ledger_writes.insert(name.to_string());
    }

    pub fn fail_ledger_init(&self) {
        self.state().fail_ledger_init = true;
    }

    /// Record `record` as already applied, creating the ledger if needed
    pub fn seed_applied(&self, record: LedgerRecord) {
        self.state().ledger.get_or_insert_with(Vec::new).push(record);
    }

    pub fn ledger_exists(&self) -> bool {
        self.state().ledger.is_some()
    }

    /// Committed ledger names in insertion order
    pub fn ledger_names(&self) -> Vec<String> {
        self.state()
            .ledger
            .iter()
            .flatten()
            .map(|record| record.name.clone())
            .collect()
    }

    /// Whether any session holds the migration lock
    pub fn lock_held(&self) -> bool {
        self.state().lock_holder.is_some()
    }

    fn run(&self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state();
        state.statements.push(sql.to_string());

        match sql.trim().to_ascii_uppercase().as_str() {
            "BEGIN" => {
                state.transactions.entry(self.session).or_default();
                return Ok(());
            }
            "COMMIT" => {
                if let Some(tx) = state.transactions.remove(&self.session) {
                    state.committed.extend(tx.statements);
                    state.ledger.get_or_insert_with(Vec::new).extend(tx.ledger);
                }
                return Ok(());
            }
            "ROLLBACK" => {
                state.transactions.remove(&self.session);
                return Ok(());
            }
            _ => {}
        }

        if let Some(error) = state.injected_failure(sql) {
            return Err(error);
        }

        match state.transactions.get_mut(&self.session) {
            Some(tx) => tx.statements.push(sql.to_string()),
            None => state.committed.push(sql.to_string()),
        }
        Ok(())
    }
}

impl Executor for MemoryDatabase {
    fn execute(&self, query: &str, _params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.run(query).map(|()| 0)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.run(sql)
    }

    /// Always empty; `Row` cannot be built outside `may_postgres`
    fn query_all(&self, query: &str, _params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.run(query).map(|()| Vec::new())
    }
}

impl Ledger for MemoryDatabase {
    fn ensure_initialized(&self) -> Result<(), MigrationError> {
        let mut state = self.state();
        if state.fail_ledger_init {
            return Err(MigrationError::LedgerInit(DbError::Query(
                "permission denied for schema public".to_string(),
            )));
        }
        state.ledger.get_or_insert_with(Vec::new);
        Ok(())
    }

    fn is_initialized(&self) -> Result<bool, MigrationError> {
        Ok(self.ledger_exists())
    }

    fn applied(&self) -> Result<Vec<LedgerRecord>, MigrationError> {
        self.state().ledger.clone().ok_or_else(|| {
            MigrationError::LedgerRead(DbError::Query(
                "relation \"shoreline_migrations\" does not exist".to_string(),
            ))
        })
    }

    fn record_applied(&self, record: &LedgerRecord) -> Result<(), MigrationError> {
        let mut state = self.state();
        let write_error = |message: &str| MigrationError::LedgerWrite {
            name: record.name.clone(),
            source: DbError::Query(message.to_string()),
        };

        if state.failing_ledger_writes.contains(&record.name) {
            return Err(write_error("simulated ledger write failure"));
        }

        let duplicate = state.ledger.iter().flatten().any(|r| r.name == record.name)
            || state
                .transactions
                .values()
                .flat_map(|tx| tx.ledger.iter())
                .any(|r| r.name == record.name);
        if duplicate {
            return Err(write_error("duplicate key value violates unique constraint"));
        }

        let session = self.session;
        match state.transactions.get_mut(&session) {
            Some(tx) => tx.ledger.push(record.clone()),
            None => state.ledger.get_or_insert_with(Vec::new).push(record.clone()),
        }
        Ok(())
    }
}

impl MigrationLock for MemoryDatabase {
    fn try_acquire(&self) -> Result<bool, MigrationError> {
        let mut state = self.state();
        match state.lock_holder {
            Some(holder) if holder != self.session => Ok(false),
            _ => {
                state.lock_holder = Some(self.session);
                Ok(true)
            }
        }
    }

    fn release(&self) -> Result<(), MigrationError> {
        let mut state = self.state();
        if state.lock_holder == Some(self.session) {
            state.lock_holder = None;
        }
        Ok(())
    }
}
