//! Span constructors for the `tracing` feature
//!
//! Callers enter the returned span for the duration of the operation:
//! `let _span = tracing_helpers::execute_query_span(sql).entered();`

use tracing::{debug_span, info_span, Span};

/// Longest statement prefix recorded on a query span
const MAX_STATEMENT_LEN: usize = 120;

fn truncated(sql: &str) -> &str {
    match sql.char_indices().nth(MAX_STATEMENT_LEN) {
        Some((end, _)) => &sql[..end],
        None => sql,
    }
}

pub fn execute_query_span(sql: &str) -> Span {
    debug_span!("shoreline.query", db.system = "postgresql", db.statement = truncated(sql))
}

pub fn acquire_connection_span() -> Span {
    debug_span!("shoreline.acquire_connection")
}

pub fn begin_transaction_span() -> Span {
    debug_span!("shoreline.transaction.begin")
}

pub fn commit_transaction_span() -> Span {
    debug_span!("shoreline.transaction.commit")
}

pub fn rollback_transaction_span() -> Span {
    debug_span!("shoreline.transaction.rollback")
}

pub fn acquire_lock_span() -> Span {
    info_span!("shoreline.migration.lock")
}

/// One unit's transaction, from `BEGIN` to `COMMIT`
pub fn apply_migration_span(name: &str, version: i64) -> Span {
    info_span!("shoreline.migration.apply", migration.name = name, migration.version = version)
}
