//! Migration-specific error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::DbError;

/// Migration-specific errors
///
/// Discovery, ledger bootstrap, ledger reads and lock problems stop a run before
/// any unit executes. `Apply`, `Transaction` and `LedgerWrite` belong to one unit
/// and surface through [`MigrationReport::error`](super::MigrationReport::error).
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The migrations directory or one of its files could not be read or parsed
    #[error("failed to discover migrations at {}: {reason}", path.display())]
    Discovery { path: PathBuf, reason: String },

    /// Two units share a name or a version
    #[error("duplicate migration {key}: \"{first}\" and \"{second}\"")]
    DuplicateUnit {
        key: String,
        first: String,
        second: String,
    },

    #[error("failed to initialize migration ledger: {0}")]
    LedgerInit(#[source] DbError),

    #[error("failed to read migration ledger: {0}")]
    LedgerRead(#[source] DbError),

    /// A unit's statements failed; its transaction was rolled back
    #[error("migration \"{name}\" failed: {source}")]
    Apply {
        name: String,
        #[source]
        source: DbError,
    },

    /// The unit's transaction could not be opened or committed
    #[error("transaction for migration \"{name}\" failed: {source}")]
    Transaction {
        name: String,
        #[source]
        source: DbError,
    },

    /// Recording a unit failed; the unit's statements were rolled back with it
    #[error("failed to record migration \"{name}\" in the ledger: {source}")]
    LedgerWrite {
        name: String,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Connectivity(#[from] ConnectionError),

    /// Another process kept the migration lock for the whole wait
    #[error(
        "timed out after {waited:?} waiting for the migration lock; \
         another process may be running migrations"
    )]
    LockTimeout { waited: Duration },

    #[error("migration lock query failed: {0}")]
    Lock(#[source] DbError),

    /// The ledger records a unit that the provider no longer supplies
    #[error("applied migration \"{name}\" is missing from the migrations source")]
    MissingUnit { name: String },

    /// A pending unit sorts before the most recently applied one
    #[error(
        "migration \"{pending}\" is pending but sorts before applied migration \"{applied}\"; \
         enable allow_out_of_order to apply it anyway"
    )]
    OutOfOrder { pending: String, applied: String },

    /// An applied unit's content changed after it ran
    #[error(
        "migration \"{name}\" was modified after being applied \
         (stored checksum {stored}, current {current})"
    )]
    ChecksumMismatch {
        name: String,
        stored: String,
        current: String,
    },

    #[error("migration \"{name}\" has no down section")]
    Irreversible { name: String },

    #[error("unknown migration \"{name}\"")]
    UnknownUnit { name: String },

    #[error("invalid ledger table name {0:?}: expected [A-Za-z_][A-Za-z0-9_]* of at most 63 bytes")]
    InvalidTableName(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MigrationError {
    pub(crate) fn discovery(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MigrationError::Discovery {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Name of the unit this error belongs to, if any
    pub fn unit_name(&self) -> Option<&str> {
        match self {
            MigrationError::Apply { name, .. }
            | MigrationError::Transaction { name, .. }
            | MigrationError::LedgerWrite { name, .. }
            | MigrationError::MissingUnit { name }
            | MigrationError::ChecksumMismatch { name, .. }
            | MigrationError::Irreversible { name }
            | MigrationError::UnknownUnit { name } => Some(name),
            MigrationError::OutOfOrder { pending, .. } => Some(pending),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_names_unit_and_cause() {
        let err = MigrationError::Apply {
            name: "002_add_email_index".to_string(),
            source: DbError::Query("relation \"users\" does not exist".to_string()),
        };

        let message = err.to_string();
        assert!(message.contains("002_add_email_index"));
        assert!(message.contains("does not exist"));
        assert_eq!(err.unit_name(), Some("002_add_email_index"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_pre_run_errors_have_no_unit() {
        let err = MigrationError::discovery("/srv/migrations", "No such file or directory");
        assert_eq!(err.unit_name(), None);
        assert!(err.to_string().contains("/srv/migrations"));
    }
}
