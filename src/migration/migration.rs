//! Migration trait definition

use super::schema_manager::SchemaManager;
use crate::executor::DbError;

/// A single, immutable, ordered schema change
///
/// SQL files on disk become [`SqlMigration`](super::SqlMigration)s; changes that need
/// Rust logic implement this trait directly and are handed to a
/// [`StaticMigrationProvider`](super::StaticMigrationProvider).
///
/// `name` identifies the unit in the ledger and must be unique. `version` is
/// the ordering key; units run in ascending version order and no two units may
/// share one.
pub trait Migration: Send + Sync {
    /// Unique ledger name, e.g. `001_create_users`
    fn name(&self) -> &str;

    /// Ordering key
    fn version(&self) -> i64;

    /// Apply the change
    ///
    /// Runs inside the migrator's per-unit transaction; returning an error rolls
    /// back everything this method executed.
    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;

    /// Undo the change, for manual rollback tooling
    ///
    /// Never called by [`Migrator::migrate_to_latest`](super::Migrator::migrate_to_latest).
    /// The default implementation reports the unit as irreversible.
    fn down(&self, _manager: &SchemaManager<'_>) -> Result<(), DbError> {
        Err(DbError::Other(format!(
            "migration \"{}\" has no down section",
            self.name()
        )))
    }

    /// Whether [`down`](Self::down) is implemented
    fn is_reversible(&self) -> bool {
        false
    }

    /// Content hash recorded in the ledger and compared on later runs
    fn checksum(&self) -> Option<&str> {
        None
    }
}
