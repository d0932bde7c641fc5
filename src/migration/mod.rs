//! Schema migrations
//!
//! A [`Migrator`] brings a database up to date with an ordered set of
//! [`Migration`] units supplied by a [`MigrationProvider`], recording each
//! applied unit in an append-only [`Ledger`] table. Every unit runs in its own
//! transaction together with its ledger record; the first failing unit stops
//! the run and everything before it stays applied.
//!
//! # Example
//!
//! ```rust,no_run
//! use shoreline::migration::{Migration, SchemaManager};
//! use shoreline::DbError;
//! use sea_query::{Table, ColumnDef};
//!
//! pub struct CreateUsersTable;
//!
//! impl Migration for CreateUsersTable {
//!     fn name(&self) -> &str {
//!         "001_create_users_table"
//!     }
//!
//!     fn version(&self) -> i64 {
//!         1
//!     }
//!
//!     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
//!         let table = Table::create()
//!             .table("users")
//!             .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
//!             .col(ColumnDef::new("email").string().not_null().unique_key())
//!             .to_owned();
//!         manager.create_table(table)
//!     }
//!
//!     fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
//!         let table = Table::drop().table("users").to_owned();
//!         manager.drop_table(table)
//!     }
//!
//!     fn is_reversible(&self) -> bool {
//!         true
//!     }
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod file;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod provider;
pub mod record;
pub mod schema_manager;
pub mod session;
pub mod startup;
pub mod status;

pub use checksum::checksum_of;
pub use error::MigrationError;
pub use file::SqlMigration;
pub use ledger::{Ledger, PgLedger};
pub use lock::{lock_key_for, MigrationLock, MigrationLockGuard, PgAdvisoryLock};
pub use migration::Migration;
pub use migrator::{
    MigrationOutcome, MigrationReport, MigrationResult, MigrationResultStatus, Migrator,
    MigratorOptions,
};
pub use provider::{FileMigrationProvider, MigrationProvider, StaticMigrationProvider};
pub use record::LedgerRecord;
pub use schema_manager::SchemaManager;
pub use session::PgSession;
pub use startup::{migrate_with_config, run_with_pool, startup_migrations};
pub use status::{MigrationStatus, PendingMigration};

/// Ledger table used when none is configured
pub const DEFAULT_LEDGER_TABLE: &str = "shoreline_migrations";
