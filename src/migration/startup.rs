//! In-process migration execution helpers

use super::migrator::{MigrationReport, Migrator};
use super::provider::FileMigrationProvider;
use super::session::PgSession;
use crate::config::{MigrationsConfig, ShorelineConfig};
use crate::migration::MigrationError;
use crate::pool::PgPool;

/// Apply pending file migrations on one connection checked out from `pool`
///
/// The connection goes back to the pool when this returns; if the run stopped
/// at a failing unit it is discarded instead.
///
/// # Errors
///
/// Returns pre-run errors (discovery, lock, ledger, validation, connectivity).
/// A failing unit is reported in the returned [`MigrationReport`].
pub fn run_with_pool(pool: &PgPool, config: &MigrationsConfig) -> Result<MigrationReport, MigrationError> {
    let migrator =
        Migrator::new(FileMigrationProvider::new(&config.directory)?).with_options(config.into());
    let session = PgSession::new(pool.acquire()?, config)?;

    let report = migrator.migrate_to_latest(&session)?;
    if !report.is_success() {
        session.discard();
    }
    Ok(report)
}

/// Build a pool from `config`, migrate, and close the pool
///
/// # Errors
///
/// Returns `MigrationError::Config` for invalid settings, plus everything
/// [`run_with_pool`] returns.
pub fn migrate_with_config(config: &ShorelineConfig) -> Result<MigrationReport, MigrationError> {
    config.validate()?;
    let pool = PgPool::from_config(&config.database)?;
    let result = run_with_pool(&pool, &config.migrations);
    pool.close();
    result
}

/// Run migrations on application startup
///
/// Call this during application initialization, before serving traffic. In a
/// multi-instance deployment the first instance takes the migration lock and
/// applies pending units; the others wait for the lock and then find nothing
/// left to do.
///
/// Returns the number of units applied.
///
/// # Errors
///
/// Fails fast on any error, including a failing unit; the application should
/// not start.
///
/// # Example
///
/// ```rust,no_run
/// use shoreline::config::ShorelineConfig;
/// use shoreline::migration::startup_migrations;
/// use shoreline::PgPool;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ShorelineConfig::load()?;
///     let pool = PgPool::from_config(&config.database)?;
///
///     startup_migrations(&pool, &config.migrations)?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
pub fn startup_migrations(pool: &PgPool, config: &MigrationsConfig) -> Result<usize, MigrationError> {
    let applied = run_with_pool(pool, config)?.into_result()?;

    if applied.is_empty() {
        log::debug!("No pending migrations to apply");
    } else {
        log::info!("Applied {} migration(s) on startup", applied.len());
    }
    Ok(applied.len())
}
