//! Migrator - Core migration execution engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ledger::Ledger;
use super::lock::{MigrationLock, MigrationLockGuard};
use super::migration::Migration;
use super::provider::MigrationProvider;
use super::record::LedgerRecord;
use super::schema_manager::SchemaManager;
use super::status::{reconcile, MigrationStatus, PendingMigration};
use crate::config::MigrationsConfig;
use crate::executor::Executor;
use crate::migration::MigrationError;
use crate::transaction::Transaction;

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

/// Knobs of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorOptions {
    /// Apply pending units that sort before the latest applied one
    pub allow_out_of_order: bool,
    /// How long to wait for another migrator to release the lock
    pub lock_timeout: Duration,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            allow_out_of_order: false,
            lock_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&MigrationsConfig> for MigratorOptions {
    fn from(config: &MigrationsConfig) -> Self {
        Self {
            allow_out_of_order: config.allow_out_of_order,
            lock_timeout: config.lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationResultStatus {
    /// Applied and recorded in this run
    Success,
    /// Attempted and rolled back; the run stopped here
    Error,
    /// Pending but never attempted because an earlier unit failed
    NotExecuted,
}

/// Outcome of one pending unit in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub name: String,
    pub version: i64,
    pub status: MigrationResultStatus,
}

impl MigrationResult {
    fn new(unit: &dyn Migration, status: MigrationResultStatus) -> Self {
        Self {
            name: unit.name().to_string(),
            version: unit.version(),
            status,
        }
    }
}

/// Summary of a run
#[derive(Debug)]
pub enum MigrationOutcome {
    /// Every pending unit applied; empty if there was nothing to do
    AllApplied(Vec<MigrationResult>),
    /// The run stopped at `failing`; `applied` committed before it
    Failed {
        applied: Vec<MigrationResult>,
        failing: MigrationResult,
        cause: MigrationError,
    },
}

/// Per-unit results of [`Migrator::migrate_to_latest`], in application order
#[derive(Debug)]
pub struct MigrationReport {
    results: Vec<MigrationResult>,
    error: Option<MigrationError>,
}

impl MigrationReport {
    pub fn results(&self) -> &[MigrationResult] {
        &self.results
    }

    /// The failing unit's error, if the run stopped early
    pub fn error(&self) -> Option<&MigrationError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Units applied by this run
    pub fn applied(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results
            .iter()
            .filter(|result| result.status == MigrationResultStatus::Success)
    }

    pub fn outcome(self) -> MigrationOutcome {
        let mut applied = Vec::new();
        let mut failing = None;
        for result in self.results {
            match result.status {
                MigrationResultStatus::Success => applied.push(result),
                MigrationResultStatus::Error => failing = Some(result),
                MigrationResultStatus::NotExecuted => {}
            }
        }

        match (failing, self.error) {
            (Some(failing), Some(cause)) => MigrationOutcome::Failed {
                applied,
                failing,
                cause,
            },
            _ => MigrationOutcome::AllApplied(applied),
        }
    }

    /// Collapse into the applied units or the failing unit's error
    ///
    /// # Errors
    ///
    /// Returns the error of the unit that stopped the run.
    pub fn into_result(self) -> Result<Vec<MigrationResult>, MigrationError> {
        match self.outcome() {
            MigrationOutcome::AllApplied(applied) => Ok(applied),
            MigrationOutcome::Failed { cause, .. } => Err(cause),
        }
    }
}

/// Core migration execution engine
///
/// The `Migrator` brings a database up to date with its provider's units: it
/// takes the migration lock, bootstraps the ledger, checks the ledger against
/// the source and then applies each pending unit in its own transaction.
///
/// # Example
///
/// ```rust,no_run
/// use shoreline::config::MigrationsConfig;
/// use shoreline::migration::{FileMigrationProvider, Migrator, PgSession};
/// use shoreline::PgPool;
///
/// # fn run(pool: &PgPool) -> Result<(), shoreline::migration::MigrationError> {
/// let config = MigrationsConfig::default();
/// let migrator = Migrator::new(FileMigrationProvider::new(&config.directory)?)
///     .with_options((&config).into());
///
/// let session = PgSession::new(pool.acquire()?, &config)?;
/// let report = migrator.migrate_to_latest(&session)?;
/// for result in report.results() {
///     println!("{} {:?}", result.name, result.status);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Migrator {
    provider: Arc<dyn MigrationProvider>,
    options: MigratorOptions,
}

impl Migrator {
    pub fn new(provider: impl MigrationProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            options: MigratorOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    /// All known units, ascending by version
    ///
    /// # Errors
    ///
    /// Returns the provider's `Discovery` or `DuplicateUnit` error.
    pub fn units(&self) -> Result<Vec<Arc<dyn Migration>>, MigrationError> {
        self.provider.list_units()
    }

    /// Look up a unit by name
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::UnknownUnit` if no unit has that name.
    pub fn find(&self, name: &str) -> Result<Arc<dyn Migration>, MigrationError> {
        self.units()?
            .into_iter()
            .find(|unit| unit.name() == name)
            .ok_or_else(|| MigrationError::UnknownUnit {
                name: name.to_string(),
            })
    }

    /// Apply every pending unit, in order, stopping at the first failure
    ///
    /// `db` must be a single session: the lock, the ledger and every unit's
    /// statements share its connection, so each unit commits together with its
    /// ledger record.
    ///
    /// # Errors
    ///
    /// Fatal pre-run problems (lock timeout, ledger bootstrap or read, discovery,
    /// duplicates, missing units, checksum mismatches, out-of-order units) are
    /// returned as `Err` before any unit runs. A failing unit is reported in the
    /// returned [`MigrationReport`] instead.
    pub fn migrate_to_latest<D>(&self, db: &D) -> Result<MigrationReport, MigrationError>
    where
        D: Executor + Ledger + MigrationLock,
    {
        let _lock = MigrationLockGuard::acquire(db, self.options.lock_timeout)?;

        db.ensure_initialized()?;
        let units = self.provider.list_units()?;
        let applied = db.applied()?;
        let plan = reconcile(units, applied, self.options.allow_out_of_order)?;

        if plan.pending.is_empty() {
            log::info!("database is up to date ({} applied)", plan.applied.len());
        } else {
            log::info!("{} pending migration(s)", plan.pending.len());
        }

        let mut results = Vec::with_capacity(plan.pending.len());
        let mut error = None;
        for unit in &plan.pending {
            if error.is_some() {
                results.push(MigrationResult::new(
                    unit.as_ref(),
                    MigrationResultStatus::NotExecuted,
                ));
                continue;
            }

            match apply_unit(db, unit.as_ref()) {
                Ok(elapsed) => {
                    log::info!("applied migration {} in {:?}", unit.name(), elapsed);
                    results.push(MigrationResult::new(unit.as_ref(), MigrationResultStatus::Success));
                }
                Err(e) => {
                    log::warn!("migration {} failed, halting: {}", unit.name(), e);
                    results.push(MigrationResult::new(unit.as_ref(), MigrationResultStatus::Error));
                    error = Some(e);
                }
            }
        }

        Ok(MigrationReport { results, error })
    }

    /// Applied and pending units, checked the same way a run checks them
    ///
    /// Read-only: does not take the lock and does not create the ledger.
    ///
    /// # Errors
    ///
    /// Same pre-run errors as [`migrate_to_latest`](Self::migrate_to_latest),
    /// except lock and ledger bootstrap errors.
    pub fn status<D: Ledger + ?Sized>(&self, db: &D) -> Result<MigrationStatus, MigrationError> {
        let units = self.provider.list_units()?;
        let applied = if db.is_initialized()? {
            db.applied()?
        } else {
            Vec::new()
        };
        let plan = reconcile(units, applied, self.options.allow_out_of_order)?;
        Ok(plan.status())
    }

    /// Check the ledger against the source without applying anything
    ///
    /// # Errors
    ///
    /// See [`status`](Self::status).
    pub fn validate<D: Ledger + ?Sized>(&self, db: &D) -> Result<(), MigrationError> {
        self.status(db).map(|_| ())
    }

    /// Units the next run would apply, in order
    ///
    /// # Errors
    ///
    /// See [`status`](Self::status).
    pub fn pending<D: Ledger + ?Sized>(&self, db: &D) -> Result<Vec<PendingMigration>, MigrationError> {
        self.status(db).map(|status| status.pending)
    }
}

/// Run one unit and record it inside a single transaction
///
/// Any early return drops the transaction, which rolls it back.
fn apply_unit<D>(db: &D, unit: &dyn Migration) -> Result<Duration, MigrationError>
where
    D: Executor + Ledger,
{
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::apply_migration_span(unit.name(), unit.version()).entered();

    let name = unit.name();
    let started = Instant::now();

    let tx = Transaction::begin(db).map_err(|source| MigrationError::Transaction {
        name: name.to_string(),
        source,
    })?;

    unit.up(&SchemaManager::new(&tx))
        .map_err(|source| MigrationError::Apply {
            name: name.to_string(),
            source,
        })?;

    let elapsed = started.elapsed();
    let record = LedgerRecord::new(name, unit.version(), unit.checksum().map(str::to_string))
        .with_execution_time(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
    db.record_applied(&record)?;

    tx.commit().map_err(|source| MigrationError::Transaction {
        name: name.to_string(),
        source,
    })?;

    Ok(elapsed)
}
