//! Integration tests for the migration engine
//!
//! These run against a real PostgreSQL database named by `TEST_DATABASE_URL`
//! and are skipped when it is unset. Every test uses its own ledger table and
//! its own target tables, so they can share a database and run in parallel.
//!
//! Test flow:
//! 1. Write numbered SQL files into a temp directory
//! 2. Run the migrator through a pooled `PgSession`
//! 3. Verify the ledger rows
//! 4. Verify the actual database schema

use sea_query::{ColumnDef, Index, Table};
use shoreline::config::{DatabaseConfig, MigrationsConfig};
use shoreline::migration::{
    run_with_pool, FileMigrationProvider, LedgerRecord, Migration, MigrationError,
    MigrationLock, MigrationLockGuard, MigrationResultStatus, Migrator, PgSession, SchemaManager,
    StaticMigrationProvider,
};
use shoreline::{DbError, Executor, PgPool};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Unique suffix for table names within one database
fn unique_suffix() -> String {
    format!(
        "{}_{}",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::SeqCst)
    )
}

/// Pool for `TEST_DATABASE_URL`, or `None` to skip the test
fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let mut config = DatabaseConfig::from_url(url);
    config.max_connections = 4;
    Some(PgPool::from_config(&config).expect("Failed to create pool"))
}

struct Fixture {
    pool: PgPool,
    dir: TempDir,
    config: MigrationsConfig,
    suffix: String,
}

impl Fixture {
    fn new() -> Option<Self> {
        let pool = test_pool()?;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let suffix = unique_suffix();
        let config = MigrationsConfig {
            directory: dir.path().to_path_buf(),
            table_name: format!("it_ledger_{suffix}"),
            lock_timeout_seconds: 5,
            ..MigrationsConfig::default()
        };
        Some(Self {
            pool,
            dir,
            config,
            suffix,
        })
    }

    fn write(&self, file_name: &str, up: &str, down: &str) {
        write_unit(self.dir.path(), file_name, up, down);
    }

    /// The users/orders scenario, with table names made unique
    fn write_standard_units(&self) {
        let s = &self.suffix;
        self.write(
            "001_create_users.sql",
            &format!("CREATE TABLE users_{s} (id SERIAL PRIMARY KEY, email TEXT NOT NULL);"),
            &format!("DROP TABLE users_{s};"),
        );
        self.write(
            "002_add_email_index.sql",
            &format!("CREATE UNIQUE INDEX idx_users_{s}_email ON users_{s} (email);"),
            &format!("DROP INDEX idx_users_{s}_email;"),
        );
        self.write(
            "003_add_orders.sql",
            &format!(
                "CREATE TABLE orders_{s} (\n    id SERIAL PRIMARY KEY,\n    user_id INTEGER NOT NULL REFERENCES users_{s} (id)\n);"
            ),
            &format!("DROP TABLE orders_{s};"),
        );
    }

    fn session(&self) -> PgSession {
        PgSession::new(self.pool.acquire().expect("Failed to acquire"), &self.config)
            .expect("Failed to create session")
    }

    fn ledger_names(&self) -> Vec<String> {
        let conn = self.pool.acquire().expect("Failed to acquire");
        let sql = format!(
            "SELECT name FROM {} ORDER BY version",
            self.config.table_name
        );
        conn.query_all(&sql, &[])
            .expect("Failed to read ledger")
            .iter()
            .map(|row| row.get(0))
            .collect()
    }

    fn table_exists(&self, table: &str) -> bool {
        let conn = self.pool.acquire().expect("Failed to acquire");
        let rows = conn
            .query_all("SELECT to_regclass($1) IS NOT NULL", &[&table])
            .expect("Failed to query catalog");
        rows[0].get(0)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.acquire() {
            let s = &self.suffix;
            let _ = conn.batch_execute(&format!(
                "DROP TABLE IF EXISTS orders_{s}, users_{s}, widgets_{s}, {} CASCADE",
                self.config.table_name
            ));
        }
        self.pool.close();
    }
}

fn write_unit(dir: &Path, file_name: &str, up: &str, down: &str) {
    let content = format!("-- migrate:up\n{up}\n\n-- migrate:down\n{down}\n");
    fs::write(dir.join(file_name), content).expect("Failed to write migration file");
}

/// Rust-defined migration built with the schema manager
struct CreateWidgets {
    table: String,
}

impl Migration for CreateWidgets {
    fn name(&self) -> &str {
        "001_create_widgets"
    }

    fn version(&self) -> i64 {
        1
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        let table = Table::create()
            .table(self.table.clone())
            .if_not_exists()
            .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
            .col(ColumnDef::new("label").string().not_null())
            .to_owned();
        manager.create_table(table)?;

        let index = Index::create()
            .name(format!("idx_{}_label", self.table))
            .table(self.table.clone())
            .col("label")
            .to_owned();
        manager.create_index(index)
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        manager.drop_table(Table::drop().table(self.table.clone()).to_owned())
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

#[test]
fn test_fresh_database_applies_all_units_in_order() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();

    let report = run_with_pool(&fx.pool, &fx.config).expect("Migration run failed");
    assert!(report.is_success(), "{:?}", report.error());

    let names: Vec<&str> = report.results().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        ["001_create_users", "002_add_email_index", "003_add_orders"]
    );
    assert!(report
        .results()
        .iter()
        .all(|r| r.status == MigrationResultStatus::Success));

    assert_eq!(
        fx.ledger_names(),
        ["001_create_users", "002_add_email_index", "003_add_orders"]
    );
    assert!(fx.table_exists(&format!("users_{}", fx.suffix)));
    assert!(fx.table_exists(&format!("orders_{}", fx.suffix)));
}

#[test]
fn test_second_run_is_a_no_op() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();

    run_with_pool(&fx.pool, &fx.config).expect("First run failed");
    let report = run_with_pool(&fx.pool, &fx.config).expect("Second run failed");

    assert!(report.is_success());
    assert!(report.results().is_empty());
    assert_eq!(fx.ledger_names().len(), 3);
}

#[test]
fn test_only_new_units_run() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();
    run_with_pool(&fx.pool, &fx.config).expect("First run failed");

    let s = &fx.suffix;
    fx.write(
        "004_add_users_name.sql",
        &format!("ALTER TABLE users_{s} ADD COLUMN name TEXT;"),
        &format!("ALTER TABLE users_{s} DROP COLUMN name;"),
    );

    let report = run_with_pool(&fx.pool, &fx.config).expect("Second run failed");
    let applied: Vec<&str> = report.applied().map(|r| r.name.as_str()).collect();
    assert_eq!(applied, ["004_add_users_name"]);
    assert_eq!(fx.ledger_names().len(), 4);
}

#[test]
fn test_failing_unit_halts_and_leaves_no_ledger_row() {
    let Some(fx) = Fixture::new() else { return };
    let s = &fx.suffix;
    fx.write(
        "001_create_users.sql",
        &format!("CREATE TABLE users_{s} (id SERIAL PRIMARY KEY);"),
        &format!("DROP TABLE users_{s};"),
    );
    // The first statement succeeds before the second fails; both must roll back
    fx.write(
        "002_broken.sql",
        &format!("CREATE TABLE widgets_{s} (id INTEGER);\nALTER TABLE no_such_table_{s} ADD COLUMN x INTEGER;"),
        "",
    );
    fx.write(
        "003_add_orders.sql",
        &format!("CREATE TABLE orders_{s} (id SERIAL PRIMARY KEY);"),
        "",
    );

    let report = run_with_pool(&fx.pool, &fx.config).expect("Pre-run failure");
    assert!(!report.is_success());

    let statuses: Vec<_> = report.results().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [
            MigrationResultStatus::Success,
            MigrationResultStatus::Error,
            MigrationResultStatus::NotExecuted,
        ]
    );
    match report.error() {
        Some(MigrationError::Apply { name, .. }) => assert_eq!(name, "002_broken"),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(fx.ledger_names(), ["001_create_users"]);
    assert!(!fx.table_exists(&format!("widgets_{s}")));
    assert!(!fx.table_exists(&format!("orders_{s}")));

    // Fixing the unit lets the next run resume where this one stopped
    fx.write(
        "002_broken.sql",
        &format!("CREATE TABLE widgets_{s} (id INTEGER);"),
        "",
    );
    let report = run_with_pool(&fx.pool, &fx.config).expect("Retry failed");
    assert!(report.is_success(), "{:?}", report.error());
    assert_eq!(fx.ledger_names().len(), 3);
}

#[test]
fn test_edited_unit_is_rejected_before_anything_runs() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();
    run_with_pool(&fx.pool, &fx.config).expect("First run failed");

    let s = &fx.suffix;
    fx.write(
        "001_create_users.sql",
        &format!("CREATE TABLE users_{s} (id BIGSERIAL PRIMARY KEY);"),
        "",
    );

    let err = run_with_pool(&fx.pool, &fx.config).unwrap_err();
    assert!(matches!(err, MigrationError::ChecksumMismatch { .. }), "{err:?}");
}

#[test]
fn test_status_lists_applied_and_pending() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();

    let migrator = Migrator::new(
        FileMigrationProvider::new(fx.dir.path()).expect("Failed to open directory"),
    )
    .with_options((&fx.config).into());
    let session = fx.session();

    // Reading status never creates the ledger
    let status = migrator.status(&session).expect("Failed to read status");
    assert!(status.applied.is_empty());
    assert_eq!(status.pending.len(), 3);
    assert!(!fx.table_exists(&fx.config.table_name));

    let report = migrator.migrate_to_latest(&session).expect("Run failed");
    assert!(report.is_success());

    let status = migrator.status(&session).expect("Failed to read status");
    assert!(status.is_up_to_date());
    assert_eq!(status.latest_applied_version(), Some(3));

    let record: &LedgerRecord = &status.applied[0];
    assert_eq!(record.name, "001_create_users");
    assert_eq!(record.checksum.as_deref().map(str::len), Some(64));
    assert!(record.execution_time_ms.is_some());
}

#[test]
fn test_rust_defined_migration() {
    let Some(fx) = Fixture::new() else { return };
    let table = format!("widgets_{}", fx.suffix);
    let unit: Arc<dyn Migration> = Arc::new(CreateWidgets {
        table: table.clone(),
    });

    let migrator = Migrator::new(StaticMigrationProvider::new(vec![unit]).expect("Duplicate units"));
    let session = fx.session();

    let report = migrator.migrate_to_latest(&session).expect("Run failed");
    assert!(report.is_success(), "{:?}", report.error());
    assert!(fx.table_exists(&table));
    assert_eq!(fx.ledger_names(), ["001_create_widgets"]);
}

#[test]
fn test_advisory_lock_excludes_second_session() {
    let Some(fx) = Fixture::new() else { return };
    let first = fx.session();
    let second = fx.session();
    assert_eq!(first.lock_key(), second.lock_key());

    let guard = MigrationLockGuard::acquire(&first, Duration::from_secs(1))
        .expect("First session failed to lock");
    assert!(!second.try_acquire().expect("Lock query failed"));

    let err = MigrationLockGuard::acquire(&second, Duration::from_millis(250)).unwrap_err();
    assert!(matches!(err, MigrationError::LockTimeout { .. }), "{err:?}");

    drop(guard);
    assert!(second.try_acquire().expect("Lock query failed"));
    second.release().expect("Failed to release");
}

#[test]
fn test_concurrent_runs_apply_each_unit_once() {
    let Some(fx) = Fixture::new() else { return };
    fx.write_standard_units();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pool = fx.pool.clone();
            let config = fx.config.clone();
            std::thread::spawn(move || run_with_pool(&pool, &config))
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let report = handle
            .join()
            .expect("Runner panicked")
            .expect("Run failed");
        assert!(report.is_success(), "{:?}", report.error());
        applied += report.applied().count();
    }

    assert_eq!(applied, 3);
    assert_eq!(fx.ledger_names().len(), 3);
}
