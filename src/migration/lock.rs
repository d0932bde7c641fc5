//! Cross-process migration lock on a PostgreSQL advisory lock
//!
//! Only one migrator may apply units against a database at a time. The lock is
//! session-scoped: the server also drops it when the holding connection closes,
//! so a crashed process never leaves it behind.

use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::executor::{DbError, Executor};
use crate::migration::MigrationError;

/// Poll interval while another session holds the lock
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A mutual-exclusion lock shared by every migrator of one database
pub trait MigrationLock {
    /// Try to take the lock without waiting
    ///
    /// Returns `Ok(false)` if another session holds it.
    fn try_acquire(&self) -> Result<bool, MigrationError>;

    fn release(&self) -> Result<(), MigrationError>;
}

/// Derive the default advisory lock key from the ledger table name
///
/// Migrators sharing a ledger table contend for the same key. Stable across
/// releases and platforms.
pub fn lock_key_for(table_name: &str) -> i64 {
    let digest = Sha256::digest(format!("shoreline:{table_name}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// `pg_try_advisory_lock` / `pg_advisory_unlock` on one session
///
/// The executor must stay on one connection for the life of the lock; the
/// lock belongs to the session that took it.
pub struct PgAdvisoryLock<'a> {
    executor: &'a dyn Executor,
    key: i64,
}

impl<'a> PgAdvisoryLock<'a> {
    pub fn new(executor: &'a dyn Executor, key: i64) -> Self {
        Self { executor, key }
    }

    pub fn key(&self) -> i64 {
        self.key
    }
}

impl MigrationLock for PgAdvisoryLock<'_> {
    fn try_acquire(&self) -> Result<bool, MigrationError> {
        let rows = self
            .executor
            .query_all("SELECT pg_try_advisory_lock($1)", &[&self.key])
            .map_err(MigrationError::Lock)?;
        let row = rows.first().ok_or_else(|| {
            MigrationError::Lock(DbError::Query(
                "pg_try_advisory_lock returned no row".to_string(),
            ))
        })?;
        row.try_get::<_, bool>(0)
            .map_err(|e| MigrationError::Lock(DbError::Parse(e.to_string())))
    }

    fn release(&self) -> Result<(), MigrationError> {
        self.executor
            .query_all("SELECT pg_advisory_unlock($1)", &[&self.key])
            .map(|_| ())
            .map_err(MigrationError::Lock)
    }
}

/// Holds the migration lock; releases it when dropped
///
/// This ensures that locks are always released, even if a unit fails or panics.
pub struct MigrationLockGuard<'a> {
    lock: &'a dyn MigrationLock,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the lock, polling until `timeout` elapses
    ///
    /// A zero timeout makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if the lock stayed held by another
    /// session, or `MigrationError::Lock` if the lock query failed.
    pub fn acquire(lock: &'a dyn MigrationLock, timeout: Duration) -> Result<Self, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing_helpers::acquire_lock_span().entered();

        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if lock.try_acquire()? {
                log::debug!("migration lock acquired after {attempts} attempt(s)");
                return Ok(Self { lock });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(MigrationError::LockTimeout { waited });
            }
            if attempts == 1 {
                log::info!("waiting for migration lock held by another session");
            }
            may::coroutine::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        match self.lock.release() {
            Ok(()) => log::debug!("migration lock released"),
            Err(e) => log::warn!("failed to release migration lock: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemoryDatabase;

    #[test]
    fn test_lock_key_is_stable_per_table() {
        assert_eq!(lock_key_for("shoreline_migrations"), lock_key_for("shoreline_migrations"));
        assert_ne!(lock_key_for("shoreline_migrations"), lock_key_for("other_ledger"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let db = MemoryDatabase::new();
        {
            let _guard = MigrationLockGuard::acquire(&db, Duration::ZERO).unwrap();
            assert!(db.lock_held());
        }
        assert!(!db.lock_held());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let first = MemoryDatabase::new();
        let second = first.session();

        let _held = MigrationLockGuard::acquire(&first, Duration::ZERO).unwrap();
        let err = MigrationLockGuard::acquire(&second, Duration::from_millis(250))
            .err()
            .unwrap();

        match err {
            MigrationError::LockTimeout { waited } => assert!(waited >= Duration::from_millis(250)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let first = MemoryDatabase::new();
        let second = first.session();

        let held = MigrationLockGuard::acquire(&first, Duration::ZERO).unwrap();
        let waiter = std::thread::spawn(move || {
            MigrationLockGuard::acquire(&second, Duration::from_secs(5)).map(|_| ())
        });
        std::thread::sleep(Duration::from_millis(150));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
