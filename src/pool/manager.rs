//! Bounded connection pool
//!
//! Connections are opened lazily up to `max_size` and parked in a crossbeam
//! queue while idle. A [`PooledConnection`] goes back to the queue when dropped,
//! so every exit path of a caller releases its connection.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::connection::{ConnectionError, PostgresConnectionManager};
use crate::pool::config::DatabaseConfig;
use crate::pool::types::{ManageConnection, PoolState};

// Waiters wake up this often to re-check for a free slot
const WAIT_SLICE: Duration = Duration::from_millis(50);

struct PoolInner<M: ManageConnection> {
    manager: M,
    idle_tx: Sender<M::Connection>,
    idle_rx: Receiver<M::Connection>,
    opened: AtomicU32,
    max_size: u32,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl<M: ManageConnection> PoolInner<M> {
    fn release_slot(&self) {
        self.opened.fetch_sub(1, Ordering::AcqRel);
    }

    fn try_reserve_slot(&self) -> bool {
        let mut current = self.opened.load(Ordering::Acquire);
        while current < self.max_size {
            match self.opened.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

/// A bounded pool of database connections
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Pool of `may_postgres` executors
pub type PgPool = ConnectionPool<PostgresConnectionManager>;

impl ConnectionPool<PostgresConnectionManager> {
    /// Build a PostgreSQL pool from validated settings
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::InvalidConnectionString` if the settings are incomplete.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let manager = PostgresConnectionManager::new(config)?;
        Ok(Self::new(
            manager,
            config.max_connections,
            Duration::from_secs(config.pool_timeout_seconds),
        ))
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Create a pool holding at most `max_size` connections
    pub fn new(manager: M, max_size: u32, acquire_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        let (idle_tx, idle_rx) = bounded(max_size as usize);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                idle_tx,
                idle_rx,
                opened: AtomicU32::new(0),
                max_size,
                acquire_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Check out a connection, waiting up to the pool's acquire timeout
    ///
    /// # Errors
    ///
    /// - `ConnectionError::PoolTimeout` if every connection stayed checked out
    /// - `ConnectionError::PoolClosed` if [`close`](Self::close) was called
    /// - whatever the manager returns when opening a new connection fails
    pub fn acquire(&self) -> Result<PooledConnection<M>, ConnectionError> {
        self.acquire_timeout(self.inner.acquire_timeout)
    }

    /// Check out a connection, waiting up to `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>, ConnectionError> {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing_helpers::acquire_connection_span().entered();

        let inner = &self.inner;
        let deadline = Instant::now() + timeout;

        loop {
            if inner.closed.load(Ordering::Acquire) {
                return Err(ConnectionError::PoolClosed);
            }

            if let Ok(conn) = inner.idle_rx.try_recv() {
                if let Some(conn) = self.checked(conn) {
                    return Ok(conn);
                }
                continue;
            }

            if inner.try_reserve_slot() {
                return match inner.manager.connect() {
                    Ok(conn) => {
                        log::debug!(
                            "opened pooled connection ({}/{})",
                            inner.opened.load(Ordering::Acquire),
                            inner.max_size
                        );
                        Ok(self.wrap(conn))
                    }
                    Err(e) => {
                        inner.release_slot();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectionError::PoolTimeout {
                    waited: timeout,
                    max_size: inner.max_size,
                });
            }

            match inner.idle_rx.recv_timeout(WAIT_SLICE.min(deadline - now)) {
                Ok(conn) => {
                    if let Some(conn) = self.checked(conn) {
                        return Ok(conn);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(ConnectionError::PoolClosed),
            }
        }
    }

    /// Drop idle connections and refuse further checkouts
    ///
    /// Checked-out connections are closed as their guards drop.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        while let Ok(conn) = self.inner.idle_rx.try_recv() {
            drop(conn);
            self.inner.release_slot();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PoolState {
        PoolState {
            connections: self.inner.opened.load(Ordering::Acquire),
            idle: self.inner.idle_rx.len() as u32,
            max_size: self.inner.max_size,
        }
    }

    fn checked(&self, conn: M::Connection) -> Option<PooledConnection<M>> {
        if self.inner.manager.is_valid(&conn) {
            Some(self.wrap(conn))
        } else {
            log::debug!("discarding broken idle connection");
            drop(conn);
            self.inner.release_slot();
            None
        }
    }

    fn wrap(&self, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
            broken: false,
        }
    }
}

/// A checked-out connection; returns itself to the pool on drop
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<PoolInner<M>>,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Close this connection on drop instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        // only taken in Drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || self.pool.closed.load(Ordering::Acquire) {
            drop(conn);
            self.pool.release_slot();
            return;
        }
        if let Err(err) = self.pool.idle_tx.try_send(conn) {
            drop(err.into_inner());
            self.pool.release_slot();
        }
    }
}
