//! # Shoreline
//!
//! Ordered, idempotent PostgreSQL schema migrations on the `may` coroutine runtime.
//!
//! Migration units are plain `.sql` files (or Rust types implementing
//! [`migration::Migration`]). The [`migration::Migrator`] applies every pending
//! unit in version order, each in its own transaction together with its ledger
//! record, under a cross-process advisory lock.
//!
//! ```rust,no_run
//! use shoreline::config::ShorelineConfig;
//! use shoreline::migration::migrate_with_config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShorelineConfig::load()?;
//! let report = migrate_with_config(&config)?;
//! for result in report.results() {
//!     println!("{} {:?}", result.name, result.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod executor;
pub mod migration;
pub mod pool;
pub mod transaction;

#[cfg(feature = "tracing")]
pub mod tracing_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use connection::{connect, ConnectionError};
pub use executor::{DbError, Executor, PgExecutor};
pub use pool::{ConnectionPool, PgPool, PooledConnection};
