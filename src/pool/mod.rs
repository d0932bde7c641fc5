//! Connection pooling for the target database
//!
//! [`ConnectionPool`] bounds the number of open connections and hands out
//! [`PooledConnection`] guards that return their connection on drop.

pub mod config;
pub mod manager;
pub mod types;

pub use manager::{ConnectionPool, PgPool, PooledConnection};
pub use types::{ManageConnection, PoolState};
