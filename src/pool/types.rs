use crate::connection::ConnectionError;

/// Opens and health-checks the connections a [`ConnectionPool`](super::ConnectionPool) hands out
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a fresh connection
    fn connect(&self) -> Result<Self::Connection, ConnectionError>;

    /// Whether an idle connection can still be handed out
    fn is_valid(&self, conn: &Self::Connection) -> bool;
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Open connections, idle or checked out
    pub connections: u32,
    /// Connections sitting in the idle queue
    pub idle: u32,
    pub max_size: u32,
}
