//! The contract between the transaction runner and a connection source.

use std::sync::Arc;

use super::error::ConnectionResult;

/// A physical database connection.
///
/// Autocommit is on when a connection is handed out. Turning it off opens a
/// transaction that lasts until `commit` or `rollback`.
pub trait Connection {
    /// Identifier of the underlying physical connection.
    fn id(&self) -> usize;

    /// Whether each statement commits on its own.
    fn auto_commit(&self) -> bool;

    /// Switch autocommit mode.
    fn set_auto_commit(&mut self, enabled: bool) -> ConnectionResult<()>;

    /// Make all work since autocommit was disabled permanent.
    fn commit(&mut self) -> ConnectionResult<()>;

    /// Discard all work since autocommit was disabled.
    fn rollback(&mut self) -> ConnectionResult<()>;

    /// Return the connection to its provider. Closing twice is a no-op.
    fn close(&mut self) -> ConnectionResult<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// Supplies ready-to-use connections on demand.
pub trait ConnectionProvider {
    type Connection: Connection;

    /// Obtain a connection, blocking until one is available or the
    /// provider gives up.
    fn acquire(&self) -> ConnectionResult<Self::Connection>;
}

impl<P: ConnectionProvider + ?Sized> ConnectionProvider for &P {
    type Connection = P::Connection;

    fn acquire(&self) -> ConnectionResult<Self::Connection> {
        (**self).acquire()
    }
}

impl<P: ConnectionProvider + ?Sized> ConnectionProvider for Arc<P> {
    type Connection = P::Connection;

    fn acquire(&self) -> ConnectionResult<Self::Connection> {
        (**self).acquire()
    }
}
