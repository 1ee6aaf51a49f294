//! Connection providers.
//!
//! [`ConnectionProvider`] and [`Connection`] are the seam between the
//! transaction runner and whatever hands out physical connections.
//! [`DataSource`] is the bundled implementation: a bounded pool over an
//! in-memory store.

mod datasource;
mod error;
mod provider;

pub use datasource::{DataSource, PoolStats, PooledConnection};
pub use error::{ConnectionError, ConnectionResult};
pub use provider::{Connection, ConnectionProvider};
