//! txnest - nested transactions over pooled connections
//!
//! Units of work run either on a connection of their own or inside a
//! transaction. Transactional work may call further transactional work:
//! every level shares one connection and one physical transaction, only the
//! outermost level commits, and a failure anywhere rolls everything back.
//!
//! The bundled [`pool::DataSource`] pools connections to an in-memory SQL
//! store, so the crate runs without an external database.
//!
//! # Example
//!
//! ```no_run
//! use txnest::config::DataSourceConfig;
//! use txnest::schema::{initialize_database, SchemaInitializer};
//! use txnest::users;
//!
//! let config = DataSourceConfig::new("mem:users_directory", "sa", "");
//! let runner = initialize_database(config, &SchemaInitializer::bundled()).unwrap();
//!
//! runner
//!     .run_in_transaction(|tx| {
//!         users::insert_user(tx, "john_doe", "john.doe@example.com")?;
//!         tx.run_in_transaction(|inner| {
//!             users::insert_user(inner, "jane_doe", "jane.doe@example.com")?;
//!             Ok(())
//!         })?;
//!         Ok(())
//!     })
//!     .unwrap();
//! ```

pub mod config;
pub mod pool;
pub mod schema;
pub mod sql;
pub mod store;
pub mod transaction;
pub mod users;

pub use pool::{Connection, ConnectionError, ConnectionProvider, DataSource, PooledConnection};
pub use transaction::{
    StatementError, StatementResult, Transaction, TransactionContext, TransactionError,
    TransactionResult, TransactionRunner,
};
