//! Nested transaction execution.
//!
//! A [`TransactionRunner`] runs caller-supplied units of work against
//! connections from a [`ConnectionProvider`](crate::pool::ConnectionProvider).
//! Transactional work may nest to any depth: every frame of one call stack
//! shares a single connection and a single physical transaction, and only the
//! outermost frame commits or rolls back.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     TransactionRunner                     │
//! │ run / run_in_transaction / run_in_transaction_with_result │
//! └───────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//!  ┌──────────────────────────┐      ┌──────────────────────┐
//!  │   TransactionContext     │      │  ConnectionProvider  │
//!  │ depth, connection, flag  │      │  acquire / close     │
//!  └──────────────────────────┘      └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txnest::transaction::TransactionRunner;
//!
//! let runner = TransactionRunner::new(data_source);
//!
//! runner.run_in_transaction(|tx| {
//!     tx.execute("INSERT INTO accounts (owner) VALUES (?)", &[json!("a")])?;
//!     tx.run_in_transaction(|inner| {
//!         inner.execute("INSERT INTO accounts (owner) VALUES (?)", &[json!("b")])?;
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//! ```

mod context;
mod error;
mod runner;

pub use context::{Transaction, TransactionContext, NO_TRANSACTION};
pub use error::{StatementError, StatementResult, TransactionError, TransactionResult};
pub use runner::TransactionRunner;
