//! Per-call-stack transaction state.

use std::ops::{Deref, DerefMut};

use ulid::Ulid;

use super::error::{StatementResult, TransactionResult};
use super::runner::TransactionRunner;
use crate::pool::ConnectionProvider;

/// Depth value meaning no transaction is active.
pub const NO_TRANSACTION: i32 = -1;

/// Nesting bookkeeping shared by every frame of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NestingState {
    pub(crate) depth: i32,
    pub(crate) succeeded: bool,
    pub(crate) id: Option<Ulid>,
}

impl NestingState {
    pub(crate) fn idle() -> Self {
        Self {
            depth: NO_TRANSACTION,
            succeeded: false,
            id: None,
        }
    }

    pub(crate) fn begin(&mut self, id: Ulid) {
        self.succeeded = true;
        self.id = Some(id);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::idle();
    }
}

/// Transaction state for one logical call stack.
///
/// Holds the nesting depth, the connection pinned to the active transaction,
/// and whether every frame so far has succeeded. The connection is present
/// exactly while `depth() >= 0`.
///
/// [`TransactionRunner::run_in_transaction`] creates one per call; create one
/// yourself and pass it to [`TransactionRunner::run_in_context`] to reuse it
/// across transactions.
#[derive(Debug)]
pub struct TransactionContext<C> {
    pub(crate) state: NestingState,
    pub(crate) connection: Option<C>,
}

impl<C> TransactionContext<C> {
    /// Create an idle context.
    pub fn new() -> Self {
        Self {
            state: NestingState::idle(),
            connection: None,
        }
    }

    /// Current nesting depth, `-1` when idle.
    pub fn depth(&self) -> i32 {
        self.state.depth
    }

    /// Whether a transaction is in progress.
    pub fn is_active(&self) -> bool {
        self.state.depth > NO_TRANSACTION
    }

    /// Whether no frame of the current transaction has failed.
    pub fn succeeded(&self) -> bool {
        self.state.succeeded
    }

    /// Identifier of the current transaction.
    pub fn transaction_id(&self) -> Option<Ulid> {
        self.state.id
    }

    /// The pinned connection, if a transaction is in progress.
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }
}

impl<C> Default for TransactionContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle given to a transactional unit of work.
///
/// Dereferences to the pinned connection, and opens nested transactional
/// calls that share it.
pub struct Transaction<'a, P: ConnectionProvider> {
    pub(crate) runner: &'a TransactionRunner<P>,
    pub(crate) state: &'a mut NestingState,
    pub(crate) connection: &'a mut P::Connection,
}

impl<'a, P: ConnectionProvider> Transaction<'a, P> {
    /// The connection every frame of this transaction uses.
    pub fn connection(&mut self) -> &mut P::Connection {
        &mut *self.connection
    }

    /// Nesting depth of this frame; the outermost frame is 0.
    pub fn depth(&self) -> i32 {
        self.state.depth
    }

    /// Identifier of the enclosing outermost transaction.
    pub fn transaction_id(&self) -> Option<Ulid> {
        self.state.id
    }

    /// Whether no frame of this transaction has failed so far.
    pub fn succeeded(&self) -> bool {
        self.state.succeeded
    }

    /// Run nested work inside this transaction.
    pub fn run_in_transaction<F>(&mut self, work: F) -> TransactionResult<()>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<()>,
    {
        self.run_in_transaction_with_result(work)
    }

    /// Run nested work inside this transaction and return its result.
    ///
    /// A failure marks the whole transaction for rollback; the outermost
    /// frame decides.
    pub fn run_in_transaction_with_result<T, F>(&mut self, work: F) -> TransactionResult<T>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<T>,
    {
        self.runner
            .run_nested(&mut *self.state, &mut *self.connection, work)
    }
}

impl<P: ConnectionProvider> Deref for Transaction<'_, P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        &*self.connection
    }
}

impl<P: ConnectionProvider> DerefMut for Transaction<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.connection
    }
}
