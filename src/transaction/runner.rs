//! Entry points that run units of work against provided connections.

use tracing::{debug, info, info_span, warn};
use ulid::Ulid;

use super::context::{NestingState, Transaction, TransactionContext};
use super::error::{StatementError, StatementResult, TransactionError, TransactionResult};
use crate::pool::{Connection, ConnectionProvider, ConnectionResult};

/// Runs units of work, alone or inside a shared nested transaction.
///
/// The runner holds no per-call state; it is `Sync` whenever its provider
/// is, so one runner can serve many threads.
#[derive(Debug, Clone)]
pub struct TransactionRunner<P> {
    provider: P,
}

impl<P: ConnectionProvider> TransactionRunner<P> {
    /// Create a runner over a connection provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get the provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run work on a connection of its own, outside any transaction.
    ///
    /// The connection is released on every exit path. If both the work and
    /// the release fail, the work's failure is returned.
    pub fn run<T, F>(&self, work: F) -> TransactionResult<T>
    where
        F: FnOnce(&mut P::Connection) -> StatementResult<T>,
    {
        info!("connecting to the database");
        let mut lease = Lease::new(self.provider.acquire()?);
        debug!(connection = lease.connection.id(), "executing statements");

        let outcome = work(&mut lease.connection);
        let release = lease.release();

        match (outcome, release) {
            (Ok(value), Ok(())) => {
                info!("closed connection to the database");
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), release) => {
                info!(error = %e, "statement execution failed");
                if let Err(release_err) = release {
                    warn!(error = %release_err, "failed to release connection");
                }
                Err(e.into())
            }
        }
    }

    /// Run work inside a transaction.
    pub fn run_in_transaction<F>(&self, work: F) -> TransactionResult<()>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<()>,
    {
        self.run_in_transaction_with_result(work)
    }

    /// Run work inside a transaction and return its result.
    ///
    /// Nested calls made through the [`Transaction`] handle share the same
    /// connection and physical transaction. A failure at any depth rolls the
    /// whole transaction back.
    pub fn run_in_transaction_with_result<T, F>(&self, work: F) -> TransactionResult<T>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<T>,
    {
        let mut ctx = TransactionContext::new();
        self.run_in_context(&mut ctx, work)
    }

    /// Run work inside a transaction tracked by a caller-owned context.
    ///
    /// The context is idle on entry and idle again on return, including when
    /// the work panics; nested calls join through the [`Transaction`] handle.
    pub fn run_in_context<T, F>(
        &self,
        ctx: &mut TransactionContext<P::Connection>,
        work: F,
    ) -> TransactionResult<T>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<T>,
    {
        debug_assert!(!ctx.is_active(), "context borrowed by a running transaction");

        let id = Ulid::new();
        let span = info_span!("transaction", tx_id = %id);
        let _entered = span.enter();

        info!("connecting to the database");
        let mut connection = self.provider.acquire()?;
        if let Err(e) = connection.set_auto_commit(false) {
            if let Err(close_err) = connection.close() {
                warn!(error = %close_err, "failed to release connection");
            }
            return Err(e.into());
        }
        debug!(connection = connection.id(), "transaction started");

        ctx.state.begin(id);
        let mut guard = OutermostGuard { ctx, armed: true };
        let outcome = {
            let ctx = &mut *guard.ctx;
            let connection = ctx.connection.insert(connection);
            self.run_nested(&mut ctx.state, connection, work)
        };
        guard.finish(outcome)
    }

    /// One frame of a transaction: bump the depth, run the work, and record
    /// failure. Never commits or rolls back.
    pub(crate) fn run_nested<T, F>(
        &self,
        state: &mut NestingState,
        connection: &mut P::Connection,
        work: F,
    ) -> TransactionResult<T>
    where
        F: FnOnce(&mut Transaction<'_, P>) -> StatementResult<T>,
    {
        let mut frame = DepthGuard::enter(state);
        let depth = frame.state.depth;
        debug!(depth, "executing statements");

        let outcome = {
            let mut tx = Transaction {
                runner: self,
                state: &mut *frame.state,
                connection,
            };
            work(&mut tx)
        };

        outcome.map_err(|e| {
            frame.state.succeeded = false;
            info!(depth, error = %e, "statement execution failed");
            TransactionError::Statement(e)
        })
    }
}

/// Keeps the depth balanced, and marks the transaction failed when a frame
/// unwinds.
struct DepthGuard<'s> {
    state: &'s mut NestingState,
}

impl<'s> DepthGuard<'s> {
    fn enter(state: &'s mut NestingState) -> Self {
        state.depth += 1;
        Self { state }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state.succeeded = false;
        }
        self.state.depth -= 1;
    }
}

/// Owns the outermost frame's cleanup: resolve, restore autocommit, release.
///
/// `finish` handles normal exits. If the guard is dropped without it (a
/// panic is unwinding), the transaction is rolled back and the connection
/// released before the panic continues.
struct OutermostGuard<'c, C: Connection> {
    ctx: &'c mut TransactionContext<C>,
    armed: bool,
}

impl<C: Connection> OutermostGuard<'_, C> {
    fn finish<T>(mut self, outcome: TransactionResult<T>) -> TransactionResult<T> {
        self.armed = false;
        let ctx = &mut *self.ctx;
        let succeeded = ctx.state.succeeded;
        ctx.state.reset();
        let Some(mut connection) = ctx.connection.take() else {
            return outcome;
        };

        // Success returned over a failed nested call still rolls back
        let commit = succeeded && outcome.is_ok();
        let mut reported = match outcome {
            Ok(_) if !commit => Err(StatementError::RollbackOnly.into()),
            other => other,
        };

        let resolution = if commit {
            info!("committing statements");
            connection.commit()
        } else {
            info!("rolling back statements");
            connection.rollback()
        };

        if let Err(e) = resolution {
            if commit {
                if let Err(rollback_err) = connection.rollback() {
                    warn!(error = %rollback_err, "rollback after failed commit also failed");
                }
            }
            if let Err(superseded) = &reported {
                warn!(error = ?superseded, "failure superseded by transaction resolution error");
            }
            reported = Err(e.into());
        }

        let restore = connection.set_auto_commit(true);
        let release = connection.close();
        for cleanup in [restore, release] {
            if let Err(e) = cleanup {
                if reported.is_ok() {
                    reported = Err(e.into());
                } else {
                    warn!(error = %e, "connection cleanup failed");
                }
            }
        }

        debug!(committed = reported.is_ok(), "released transaction resources");
        reported
    }
}

impl<C: Connection> Drop for OutermostGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(mut connection) = self.ctx.connection.take() {
            warn!(connection = connection.id(), "transaction aborted by panic, rolling back");
            let steps = [
                connection.rollback(),
                connection.set_auto_commit(true),
                connection.close(),
            ];
            for e in steps.into_iter().filter_map(Result::err) {
                warn!(error = %e, "cleanup after panic failed");
            }
        }
        self.ctx.state.reset();
    }
}

/// A connection used by `run`, closed on drop if not released explicitly.
struct Lease<C: Connection> {
    connection: C,
    released: bool,
}

impl<C: Connection> Lease<C> {
    fn new(connection: C) -> Self {
        Self {
            connection,
            released: false,
        }
    }

    fn release(&mut self) -> ConnectionResult<()> {
        self.released = true;
        self.connection.close()
    }
}

impl<C: Connection> Drop for Lease<C> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.connection.close() {
                warn!(error = %e, "failed to release connection");
            }
        }
    }
}
