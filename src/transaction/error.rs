//! Transaction error types.

use thiserror::Error;

use crate::pool::ConnectionError;
use crate::store::ExecuteError;

/// Result type for runner entry points.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Result type for units of work.
pub type StatementResult<T> = Result<T, StatementError>;

/// The two failure kinds a runner reports.
///
/// The wrapped cause is always available through `source()`.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A connection could not be obtained, configured, committed, or released.
    #[error("error during database connection")]
    Connection(#[from] ConnectionError),

    /// The unit of work failed; the whole transaction was rolled back.
    #[error("error during statement execution")]
    Statement(#[from] StatementError),
}

impl TransactionError {
    /// Whether this is a connection-level failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransactionError::Connection(_))
    }

    /// Whether this is a statement-level failure.
    pub fn is_statement(&self) -> bool {
        matches!(self, TransactionError::Statement(_))
    }

    /// The statement failure, if that is what this is.
    pub fn as_statement(&self) -> Option<&StatementError> {
        match self {
            TransactionError::Statement(e) => Some(e),
            TransactionError::Connection(_) => None,
        }
    }

    /// The connection failure, if that is what this is.
    pub fn as_connection(&self) -> Option<&ConnectionError> {
        match self {
            TransactionError::Connection(e) => Some(e),
            TransactionError::Statement(_) => None,
        }
    }
}

/// Failures raised by a unit of work.
#[derive(Debug, Error)]
pub enum StatementError {
    /// The store rejected a statement.
    #[error(transparent)]
    Execute(#[from] ExecuteError),

    /// The connection broke while a statement was running.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Failure raised by the unit of work itself.
    #[error("{0}")]
    Failed(String),

    /// A nested call failed and the outer call returned success anyway.
    #[error("transaction was rolled back because a nested call failed")]
    RollbackOnly,
}

impl StatementError {
    /// Raise a failure from inside a unit of work.
    pub fn msg(message: impl Into<String>) -> Self {
        StatementError::Failed(message.into())
    }
}

/// Lets a unit of work propagate a nested call's failure with `?`.
///
/// The nested failure is unwrapped so the root cause is kept as-is.
impl From<TransactionError> for StatementError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::Statement(inner) => inner,
            TransactionError::Connection(inner) => StatementError::Connection(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_messages() {
        let conn: TransactionError = ConnectionError::PoolExhausted { waited_ms: 5 }.into();
        assert_eq!(conn.to_string(), "error during database connection");
        assert!(conn.is_connection());

        let stmt: TransactionError = StatementError::msg("boom").into();
        assert_eq!(stmt.to_string(), "error during statement execution");
        assert!(stmt.is_statement());
    }

    #[test]
    fn test_cause_reachable_through_source() {
        let err: TransactionError =
            StatementError::from(ExecuteError::TableNotFound("users".into())).into();
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "table not found: users");
    }

    #[test]
    fn test_nested_failure_keeps_root_cause() {
        let nested: TransactionError = StatementError::msg("inner failed").into();
        let propagated = StatementError::from(nested);
        assert!(matches!(propagated, StatementError::Failed(ref m) if m == "inner failed"));

        let nested: TransactionError = ConnectionError::Closed(3).into();
        assert!(matches!(
            StatementError::from(nested),
            StatementError::Connection(ConnectionError::Closed(3))
        ));
    }
}
