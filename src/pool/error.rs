//! Connection-level errors.

use thiserror::Error;

use crate::store::ExecuteError;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Failures to obtain, configure, or release a physical connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No slot became free within the acquisition timeout.
    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The store rejected the configured credentials.
    #[error("authentication failed for user '{0}'")]
    AuthenticationFailed(String),

    /// Operation on a connection that was already returned to its pool.
    #[error("connection {0} is closed")]
    Closed(usize),

    /// Commit or rollback requested while autocommit is enabled.
    #[error("connection is in autocommit mode")]
    NotInTransaction,

    /// The pending work could not be installed; nothing was applied.
    #[error("commit failed")]
    CommitFailed(#[source] ExecuteError),

    /// The schema script could not be applied.
    #[error("database initialization failed")]
    Initialization(#[source] ExecuteError),

    /// Failure reported by an external connection implementation.
    #[error("driver error: {0}")]
    Driver(String),
}

impl ConnectionError {
    /// Whether running the same work again later may succeed: the pool was
    /// busy, or another connection committed to the same tables first.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectionError::PoolExhausted { .. } => true,
            ConnectionError::CommitFailed(e) => e.is_conflict(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_retryable() {
        assert!(ConnectionError::PoolExhausted { waited_ms: 10 }.is_retryable());
        assert!(!ConnectionError::AuthenticationFailed("sa".into()).is_retryable());
        let conflict = ExecuteError::Conflict { tables: vec!["users".into()] };
        assert!(ConnectionError::CommitFailed(conflict).is_retryable());
        let broken = ExecuteError::TableNotFound("users".into());
        assert!(!ConnectionError::CommitFailed(broken).is_retryable());
    }

    #[test]
    fn test_commit_failure_keeps_cause() {
        let err = ConnectionError::CommitFailed(ExecuteError::TableNotFound("users".into()));
        assert_eq!(err.to_string(), "commit failed");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "table not found: users");
    }
}
