//! Initialization errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transaction::TransactionError;

/// Result type for database initialization.
pub type InitResult<T> = Result<T, InitError>;

/// Failures while bringing up a database.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot read schema script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema initialization failed: {0}")]
    Schema(#[source] TransactionError),
}
