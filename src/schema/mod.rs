//! One-time schema bootstrap.

mod error;

use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::config::DataSourceConfig;
use crate::pool::{ConnectionError, DataSource};
use crate::transaction::{StatementError, TransactionError, TransactionResult, TransactionRunner};

pub use error::{InitError, InitResult};

/// The user directory schema shipped with the crate.
pub const BUNDLED_SCHEMA: &str = include_str!("../../resources/schema.sql");

/// A DDL script to run before first use.
#[derive(Debug, Clone)]
pub struct SchemaInitializer {
    script: String,
    origin: String,
}

impl SchemaInitializer {
    /// Use a script given as a string.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            origin: "inline".to_string(),
        }
    }

    /// Read the script from a file.
    pub fn from_file(path: impl AsRef<Path>) -> InitResult<Self> {
        let path = path.as_ref();
        let script = std::fs::read_to_string(path).map_err(|source| InitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            script,
            origin: path.display().to_string(),
        })
    }

    /// The bundled user directory schema.
    pub fn bundled() -> Self {
        Self {
            script: BUNDLED_SCHEMA.to_string(),
            origin: "bundled".to_string(),
        }
    }

    /// The script text.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Run the script on one connection from the data source.
    ///
    /// Any failure is reported as a connection error: a database whose schema
    /// cannot be applied is not usable.
    pub fn apply(&self, data_source: &DataSource) -> TransactionResult<()> {
        info!(origin = %self.origin, "applying schema");
        let runner = TransactionRunner::new(data_source);
        match runner.run(|conn| conn.execute_script(&self.script)) {
            Err(TransactionError::Statement(StatementError::Execute(e))) => {
                Err(ConnectionError::Initialization(e).into())
            }
            Err(TransactionError::Statement(StatementError::Connection(e))) => Err(e.into()),
            other => other,
        }
    }
}

/// Build a data source from `config`, apply the schema, and return a runner.
pub fn initialize_database(
    config: DataSourceConfig,
    initializer: &SchemaInitializer,
) -> InitResult<TransactionRunner<DataSource>> {
    let started = Utc::now();
    info!(at = %started.to_rfc3339(), url = %config.url, "initializing database");

    let data_source = DataSource::new(config)?;
    initializer.apply(&data_source).map_err(InitError::Schema)?;

    let elapsed = Utc::now() - started;
    info!(
        elapsed_ms = elapsed.num_milliseconds(),
        tables = ?data_source.store().table_names(),
        "database initialized"
    );
    Ok(TransactionRunner::new(data_source))
}
