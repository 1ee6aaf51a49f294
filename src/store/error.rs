//! Statement execution errors.

use thiserror::Error;

use crate::sql::ParseError;

/// Result type for statement execution.
pub type ExecuteResult<T> = Result<T, ExecuteError>;

/// Statement execution errors.
#[derive(Debug, Clone, Error)]
pub enum ExecuteError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("schema already exists: {0}")]
    SchemaExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("type mismatch in column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("null value in non-nullable column: {0}")]
    NullValue(String),

    #[error("duplicate key in column '{column}': {value}")]
    DuplicateKey { column: String, value: String },

    #[error("INSERT has {values} values for {columns} columns")]
    ColumnCountMismatch { columns: usize, values: usize },

    #[error("no value bound for parameter ${0}")]
    MissingParameter(usize),

    #[error("statement modifies data in a read-only context")]
    ReadOnly,

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Tables changed by another connection after the snapshot was taken.
    #[error("concurrent modification of {}", tables.join(", "))]
    Conflict { tables: Vec<String> },
}

impl ExecuteError {
    /// Whether the statement was rejected by a column constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ExecuteError::NullValue(_)
                | ExecuteError::DuplicateKey { .. }
                | ExecuteError::TypeMismatch { .. }
        )
    }

    /// Whether the failure came from a concurrent commit, not from the
    /// statement itself.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ExecuteError::Conflict { .. })
    }
}
