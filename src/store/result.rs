//! Statement result types.

use serde_json::Value;
use std::collections::BTreeMap;

/// A stored or returned row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Result of executing one statement.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Rows returned from SELECT.
    Select(ResultSet),
    /// Number of rows affected by INSERT/UPDATE/DELETE/TRUNCATE.
    Modified { rows_affected: usize },
    /// DDL statement executed.
    Success { message: String },
}

impl QueryResult {
    /// Create a success result.
    pub fn success(message: impl Into<String>) -> Self {
        QueryResult::Success { message: message.into() }
    }

    /// Create a modified result.
    pub fn modified(rows: usize) -> Self {
        QueryResult::Modified { rows_affected: rows }
    }

    /// Rows affected, zero for anything but a data modification.
    pub fn rows_affected(&self) -> usize {
        match self {
            QueryResult::Modified { rows_affected } => *rows_affected,
            _ => 0,
        }
    }

    /// Consume into a result set; statements without rows yield an empty one.
    pub fn into_result_set(self) -> ResultSet {
        match self {
            QueryResult::Select(rs) => rs,
            _ => ResultSet::new(Vec::new()),
        }
    }
}

/// A set of rows from a SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in projection order.
    pub columns: Vec<String>,
    /// Rows as maps of column name to value.
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create a new empty result set.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Add a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a row by index.
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Iterate over rows.
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
