//! Table definitions and row validation.

use std::collections::HashSet;

use serde_json::Value;

use super::error::{ExecuteError, ExecuteResult};
use super::eval::evaluate;
use super::result::Row;
use crate::sql::{ColumnConstraint, CreateTable, Expr, SqlDataType};

/// A column definition as stored.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: SqlDataType,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<Expr>,
}

impl Column {
    /// Check that a value fits this column's type and nullability.
    fn check(&self, value: &Value) -> ExecuteResult<()> {
        if value.is_null() {
            if self.not_null {
                return Err(ExecuteError::NullValue(self.name.clone()));
            }
            return Ok(());
        }
        if !type_matches(self.data_type, value) {
            return Err(ExecuteError::TypeMismatch {
                column: self.name.clone(),
                expected: format!("{:?}", self.data_type).to_uppercase(),
                actual: value.to_string(),
            });
        }
        Ok(())
    }
}

fn type_matches(data_type: SqlDataType, value: &Value) -> bool {
    match (data_type, value) {
        (SqlDataType::Text, Value::String(_)) => true,
        (SqlDataType::Integer | SqlDataType::Serial, Value::Number(n)) => n.is_i64(),
        (SqlDataType::Float, Value::Number(_)) => true,
        (SqlDataType::Boolean, Value::Bool(_)) => true,
        (SqlDataType::Timestamp, Value::String(s)) => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        }
        _ => false,
    }
}

/// A table: its columns, rows in insertion order, and the SERIAL counter.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    next_serial: i64,
}

impl Table {
    /// Build an empty table from a CREATE TABLE statement.
    pub fn from_definition(def: &CreateTable) -> ExecuteResult<Self> {
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(def.columns.len());
        for col in &def.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(ExecuteError::DuplicateColumn(col.name.clone()));
            }
            let primary_key = col.constraints.contains(&ColumnConstraint::PrimaryKey);
            let default = col.constraints.iter().find_map(|c| match c {
                ColumnConstraint::Default(expr) => Some(expr.clone()),
                _ => None,
            });
            columns.push(Column {
                name: col.name.clone(),
                data_type: col.data_type,
                not_null: primary_key || col.constraints.contains(&ColumnConstraint::NotNull),
                unique: primary_key || col.constraints.contains(&ColumnConstraint::Unique),
                primary_key,
                default,
            });
        }

        Ok(Self {
            name: def.name.clone(),
            columns,
            rows: Vec::new(),
            next_serial: 1,
        })
    }

    /// Get a column definition by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in definition order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Ensure every named column exists.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> ExecuteResult<()> {
        for name in names {
            if self.column(name).is_none() {
                return Err(ExecuteError::ColumnNotFound(format!("{}.{}", self.name, name)));
            }
        }
        Ok(())
    }

    /// Complete a row being inserted: fill defaults and SERIAL values,
    /// null-fill the rest, and check types. `serial` is the counter to draw
    /// from; the caller commits it once the whole statement succeeds.
    pub fn complete_row(&self, mut row: Row, serial: &mut i64) -> ExecuteResult<Row> {
        for col in &self.columns {
            if !row.contains_key(&col.name) {
                let value = match (&col.default, col.data_type) {
                    (Some(expr), _) => evaluate(expr, &Row::new(), &[])?,
                    (None, SqlDataType::Serial) => {
                        let v = *serial;
                        *serial += 1;
                        Value::from(v)
                    }
                    (None, _) => Value::Null,
                };
                row.insert(col.name.clone(), value);
            } else if col.data_type == SqlDataType::Serial {
                // Explicit ids push the counter past them
                if let Some(n) = row.get(&col.name).and_then(Value::as_i64) {
                    *serial = (*serial).max(n + 1);
                }
            }
        }
        self.check_row(&row)?;
        Ok(row)
    }

    /// Check types and nullability of every column in a row.
    pub fn check_row(&self, row: &Row) -> ExecuteResult<()> {
        for col in &self.columns {
            col.check(row.get(&col.name).unwrap_or(&Value::Null))?;
        }
        Ok(())
    }

    /// Check UNIQUE / PRIMARY KEY constraints across a candidate row set.
    pub fn check_unique(&self, rows: &[Row]) -> ExecuteResult<()> {
        for col in self.columns.iter().filter(|c| c.unique) {
            let mut seen = HashSet::new();
            for value in rows.iter().filter_map(|r| r.get(&col.name)) {
                if value.is_null() {
                    continue;
                }
                let key = value.to_string();
                if !seen.insert(key.clone()) {
                    return Err(ExecuteError::DuplicateKey {
                        column: col.name.clone(),
                        value: key,
                    });
                }
            }
        }
        Ok(())
    }

    /// Current SERIAL counter.
    pub fn next_serial(&self) -> i64 {
        self.next_serial
    }

    /// Advance the SERIAL counter after a successful insert.
    pub fn set_next_serial(&mut self, next: i64) {
        self.next_serial = self.next_serial.max(next);
    }
}
