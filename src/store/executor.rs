//! Statement execution against a store snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::error::{ExecuteError, ExecuteResult};
use super::eval::{compare_values, evaluate, matches_where};
use super::result::{QueryResult, ResultSet, Row};
use super::table::Table;
use crate::sql::{
    CreateSchema, CreateTable, Delete, DropTable, Insert, Select, SelectColumn, Statement, Update,
};

/// The full contents of a store: schemas and tables.
///
/// Every statement either applies completely or leaves the state untouched.
/// Each statement that changes a table stamps it with a new version, and a
/// dropped table keeps its last version, so two states cloned from a common
/// ancestor can tell which tables either one has changed since.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    schemas: BTreeSet<String>,
    tables: BTreeMap<String, Table>,
    versions: BTreeMap<String, u64>,
    generation: u64,
}

impl StoreState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a parsed statement with bound parameters.
    pub fn execute(&mut self, stmt: &Statement, params: &[Value]) -> ExecuteResult<QueryResult> {
        match stmt {
            Statement::CreateSchema(cs) => self.execute_create_schema(cs),
            Statement::CreateTable(ct) => self.execute_create_table(ct),
            Statement::DropTable(dt) => self.execute_drop_table(dt),
            Statement::Select(s) => self.execute_select(s, params),
            Statement::Insert(i) => self.execute_insert(i, params),
            Statement::Update(u) => self.execute_update(u, params),
            Statement::Delete(d) => self.execute_delete(d, params),
            Statement::Truncate(name) => self.execute_truncate(name),
        }
    }

    /// Execute a read-only statement.
    pub fn query(&self, stmt: &Statement, params: &[Value]) -> ExecuteResult<QueryResult> {
        match stmt {
            Statement::Select(s) => self.execute_select(s, params),
            _ => Err(ExecuteError::ReadOnly),
        }
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> ExecuteResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| ExecuteError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> ExecuteResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ExecuteError::TableNotFound(name.to_string()))
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Check if a schema exists.
    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains(name)
    }

    /// Version of a table, `None` if it was never created.
    pub fn version(&self, name: &str) -> Option<u64> {
        self.versions.get(name).copied()
    }

    pub(super) fn versions(&self) -> &BTreeMap<String, u64> {
        &self.versions
    }

    /// Replace (or remove) a table with its contents from another state.
    pub(super) fn install(&mut self, name: &str, from: &StoreState) {
        match from.tables.get(name) {
            Some(table) => {
                self.tables.insert(name.to_string(), table.clone());
            }
            None => {
                self.tables.remove(name);
            }
        }
        self.schemas.extend(from.schemas.iter().cloned());
        self.touch(name);
    }

    fn touch(&mut self, name: &str) {
        self.generation += 1;
        self.versions.insert(name.to_string(), self.generation);
    }

    fn execute_create_schema(&mut self, cs: &CreateSchema) -> ExecuteResult<QueryResult> {
        if !self.schemas.insert(cs.name.clone()) {
            if cs.if_not_exists {
                return Ok(QueryResult::success(format!("Schema '{}' already exists", cs.name)));
            }
            return Err(ExecuteError::SchemaExists(cs.name.clone()));
        }
        Ok(QueryResult::success(format!("Created schema '{}'", cs.name)))
    }

    fn execute_create_table(&mut self, ct: &CreateTable) -> ExecuteResult<QueryResult> {
        if self.tables.contains_key(&ct.name) {
            if ct.if_not_exists {
                return Ok(QueryResult::success(format!("Table '{}' already exists", ct.name)));
            }
            return Err(ExecuteError::TableExists(ct.name.clone()));
        }

        if let Some((schema, _)) = ct.name.split_once('.') {
            if !self.schemas.contains(schema) {
                return Err(ExecuteError::SchemaNotFound(schema.to_string()));
            }
        }

        let table = Table::from_definition(ct)?;
        self.tables.insert(ct.name.clone(), table);
        self.touch(&ct.name);
        Ok(QueryResult::success(format!("Created table '{}'", ct.name)))
    }

    fn execute_drop_table(&mut self, dt: &DropTable) -> ExecuteResult<QueryResult> {
        if self.tables.remove(&dt.name).is_none() {
            if dt.if_exists {
                return Ok(QueryResult::success(format!("Table '{}' does not exist", dt.name)));
            }
            return Err(ExecuteError::TableNotFound(dt.name.clone()));
        }
        self.touch(&dt.name);
        Ok(QueryResult::success(format!("Dropped table '{}'", dt.name)))
    }

    fn execute_select(&self, select: &Select, params: &[Value]) -> ExecuteResult<QueryResult> {
        let table = self.table(&select.from)?;

        let mut rows = Vec::new();
        for row in &table.rows {
            let keep = match &select.where_clause {
                Some(expr) => matches_where(expr, row, params)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        if !select.order_by.is_empty() {
            table.require_columns(select.order_by.iter().map(|o| &o.column))?;
            // Stable sort keeps insertion order among equal keys
            rows.sort_by(|a, b| {
                for key in &select.order_by {
                    let ord = compare_nullable(a.get(&key.column), b.get(&key.column));
                    let ord = if key.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        // One label per select item; wildcards expand in place
        let mut columns = Vec::new();
        let mut labels = Vec::with_capacity(select.columns.len());
        for (i, item) in select.columns.iter().enumerate() {
            let label = match item {
                SelectColumn::Wildcard => {
                    columns.extend(table.column_names());
                    String::new()
                }
                SelectColumn::Column(name) => {
                    table.require_columns([name])?;
                    columns.push(name.clone());
                    name.clone()
                }
                SelectColumn::Expr { alias, .. } => {
                    let label = alias.clone().unwrap_or_else(|| format!("?column{}?", i + 1));
                    columns.push(label.clone());
                    label
                }
            };
            labels.push(label);
        }

        let mut result = ResultSet::new(columns);
        for row in rows {
            let mut projected = Row::new();
            for (item, label) in select.columns.iter().zip(&labels) {
                match item {
                    SelectColumn::Wildcard => {
                        projected.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    SelectColumn::Column(name) => {
                        let value = row.get(name).cloned().unwrap_or(Value::Null);
                        projected.insert(label.clone(), value);
                    }
                    SelectColumn::Expr { expr, .. } => {
                        projected.insert(label.clone(), evaluate(expr, row, params)?);
                    }
                }
            }
            result.push(projected);
        }

        Ok(QueryResult::Select(result))
    }

    fn execute_insert(&mut self, insert: &Insert, params: &[Value]) -> ExecuteResult<QueryResult> {
        let table = self.table(&insert.table)?;

        let column_names = match &insert.columns {
            Some(cols) => {
                table.require_columns(cols)?;
                cols.clone()
            }
            None => table.column_names(),
        };

        let mut serial = table.next_serial();
        let mut new_rows = Vec::with_capacity(insert.values.len());
        for values in &insert.values {
            if values.len() != column_names.len() {
                return Err(ExecuteError::ColumnCountMismatch {
                    columns: column_names.len(),
                    values: values.len(),
                });
            }
            let mut row = Row::new();
            for (name, expr) in column_names.iter().zip(values) {
                row.insert(name.clone(), evaluate(expr, &Row::new(), params)?);
            }
            new_rows.push(table.complete_row(row, &mut serial)?);
        }

        let mut candidate = table.rows.clone();
        candidate.extend(new_rows.iter().cloned());
        table.check_unique(&candidate)?;

        let inserted = new_rows.len();
        let table = self.table_mut(&insert.table)?;
        table.rows = candidate;
        table.set_next_serial(serial);
        if inserted > 0 {
            self.touch(&insert.table);
        }
        Ok(QueryResult::modified(inserted))
    }

    fn execute_update(&mut self, update: &Update, params: &[Value]) -> ExecuteResult<QueryResult> {
        let table = self.table(&update.table)?;
        table.require_columns(update.assignments.iter().map(|a| &a.column))?;

        let mut candidate = Vec::with_capacity(table.rows.len());
        let mut updated = 0;
        for row in &table.rows {
            let matches = match &update.where_clause {
                Some(expr) => matches_where(expr, row, params)?,
                None => true,
            };
            if !matches {
                candidate.push(row.clone());
                continue;
            }
            let mut new_row = row.clone();
            for assignment in &update.assignments {
                let value = evaluate(&assignment.value, row, params)?;
                new_row.insert(assignment.column.clone(), value);
            }
            table.check_row(&new_row)?;
            candidate.push(new_row);
            updated += 1;
        }
        table.check_unique(&candidate)?;

        if updated > 0 {
            self.table_mut(&update.table)?.rows = candidate;
            self.touch(&update.table);
        }
        Ok(QueryResult::modified(updated))
    }

    fn execute_delete(&mut self, delete: &Delete, params: &[Value]) -> ExecuteResult<QueryResult> {
        let table = self.table(&delete.table)?;

        let mut kept = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let matches = match &delete.where_clause {
                Some(expr) => matches_where(expr, row, params)?,
                None => true,
            };
            if !matches {
                kept.push(row.clone());
            }
        }

        let deleted = table.rows.len() - kept.len();
        if deleted > 0 {
            self.table_mut(&delete.table)?.rows = kept;
            self.touch(&delete.table);
        }
        Ok(QueryResult::modified(deleted))
    }

    fn execute_truncate(&mut self, name: &str) -> ExecuteResult<QueryResult> {
        let table = self.table_mut(name)?;
        let removed = table.rows.len();
        table.rows.clear();
        if removed > 0 {
            self.touch(name);
        }
        Ok(QueryResult::modified(removed))
    }
}

/// NULLs sort last.
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}
