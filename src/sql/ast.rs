//! Internal AST types for the statements the in-memory store understands.
//!
//! These are simplified representations of SQL statements; anything the
//! store cannot execute is rejected at parse time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One statement a connection can run. Only `Select` leaves the store
/// untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSchema(CreateSchema),
    CreateTable(CreateTable),
    DropTable(DropTable),
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Removes every row, keeping the table and its SERIAL counter.
    Truncate(String),
}

impl Statement {
    /// Whether executing this statement can change stored data.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }

    /// Number of bind values the statement needs: its highest placeholder.
    pub fn parameter_count(&self) -> usize {
        let mut max = 0;
        let mut visit = |expr: &Expr| max = max.max(expr.max_placeholder());
        match self {
            Statement::Select(s) => {
                s.columns.iter().for_each(|c| {
                    if let SelectColumn::Expr { expr, .. } = c {
                        visit(expr)
                    }
                });
                s.where_clause.iter().for_each(&mut visit);
            }
            Statement::Insert(i) => i.values.iter().flatten().for_each(&mut visit),
            Statement::Update(u) => {
                u.assignments.iter().for_each(|a| visit(&a.value));
                u.where_clause.iter().for_each(&mut visit);
            }
            Statement::Delete(d) => d.where_clause.iter().for_each(&mut visit),
            Statement::CreateSchema(_)
            | Statement::CreateTable(_)
            | Statement::DropTable(_)
            | Statement::Truncate(_) => {}
        }
        max
    }
}

/// `CREATE SCHEMA [IF NOT EXISTS] name`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSchema {
    pub name: String,
    pub if_not_exists: bool,
}

/// `CREATE TABLE [IF NOT EXISTS] name (...)`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    /// Table name, schema-qualified when written that way.
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub if_not_exists: bool,
}

/// One column of a `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: SqlDataType,
    pub constraints: Vec<ColumnConstraint>,
}

/// Column types a table can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDataType {
    Text,
    Integer,
    /// Auto-incrementing integer.
    Serial,
    Float,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    NotNull,
    Unique,
    PrimaryKey,
    Default(Expr),
}

/// `DROP TABLE [IF EXISTS] name`
#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub name: String,
    pub if_exists: bool,
}

/// Single-table query; rows come back in insertion order unless ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: Vec<SelectColumn>,
    pub from: String,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderBy>,
}

/// Projection item.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Wildcard,
    Column(String),
    /// Computed value, labelled by its alias or `?columnN?`.
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Multi-row `INSERT ... VALUES`.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    /// `None` means every column in table order.
    pub columns: Option<Vec<String>>,
    pub values: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

/// `column = value` in a SET list.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Expr>,
}

/// Scalar expression, evaluated against one row and the bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(LiteralValue),
    /// Bind parameter, 1-based: the n-th `?` or an explicit `$n`.
    Placeholder(usize),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `%` and `_` wildcards, case-sensitive.
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    /// Zero-argument function such as CURRENT_TIMESTAMP.
    Function(String),
    Nested(Box<Expr>),
}

impl Expr {
    /// Highest placeholder index referenced by this expression (0 if none).
    pub fn max_placeholder(&self) -> usize {
        match self {
            Expr::Placeholder(n) => *n,
            Expr::BinaryOp { left, right, .. } => {
                left.max_placeholder().max(right.max_placeholder())
            }
            Expr::Not(e) | Expr::Nested(e) | Expr::IsNull { expr: e, .. } => e.max_placeholder(),
            Expr::InList { expr, list, .. } => list
                .iter()
                .map(Expr::max_placeholder)
                .fold(expr.max_placeholder(), usize::max),
            Expr::Like { expr, pattern, .. } => {
                expr.max_placeholder().max(pattern.max_placeholder())
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Function(_) => 0,
        }
    }
}

/// Constant written in the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl LiteralValue {
    /// The stored form. Non-finite floats become NULL.
    pub fn to_json(&self) -> Value {
        match self {
            LiteralValue::Null => Value::Null,
            LiteralValue::Boolean(b) => Value::Bool(*b),
            LiteralValue::Integer(n) => Value::Number((*n).into()),
            LiteralValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            LiteralValue::String(s) => Value::String(s.clone()),
        }
    }
}

/// Comparison and logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}
