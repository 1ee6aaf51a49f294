//! Expression evaluation.

use std::cmp::Ordering;

use serde_json::Value;

use super::error::{ExecuteError, ExecuteResult};
use super::result::Row;
use crate::sql::{BinaryOperator, Expr};

/// Evaluate an expression against a row with bound parameters.
pub fn evaluate(expr: &Expr, row: &Row, params: &[Value]) -> ExecuteResult<Value> {
    match expr {
        Expr::Column(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| ExecuteError::ColumnNotFound(name.clone())),

        Expr::Literal(lit) => Ok(lit.to_json()),

        Expr::Placeholder(n) => n
            .checked_sub(1)
            .and_then(|i| params.get(i))
            .cloned()
            .ok_or(ExecuteError::MissingParameter(*n)),

        Expr::BinaryOp { left, op, right } => {
            let l = evaluate(left, row, params)?;
            let r = evaluate(right, row, params)?;
            Ok(eval_binary_op(&l, *op, &r))
        }

        Expr::Not(inner) => {
            let v = evaluate(inner, row, params)?;
            Ok(Value::Bool(!value_to_bool(&v)))
        }

        Expr::IsNull { expr, negated } => {
            let is_null = evaluate(expr, row, params)?.is_null();
            Ok(Value::Bool(is_null != *negated))
        }

        Expr::InList { expr, list, negated } => {
            let v = evaluate(expr, row, params)?;
            let mut found = false;
            for item in list {
                if values_equal(&v, &evaluate(item, row, params)?) {
                    found = true;
                    break;
                }
            }
            Ok(Value::Bool(found != *negated))
        }

        Expr::Like { expr, pattern, negated } => {
            let v = evaluate(expr, row, params)?;
            let p = evaluate(pattern, row, params)?;
            let pattern = p.as_str().ok_or_else(|| {
                ExecuteError::InvalidExpression(format!("LIKE pattern must be text, got {}", p))
            })?;
            let matches = like_match(v.as_str().unwrap_or(""), pattern);
            Ok(Value::Bool(matches != *negated))
        }

        Expr::Function(name) => eval_function(name),

        Expr::Nested(inner) => evaluate(inner, row, params),
    }
}

/// Evaluate a WHERE clause, returning true if row matches.
pub fn matches_where(expr: &Expr, row: &Row, params: &[Value]) -> ExecuteResult<bool> {
    let result = evaluate(expr, row, params)?;
    Ok(value_to_bool(&result))
}

fn eval_binary_op(left: &Value, op: BinaryOperator, right: &Value) -> Value {
    let compare = |f: fn(Ordering) -> bool| {
        Value::Bool(compare_values(left, right).map(f).unwrap_or(false))
    };
    match op {
        BinaryOperator::Eq => Value::Bool(values_equal(left, right)),
        BinaryOperator::NotEq => {
            Value::Bool(!left.is_null() && !right.is_null() && !values_equal(left, right))
        }
        BinaryOperator::Lt => compare(Ordering::is_lt),
        BinaryOperator::LtEq => compare(Ordering::is_le),
        BinaryOperator::Gt => compare(Ordering::is_gt),
        BinaryOperator::GtEq => compare(Ordering::is_ge),
        BinaryOperator::And => Value::Bool(value_to_bool(left) && value_to_bool(right)),
        BinaryOperator::Or => Value::Bool(value_to_bool(left) || value_to_bool(right)),
    }
}

fn eval_function(name: &str) -> ExecuteResult<Value> {
    match name {
        "now" => Ok(Value::String(chrono::Utc::now().to_rfc3339())),
        _ => Err(ExecuteError::InvalidExpression(format!(
            "unknown function: {}",
            name
        ))),
    }
}

/// Check if two JSON values are equal. NULL never equals anything.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .map(|(x, y)| (x - y).abs() < f64::EPSILON)
                .unwrap_or(false),
        },
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Compare two JSON values of the same kind.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// SQL LIKE matching: `%` is any sequence, `_` any single character.
fn like_match(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    match_like(&s, &p)
}

fn match_like(s: &[char], p: &[char]) -> bool {
    match p.split_first() {
        None => s.is_empty(),
        Some(('%', rest)) => (0..=s.len()).any(|i| match_like(&s[i..], rest)),
        Some(('_', rest)) => !s.is_empty() && match_like(&s[1..], rest),
        Some((c, rest)) => s.first() == Some(c) && match_like(&s[1..], rest),
    }
}
