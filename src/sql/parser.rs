//! SQL parser implementation.
//!
//! Converts SQL strings to our internal AST using sqlparser.

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::ast::*;
use super::error::{ParseError, ParseResult};

/// SQL parser for the in-memory store.
///
/// Positional `?` placeholders are numbered in the order they appear in the
/// statement text; `$n` placeholders keep their explicit number.
#[derive(Debug, Default)]
pub struct Parser {
    positional: usize,
}

impl Parser {
    /// Parse a SQL string into a statement.
    pub fn parse(sql: &str) -> ParseResult<Statement> {
        let sql = sql.trim().trim_end_matches(';').trim();
        if sql.is_empty() {
            return Err(ParseError::Empty);
        }

        // Handle commands not supported by our sqlparser conversion
        if let Some(stmt) = Self::parse_special(sql)? {
            return Ok(stmt);
        }

        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;

        if statements.is_empty() {
            return Err(ParseError::Empty);
        }
        if statements.len() > 1 {
            return Err(ParseError::MultipleStatements(statements.len()));
        }

        Parser::default().convert_statement(&statements[0])
    }

    /// Parse a script of semicolon-separated statements (e.g. a DDL file).
    pub fn parse_script(sql: &str) -> ParseResult<Vec<Statement>> {
        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;
        statements
            .iter()
            .map(|stmt| Parser::default().convert_statement(stmt))
            .collect()
    }

    fn parse_special(sql: &str) -> ParseResult<Option<Statement>> {
        let upper = sql.to_uppercase();
        let words: Vec<&str> = sql.split_whitespace().collect();

        if upper.starts_with("TRUNCATE ") {
            let name = match words.get(1) {
                Some(w) if w.eq_ignore_ascii_case("TABLE") => words.get(2),
                other => other,
            }
            .ok_or(ParseError::MissingName("table"))?;
            return Ok(Some(Statement::Truncate(normalize_name(name))));
        }

        if upper.starts_with("CREATE SCHEMA ") {
            let if_not_exists = upper.starts_with("CREATE SCHEMA IF NOT EXISTS ");
            let index = if if_not_exists { 5 } else { 2 };
            let name = words
                .get(index)
                .ok_or(ParseError::MissingName("schema"))?;
            return Ok(Some(Statement::CreateSchema(CreateSchema {
                name: normalize_name(name),
                if_not_exists,
            })));
        }

        Ok(None)
    }

    fn convert_statement(&mut self, stmt: &sp::Statement) -> ParseResult<Statement> {
        match stmt {
            sp::Statement::CreateTable(create) => self.convert_create_table(create),
            sp::Statement::Drop { object_type, names, if_exists, .. } => {
                Self::convert_drop(object_type, names, *if_exists)
            }
            sp::Statement::Query(query) => self.convert_query(query),
            sp::Statement::Insert(insert) => self.convert_insert(insert),
            sp::Statement::Update { table, assignments, selection, .. } => {
                self.convert_update(table, assignments, selection)
            }
            sp::Statement::Delete(delete) => self.convert_delete(delete),
            other => {
                // Script statements arrive pre-parsed; route the ones we
                // handle textually back through the special-case parser.
                let text = other.to_string();
                Self::parse_special(&text)?
                    .ok_or_else(|| ParseError::statement(text))
            }
        }
    }

    fn convert_create_table(&mut self, create: &sp::CreateTable) -> ParseResult<Statement> {
        let name = Self::extract_table_name(&create.name)?;
        let columns = create
            .columns
            .iter()
            .map(|col| self.convert_column_def(col))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(Statement::CreateTable(CreateTable {
            name,
            columns,
            if_not_exists: create.if_not_exists,
        }))
    }

    fn convert_column_def(&mut self, col: &sp::ColumnDef) -> ParseResult<ColumnDef> {
        let data_type = Self::convert_data_type(&col.data_type)?;
        let mut constraints = Vec::new();
        for opt in &col.options {
            if let Some(c) = self.convert_column_option(&opt.option)? {
                constraints.push(c);
            }
        }

        Ok(ColumnDef {
            name: col.name.value.to_lowercase(),
            data_type,
            constraints,
        })
    }

    fn convert_data_type(dt: &sp::DataType) -> ParseResult<SqlDataType> {
        match dt {
            sp::DataType::Text
            | sp::DataType::Varchar(_)
            | sp::DataType::CharVarying(_)
            | sp::DataType::Character(_)
            | sp::DataType::Char(_)
            | sp::DataType::String(_) => Ok(SqlDataType::Text),

            sp::DataType::Int(_)
            | sp::DataType::Integer(_)
            | sp::DataType::BigInt(_)
            | sp::DataType::SmallInt(_)
            | sp::DataType::TinyInt(_) => Ok(SqlDataType::Integer),

            sp::DataType::Float(_)
            | sp::DataType::Real
            | sp::DataType::Double(_)
            | sp::DataType::DoublePrecision
            | sp::DataType::Decimal(_)
            | sp::DataType::Numeric(_) => Ok(SqlDataType::Float),

            sp::DataType::Boolean | sp::DataType::Bool => Ok(SqlDataType::Boolean),

            sp::DataType::Timestamp(_, _) | sp::DataType::Datetime(_) | sp::DataType::Date => {
                Ok(SqlDataType::Timestamp)
            }

            sp::DataType::Custom(name, _) => match name.to_string().to_uppercase().as_str() {
                "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" => Ok(SqlDataType::Serial),
                other => Err(ParseError::data_type(other.to_string())),
            },

            other => Err(ParseError::data_type(format!("{:?}", other))),
        }
    }

    fn convert_column_option(
        &mut self,
        opt: &sp::ColumnOption,
    ) -> ParseResult<Option<ColumnConstraint>> {
        match opt {
            sp::ColumnOption::Null => Ok(None), // Nullable by default
            sp::ColumnOption::NotNull => Ok(Some(ColumnConstraint::NotNull)),
            sp::ColumnOption::Unique { is_primary, .. } => {
                if *is_primary {
                    Ok(Some(ColumnConstraint::PrimaryKey))
                } else {
                    Ok(Some(ColumnConstraint::Unique))
                }
            }
            sp::ColumnOption::Default(expr) => {
                let e = self.convert_expr(expr)?;
                Ok(Some(ColumnConstraint::Default(e)))
            }
            _ => Ok(None), // Ignore other constraints for now
        }
    }

    fn convert_drop(
        object_type: &sp::ObjectType,
        names: &[sp::ObjectName],
        if_exists: bool,
    ) -> ParseResult<Statement> {
        match object_type {
            sp::ObjectType::Table => {
                if names.len() != 1 {
                    return Err(ParseError::statement(
                        "DROP of several tables".into(),
                    ));
                }
                let name = Self::extract_table_name(&names[0])?;
                Ok(Statement::DropTable(DropTable { name, if_exists }))
            }
            other => Err(ParseError::statement(format!(
                "DROP {:?}",
                other
            ))),
        }
    }

    fn convert_query(&mut self, query: &sp::Query) -> ParseResult<Statement> {
        let select = match query.body.as_ref() {
            sp::SetExpr::Select(s) => s,
            other => {
                return Err(ParseError::statement(format!(
                    "query {:?}",
                    other
                )))
            }
        };

        if select.from.len() != 1 {
            return Err(ParseError::statement(
                "FROM without exactly one table".into(),
            ));
        }
        let from = Self::extract_from_table(&select.from[0])?;

        let columns = self.convert_projection(&select.projection)?;

        let where_clause = select
            .selection
            .as_ref()
            .map(|e| self.convert_expr(e))
            .transpose()?;

        let order_by = query
            .order_by
            .as_ref()
            .map(Self::extract_order_by_exprs)
            .transpose()?
            .unwrap_or_default();

        Ok(Statement::Select(Select {
            columns,
            from,
            where_clause,
            order_by,
        }))
    }

    fn convert_projection(&mut self, items: &[sp::SelectItem]) -> ParseResult<Vec<SelectColumn>> {
        items
            .iter()
            .map(|item| match item {
                sp::SelectItem::Wildcard(_) => Ok(SelectColumn::Wildcard),
                sp::SelectItem::UnnamedExpr(sp::Expr::Identifier(ident)) => {
                    Ok(SelectColumn::Column(ident.value.to_lowercase()))
                }
                sp::SelectItem::UnnamedExpr(sp::Expr::CompoundIdentifier(parts)) => parts
                    .last()
                    .map(|p| SelectColumn::Column(p.value.to_lowercase()))
                    .ok_or_else(|| ParseError::MissingName("column")),
                sp::SelectItem::UnnamedExpr(expr) => Ok(SelectColumn::Expr {
                    expr: self.convert_expr(expr)?,
                    alias: None,
                }),
                sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectColumn::Expr {
                    expr: self.convert_expr(expr)?,
                    alias: Some(alias.value.to_lowercase()),
                }),
                other => Err(ParseError::expression(format!(
                    "select item: {}",
                    other
                ))),
            })
            .collect()
    }

    fn extract_order_by_exprs(ob: &sp::OrderBy) -> ParseResult<Vec<OrderBy>> {
        match &ob.kind {
            sp::OrderByKind::All(_) => Ok(vec![]),
            sp::OrderByKind::Expressions(exprs) => {
                exprs.iter().map(Self::convert_order_by_expr).collect()
            }
        }
    }

    fn convert_order_by_expr(expr: &sp::OrderByExpr) -> ParseResult<OrderBy> {
        let column = match &expr.expr {
            sp::Expr::Identifier(id) => id.value.to_lowercase(),
            other => {
                return Err(ParseError::expression(format!(
                    "ORDER BY expression: {}",
                    other
                )))
            }
        };
        let ascending = expr.options.asc.unwrap_or(true);
        Ok(OrderBy { column, ascending })
    }

    fn convert_insert(&mut self, insert: &sp::Insert) -> ParseResult<Statement> {
        let table = Self::extract_table_from_object(&insert.table)?;

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.iter().map(|c| c.value.to_lowercase()).collect())
        };

        let rows = match insert.source.as_ref().map(|s| s.body.as_ref()) {
            Some(sp::SetExpr::Values(sp::Values { rows, .. })) => rows,
            _ => {
                return Err(ParseError::statement(
                    "INSERT ... SELECT".into(),
                ))
            }
        };

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let converted = row
                .iter()
                .map(|e| self.convert_expr(e))
                .collect::<ParseResult<Vec<_>>>()?;
            values.push(converted);
        }

        Ok(Statement::Insert(Insert {
            table,
            columns,
            values,
        }))
    }

    fn convert_update(
        &mut self,
        table: &sp::TableWithJoins,
        assignments: &[sp::Assignment],
        selection: &Option<sp::Expr>,
    ) -> ParseResult<Statement> {
        let table_name = Self::extract_from_table(table)?;

        let mut assigns = Vec::with_capacity(assignments.len());
        for a in assignments {
            let column = Self::extract_assignment_target(&a.target)?;
            let value = self.convert_expr(&a.value)?;
            assigns.push(Assignment { column, value });
        }

        let where_clause = selection.as_ref().map(|e| self.convert_expr(e)).transpose()?;

        Ok(Statement::Update(Update {
            table: table_name,
            assignments: assigns,
            where_clause,
        }))
    }

    fn extract_assignment_target(target: &sp::AssignmentTarget) -> ParseResult<String> {
        match target {
            sp::AssignmentTarget::ColumnName(name) => {
                // Qualified targets (t.col) keep only the column part
                let full = normalize_name(&name.to_string());
                Ok(full.rsplit('.').next().unwrap_or_default().to_string())
            }
            sp::AssignmentTarget::Tuple(_) => Err(ParseError::expression(
                "tuple assignment".into(),
            )),
        }
    }

    fn convert_delete(&mut self, delete: &sp::Delete) -> ParseResult<Statement> {
        let tables = match &delete.from {
            sp::FromTable::WithFromKeyword(tables) => tables,
            sp::FromTable::WithoutKeyword(tables) => tables,
        };

        if tables.len() != 1 {
            return Err(ParseError::statement(
                "DELETE from several tables".into(),
            ));
        }

        let table = Self::extract_from_table(&tables[0])?;
        let where_clause = delete
            .selection
            .as_ref()
            .map(|e| self.convert_expr(e))
            .transpose()?;

        Ok(Statement::Delete(Delete { table, where_clause }))
    }

    fn convert_expr(&mut self, expr: &sp::Expr) -> ParseResult<Expr> {
        match expr {
            sp::Expr::Identifier(id) => match id.value.to_uppercase().as_str() {
                "CURRENT_TIMESTAMP" | "CURRENT_DATE" if id.quote_style.is_none() => {
                    Ok(Expr::Function("now".into()))
                }
                _ => Ok(Expr::Column(id.value.to_lowercase())),
            },

            sp::Expr::CompoundIdentifier(parts) => {
                // table.column - just use column
                let col = parts
                    .last()
                    .map(|p| p.value.to_lowercase())
                    .ok_or_else(|| ParseError::MissingName("column"))?;
                Ok(Expr::Column(col))
            }

            sp::Expr::Value(v) => self.convert_value(&v.value),

            sp::Expr::BinaryOp { left, op, right } => {
                let l = self.convert_expr(left)?;
                let r = self.convert_expr(right)?;
                let o = Self::convert_binary_op(op)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(l),
                    op: o,
                    right: Box::new(r),
                })
            }

            sp::Expr::UnaryOp { op: sp::UnaryOperator::Not, expr } => {
                Ok(Expr::Not(Box::new(self.convert_expr(expr)?)))
            }

            sp::Expr::UnaryOp { op: sp::UnaryOperator::Minus, expr } => {
                match self.convert_expr(expr)? {
                    Expr::Literal(LiteralValue::Integer(n)) => {
                        Ok(Expr::Literal(LiteralValue::Integer(-n)))
                    }
                    Expr::Literal(LiteralValue::Float(f)) => {
                        Ok(Expr::Literal(LiteralValue::Float(-f)))
                    }
                    other => Err(ParseError::expression(format!(
                        "negation of {:?}",
                        other
                    ))),
                }
            }

            sp::Expr::IsNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(e)?),
                negated: false,
            }),

            sp::Expr::IsNotNull(e) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(e)?),
                negated: true,
            }),

            sp::Expr::InList { expr, list, negated } => {
                let e = self.convert_expr(expr)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    items.push(self.convert_expr(item)?);
                }
                Ok(Expr::InList {
                    expr: Box::new(e),
                    list: items,
                    negated: *negated,
                })
            }

            sp::Expr::Like { expr, pattern, negated, .. } => {
                let e = self.convert_expr(expr)?;
                let p = self.convert_expr(pattern)?;
                Ok(Expr::Like {
                    expr: Box::new(e),
                    pattern: Box::new(p),
                    negated: *negated,
                })
            }

            sp::Expr::Function(f) => {
                let name = f.name.to_string().to_lowercase();
                match name.as_str() {
                    "now" | "current_timestamp" => Ok(Expr::Function("now".into())),
                    _ => Err(ParseError::expression(format!("function {}", name))),
                }
            }

            sp::Expr::Nested(inner) => Ok(Expr::Nested(Box::new(self.convert_expr(inner)?))),

            other => Err(ParseError::expression(format!("{}", other))),
        }
    }

    fn convert_value(&mut self, v: &sp::Value) -> ParseResult<Expr> {
        let literal = match v {
            sp::Value::Null => LiteralValue::Null,
            sp::Value::Boolean(b) => LiteralValue::Boolean(*b),
            sp::Value::Number(s, _) => {
                if let Ok(i) = s.parse::<i64>() {
                    LiteralValue::Integer(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    LiteralValue::Float(f)
                } else {
                    return Err(ParseError::expression(format!("number {}", s)));
                }
            }
            sp::Value::SingleQuotedString(s) => LiteralValue::String(s.clone()),
            sp::Value::DoubleQuotedString(s) => LiteralValue::String(s.clone()),
            sp::Value::Placeholder(p) => return self.convert_placeholder(p),
            other => {
                return Err(ParseError::expression(format!(
                    "value {}",
                    other
                )))
            }
        };
        Ok(Expr::Literal(literal))
    }

    fn convert_placeholder(&mut self, p: &str) -> ParseResult<Expr> {
        if p == "?" {
            self.positional += 1;
            return Ok(Expr::Placeholder(self.positional));
        }
        match p.strip_prefix('$').map(str::parse::<usize>) {
            Some(Ok(n)) if n > 0 => Ok(Expr::Placeholder(n)),
            _ => Err(ParseError::InvalidPlaceholder(p.to_string())),
        }
    }

    fn convert_binary_op(op: &sp::BinaryOperator) -> ParseResult<BinaryOperator> {
        match op {
            sp::BinaryOperator::Eq => Ok(BinaryOperator::Eq),
            sp::BinaryOperator::NotEq => Ok(BinaryOperator::NotEq),
            sp::BinaryOperator::Lt => Ok(BinaryOperator::Lt),
            sp::BinaryOperator::LtEq => Ok(BinaryOperator::LtEq),
            sp::BinaryOperator::Gt => Ok(BinaryOperator::Gt),
            sp::BinaryOperator::GtEq => Ok(BinaryOperator::GtEq),
            sp::BinaryOperator::And => Ok(BinaryOperator::And),
            sp::BinaryOperator::Or => Ok(BinaryOperator::Or),
            other => Err(ParseError::expression(format!(
                "operator {}",
                other
            ))),
        }
    }

    fn extract_table_name(name: &sp::ObjectName) -> ParseResult<String> {
        let name = normalize_name(&name.to_string());
        if name.is_empty() {
            return Err(ParseError::MissingName("table"));
        }
        Ok(name)
    }

    fn extract_table_from_object(table: &sp::TableObject) -> ParseResult<String> {
        match table {
            sp::TableObject::TableName(name) => Self::extract_table_name(name),
            sp::TableObject::TableFunction(_) => {
                Err(ParseError::statement("table function".into()))
            }
        }
    }

    fn extract_from_table(from: &sp::TableWithJoins) -> ParseResult<String> {
        if !from.joins.is_empty() {
            return Err(ParseError::statement("joins".into()));
        }
        match &from.relation {
            sp::TableFactor::Table { name, .. } => Self::extract_table_name(name),
            other => Err(ParseError::statement(format!(
                "FROM clause {}",
                other
            ))),
        }
    }
}

/// Lowercase an identifier (possibly schema-qualified) and strip quoting.
fn normalize_name(name: &str) -> String {
    name.trim_end_matches(';')
        .chars()
        .filter(|c| !matches!(c, '"' | '`'))
        .collect::<String>()
        .to_lowercase()
}
