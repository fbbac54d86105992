//! The statement executor: evaluates expressions against rows and drives
//! the storage coordinator.

use std::cmp::Ordering;
use std::collections::HashMap;

use strata::transaction::Snapshot;
use strata::TransactionId;

use crate::errors::EngineError;
use crate::functions::{FunctionRegistry, VirtualTable};
use crate::parser::{
    BinaryOperator, CreateTableStatement, DeleteStatement, Expression, InsertStatement,
    LiteralValue, SelectItem, SelectStatement, Statement, TableReference, UnaryOperator,
    UpdateStatement,
};
use crate::schema::{Column, Table};
use crate::storage::Storage;
use crate::types::{Datum, ExecuteResult, ResultSet, Row, SqlType, Value};

const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

pub struct ExecuteCtx<'a> {
    pub storage: &'a mut Storage,
    pub functions: &'a FunctionRegistry,
    pub virtual_tables: &'a HashMap<String, VirtualTable>,
    /// Zero for read-only autocommit statements.
    pub tid: TransactionId,
    pub snapshot: Snapshot,
    pub params: &'a [Value],
}

pub fn execute(stmt: &Statement, ctx: &mut ExecuteCtx) -> Result<ExecuteResult, EngineError> {
    match stmt {
        Statement::Select(select) => execute_select(select, ctx).map(ExecuteResult::Rows),
        Statement::CreateTable(create) => execute_create_table(create, ctx),
        Statement::DropTable(name) => {
            ctx.storage.drop_table(name, ctx.tid)?;
            Ok(ExecuteResult::Ddl)
        }
        Statement::Insert(insert) => execute_insert(insert, ctx).map(ExecuteResult::Inserted),
        Statement::Update(update) => execute_update(update, ctx).map(ExecuteResult::Updated),
        Statement::Delete(delete) => execute_delete(delete, ctx).map(ExecuteResult::Deleted),
        // Transaction control never reaches the executor; the connection
        // handles it against its own state machine.
        Statement::StartTransaction | Statement::Commit | Statement::Rollback => {
            Ok(ExecuteResult::Tx)
        }
    }
}

fn execute_create_table(
    stmt: &CreateTableStatement,
    ctx: &mut ExecuteCtx,
) -> Result<ExecuteResult, EngineError> {
    let mut columns = Vec::new();
    for def in &stmt.columns {
        let is_primary = stmt.primary_key.as_deref() == Some(def.name.as_str());
        columns.push(Column {
            name: def.name.clone(),
            sql_type: def.sql_type,
            nullable: !def.not_null && !is_primary,
        });
    }
    ctx.storage
        .create_table(&stmt.table_name, columns, stmt.primary_key.clone(), ctx.tid)?;
    Ok(ExecuteResult::Ddl)
}

fn execute_insert(stmt: &InsertStatement, ctx: &mut ExecuteCtx) -> Result<u32, EngineError> {
    if ctx.virtual_tables.contains_key(&stmt.table_name) {
        return Err(EngineError::NotSupported(
            "writing to a virtual table".to_string(),
        ));
    }
    let table = ctx.storage.table(&stmt.table_name, &ctx.snapshot)?;
    let target_columns: Vec<String> = match &stmt.columns {
        Some(columns) => columns.clone(),
        None => table.columns.iter().map(|c| c.name.clone()).collect(),
    };
    for name in &target_columns {
        if table.column(name).is_none() {
            return Err(EngineError::UndefinedColumn(name.clone()));
        }
    }

    let empty = HashMap::new();
    let mut count = 0;
    for row_exprs in &stmt.rows {
        if row_exprs.len() != target_columns.len() {
            return Err(EngineError::Syntax(format!(
                "INSERT supplies {} values for {} columns",
                row_exprs.len(),
                target_columns.len()
            )));
        }
        let mut columns = HashMap::new();
        for (name, expr) in target_columns.iter().zip(row_exprs) {
            let value = eval_expr(expr, &empty, ctx.functions, ctx.params)?;
            let declared = table.column(name).unwrap().sql_type;
            columns.insert(name.clone(), retag(value, declared));
        }
        ctx.storage.write_row(&table, columns, ctx.tid)?;
        count += 1;
    }
    Ok(count)
}

fn execute_update(stmt: &UpdateStatement, ctx: &mut ExecuteCtx) -> Result<u32, EngineError> {
    if ctx.virtual_tables.contains_key(&stmt.table_name) {
        return Err(EngineError::NotSupported(
            "writing to a virtual table".to_string(),
        ));
    }
    let table = ctx.storage.table(&stmt.table_name, &ctx.snapshot)?;
    for (name, _) in &stmt.assignments {
        if table.column(name).is_none() {
            return Err(EngineError::UndefinedColumn(name.clone()));
        }
    }
    let snapshot = ctx.snapshot.clone();
    let rows = ctx.storage.scan_table(&table, &snapshot)?;

    let mut count = 0;
    for row in rows {
        let env = row_env(&table, None, &row);
        if !matches_where(stmt.where_clause.as_ref(), &env, ctx)? {
            continue;
        }
        let mut new_columns = row.columns.clone();
        for (name, expr) in &stmt.assignments {
            let value = eval_expr(expr, &env, ctx.functions, ctx.params)?;
            let declared = table.column(name).unwrap().sql_type;
            new_columns.insert(name.clone(), retag(value, declared));
        }
        ctx.storage.update_row(&table, &row, new_columns, ctx.tid)?;
        count += 1;
    }
    Ok(count)
}

fn execute_delete(stmt: &DeleteStatement, ctx: &mut ExecuteCtx) -> Result<u32, EngineError> {
    if ctx.virtual_tables.contains_key(&stmt.table_name) {
        return Err(EngineError::NotSupported(
            "writing to a virtual table".to_string(),
        ));
    }
    let table = ctx.storage.table(&stmt.table_name, &ctx.snapshot)?;
    let snapshot = ctx.snapshot.clone();
    let rows = ctx.storage.scan_table(&table, &snapshot)?;

    let mut count = 0;
    for row in rows {
        let env = row_env(&table, None, &row);
        if !matches_where(stmt.where_clause.as_ref(), &env, ctx)? {
            continue;
        }
        ctx.storage.delete_row(&table, &row, ctx.tid)?;
        count += 1;
    }
    Ok(count)
}

fn matches_where(
    where_clause: Option<&Expression>,
    env: &HashMap<String, Value>,
    ctx: &ExecuteCtx,
) -> Result<bool, EngineError> {
    match where_clause {
        Some(expr) => {
            let value = eval_expr(expr, env, ctx.functions, ctx.params)?;
            Ok(value.as_bool() == Some(true))
        }
        None => Ok(true),
    }
}

/// The rows a SELECT draws from, as evaluation environments plus the
/// column order a wildcard expands to.
struct Source {
    columns: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
}

fn env_of(qualifier: &str, columns: &[String], values: &[Value]) -> HashMap<String, Value> {
    let mut env = HashMap::new();
    for (name, value) in columns.iter().zip(values) {
        env.insert(name.clone(), value.clone());
        env.insert(format!("{qualifier}.{name}"), value.clone());
    }
    env
}

fn row_env(table: &Table, alias: Option<&str>, row: &Row) -> HashMap<String, Value> {
    let qualifier = alias.unwrap_or(&table.name);
    let mut env = HashMap::new();
    for column in &table.columns {
        let value = row
            .columns
            .get(&column.name)
            .cloned()
            .unwrap_or_else(|| Value::null(column.sql_type));
        env.insert(format!("{qualifier}.{}", column.name), value.clone());
        env.insert(column.name.clone(), value);
    }
    env
}

fn resolve_source(
    from: Option<&TableReference>,
    ctx: &mut ExecuteCtx,
) -> Result<Source, EngineError> {
    match from {
        None => Ok(Source {
            columns: Vec::new(),
            rows: vec![HashMap::new()],
        }),
        Some(TableReference::Table { name, alias }) => {
            if let Some(virtual_table) = ctx.virtual_tables.get(name) {
                let table = virtual_table.table.clone();
                let qualifier = alias.clone().unwrap_or_else(|| name.clone());
                let columns: Vec<String> =
                    table.columns.iter().map(|c| c.name.clone()).collect();
                let rows = virtual_table
                    .provider
                    .rows()
                    .into_iter()
                    .map(|values| env_of(&qualifier, &columns, &values))
                    .collect();
                return Ok(Source { columns, rows });
            }
            let table = ctx.storage.table(name, &ctx.snapshot)?;
            let snapshot = ctx.snapshot.clone();
            let stored = ctx.storage.scan_table(&table, &snapshot)?;
            let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
            let rows = stored
                .iter()
                .map(|row| row_env(&table, alias.as_deref(), row))
                .collect();
            Ok(Source { columns, rows })
        }
        Some(TableReference::Derived { query, alias }) => {
            let set = execute_select(query, ctx)?;
            let rows = set
                .rows
                .iter()
                .map(|values| env_of(alias, &set.columns, values))
                .collect();
            Ok(Source {
                columns: set.columns,
                rows,
            })
        }
        Some(TableReference::Values { rows, alias }) => {
            let empty = HashMap::new();
            let width = rows.first().map(Vec::len).unwrap_or(0);
            let columns: Vec<String> = (1..=width).map(|i| format!("COLUMN{i}")).collect();
            let mut envs = Vec::new();
            for row_exprs in rows {
                if row_exprs.len() != width {
                    return Err(EngineError::Syntax(
                        "VALUES rows must all have the same width".to_string(),
                    ));
                }
                let values = row_exprs
                    .iter()
                    .map(|expr| eval_expr(expr, &empty, ctx.functions, ctx.params))
                    .collect::<Result<Vec<_>, _>>()?;
                envs.push(env_of(alias, &columns, &values));
            }
            Ok(Source {
                columns,
                rows: envs,
            })
        }
    }
}

fn execute_select(
    stmt: &SelectStatement,
    ctx: &mut ExecuteCtx,
) -> Result<ResultSet, EngineError> {
    let source = resolve_source(stmt.from.as_ref(), ctx)?;

    let mut filtered = Vec::new();
    for env in source.rows {
        if matches_where(stmt.where_clause.as_ref(), &env, ctx)? {
            filtered.push(env);
        }
    }

    let (columns, mut rows) = if select_list_aggregates(&stmt.select_list) {
        project_aggregates(&stmt.select_list, &filtered, ctx)?
    } else {
        project_rows(&stmt.select_list, &filtered, &source.columns, ctx)?
    };

    let offset = stmt.offset.unwrap_or(0).max(0) as usize;
    if offset > 0 {
        rows.drain(..offset.min(rows.len()));
    }
    if let Some(fetch) = stmt.fetch {
        rows.truncate(fetch.max(0) as usize);
    }

    Ok(ResultSet { columns, rows })
}

fn is_aggregate_call(expr: &Expression) -> Option<(&str, &[Expression])> {
    if let Expression::Function { name, args } = expr {
        if AGGREGATES.contains(&name.as_str()) {
            return Some((name.as_str(), args));
        }
    }
    None
}

fn select_list_aggregates(items: &[SelectItem]) -> bool {
    items.iter().any(|item| match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
            is_aggregate_call(expr).is_some()
        }
        SelectItem::Wildcard => false,
    })
}

fn item_header(item: &SelectItem) -> Result<String, EngineError> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Ok(alias.clone()),
        SelectItem::UnnamedExpr(Expression::Column(name)) => Ok(name.clone()),
        SelectItem::UnnamedExpr(Expression::QualifiedColumn(_, name)) => Ok(name.clone()),
        SelectItem::UnnamedExpr(expr) => Ok(expr.to_string()),
        SelectItem::Wildcard => Err(EngineError::Syntax(
            "wildcard cannot be mixed with aggregates".to_string(),
        )),
    }
}

fn project_rows(
    items: &[SelectItem],
    envs: &[HashMap<String, Value>],
    source_columns: &[String],
    ctx: &ExecuteCtx,
) -> Result<(Vec<String>, Vec<Vec<Value>>), EngineError> {
    let mut columns = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => columns.extend(source_columns.iter().cloned()),
            other => columns.push(item_header(other)?),
        }
    }

    let mut rows = Vec::new();
    for env in envs {
        let mut out = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    for name in source_columns {
                        out.push(env.get(name).cloned().unwrap_or_else(|| {
                            Value::null(SqlType::Integer)
                        }));
                    }
                }
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    out.push(eval_expr(expr, env, ctx.functions, ctx.params)?);
                }
            }
        }
        rows.push(out);
    }
    Ok((columns, rows))
}

fn project_aggregates(
    items: &[SelectItem],
    envs: &[HashMap<String, Value>],
    ctx: &ExecuteCtx,
) -> Result<(Vec<String>, Vec<Vec<Value>>), EngineError> {
    let mut columns = Vec::new();
    let mut out = Vec::new();
    for item in items {
        columns.push(item_header(item)?);
        let expr = match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr,
            SelectItem::Wildcard => unreachable!("rejected by item_header"),
        };
        let Some((name, args)) = is_aggregate_call(expr) else {
            return Err(EngineError::Syntax(format!(
                "{expr} must appear in an aggregate function"
            )));
        };
        out.push(eval_aggregate(name, args, envs, ctx)?);
    }
    Ok((columns, vec![out]))
}

fn eval_aggregate(
    name: &str,
    args: &[Expression],
    envs: &[HashMap<String, Value>],
    ctx: &ExecuteCtx,
) -> Result<Value, EngineError> {
    // COUNT(*) parses with an empty argument list.
    if name == "COUNT" && args.is_empty() {
        return Ok(Value::integer(envs.len() as i64));
    }
    let arg = args.first().ok_or_else(|| {
        EngineError::Syntax(format!("{name} requires an argument"))
    })?;
    let mut values = Vec::new();
    for env in envs {
        let value = eval_expr(arg, env, ctx.functions, ctx.params)?;
        if !value.is_null() {
            values.push(value);
        }
    }
    match name {
        "COUNT" => Ok(Value::integer(values.len() as i64)),
        "SUM" | "AVG" => {
            if values.is_empty() {
                return Ok(Value::null(SqlType::DoublePrecision));
            }
            let mut sum = 0.0;
            for value in &values {
                sum += value.as_number().ok_or_else(|| {
                    EngineError::Syntax(format!("{name} over non-numeric values"))
                })?;
            }
            if name == "AVG" {
                Ok(Value::double(sum / values.len() as f64))
            } else {
                Ok(Value::double(sum))
            }
        }
        "MIN" | "MAX" => {
            let mut best: Option<Value> = None;
            for value in values {
                let replace = match &best {
                    None => true,
                    Some(current) => {
                        let ordering = compare(&value, current);
                        match name {
                            "MIN" => ordering == Some(Ordering::Less),
                            _ => ordering == Some(Ordering::Greater),
                        }
                    }
                };
                if replace {
                    best = Some(value);
                }
            }
            Ok(best.unwrap_or_else(|| Value::null(SqlType::DoublePrecision)))
        }
        other => Err(EngineError::UndefinedFunction(other.to_string())),
    }
}

fn retag(value: Value, declared: SqlType) -> Value {
    Value::new(declared, value.datum)
}

fn literal_value(lit: &LiteralValue) -> Result<Value, EngineError> {
    match lit {
        LiteralValue::Number(text) => {
            let n: f64 = text
                .parse()
                .map_err(|_| EngineError::Syntax(format!("bad numeric literal {text}")))?;
            if text.contains('.') {
                Ok(Value::double(n))
            } else {
                Ok(Value::integer(n as i64))
            }
        }
        LiteralValue::String(s) => Ok(Value::text(s.clone())),
        LiteralValue::Bool(b) => Ok(Value::boolean(*b)),
        LiteralValue::Null => Ok(Value::null(SqlType::Integer)),
    }
}

/// NULL-aware ordering: any NULL operand makes the comparison undecided.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (&left.datum, &right.datum) {
        (Datum::Null, _) | (_, Datum::Null) => None,
        (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
        _ => {
            let a = left.as_number()?;
            let b = right.as_number()?;
            a.partial_cmp(&b)
        }
    }
}

pub fn eval_expr(
    expr: &Expression,
    env: &HashMap<String, Value>,
    functions: &FunctionRegistry,
    params: &[Value],
) -> Result<Value, EngineError> {
    match expr {
        Expression::Literal(lit) => literal_value(lit),
        Expression::Column(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UndefinedColumn(name.clone())),
        Expression::QualifiedColumn(table, name) => {
            let key = format!("{table}.{name}");
            env.get(&key)
                .cloned()
                .ok_or(EngineError::UndefinedColumn(key))
        }
        Expression::Parameter(n) => n
            .checked_sub(1)
            .and_then(|i| params.get(i))
            .cloned()
            .ok_or_else(|| EngineError::Syntax(format!("parameter ${n} is not bound"))),
        Expression::Unary { op, expr } => {
            let value = eval_expr(expr, env, functions, params)?;
            if value.is_null() {
                return Ok(Value::null(value.sql_type));
            }
            match op {
                UnaryOperator::Not => match value.as_bool() {
                    Some(b) => Ok(Value::boolean(!b)),
                    None => Err(EngineError::Syntax(format!("NOT applied to {value}"))),
                },
                UnaryOperator::Minus => match value.as_number() {
                    Some(n) => Ok(Value::new(value.sql_type, Datum::Number(-n))),
                    None => Err(EngineError::Syntax(format!("- applied to {value}"))),
                },
            }
        }
        Expression::IsNull { expr, negated } => {
            let value = eval_expr(expr, env, functions, params)?;
            Ok(Value::boolean(value.is_null() != *negated))
        }
        Expression::Binary { left, op, right } => {
            let left = eval_expr(left, env, functions, params)?;
            let right = eval_expr(right, env, functions, params)?;
            eval_binary(*op, left, right)
        }
        Expression::Function { name, args } => {
            let mut values = Vec::new();
            for arg in args {
                values.push(eval_expr(arg, env, functions, params)?);
            }
            functions.call(name, &values)
        }
    }
}

fn eval_binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, EngineError> {
    use BinaryOperator::*;
    match op {
        And | Or => {
            let (a, b) = (left.as_bool(), right.as_bool());
            if left.is_null() || right.is_null() {
                return Ok(Value::null(SqlType::Boolean));
            }
            match (a, b) {
                (Some(a), Some(b)) => Ok(Value::boolean(if op == And { a && b } else { a || b })),
                _ => Err(EngineError::Syntax("boolean operand expected".to_string())),
            }
        }
        Plus | Minus | Multiply | Divide => {
            if left.is_null() || right.is_null() {
                return Ok(Value::null(left.sql_type));
            }
            let (a, b) = match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EngineError::Syntax(format!(
                        "cannot apply {op} to non-numeric operands"
                    )))
                }
            };
            let result = match op {
                Plus => a + b,
                Minus => a - b,
                Multiply => a * b,
                Divide => {
                    if b == 0.0 {
                        return Err(EngineError::DivisionByZero);
                    }
                    a / b
                }
                _ => unreachable!(),
            };
            Ok(Value::double(result))
        }
        Eq | NotEq | Lt | LtEq | Gt | GtEq => {
            let Some(ordering) = compare(&left, &right) else {
                return Ok(Value::null(SqlType::Boolean));
            };
            let truth = match op {
                Eq => ordering == Ordering::Equal,
                NotEq => ordering != Ordering::Equal,
                Lt => ordering == Ordering::Less,
                LtEq => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                GtEq => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::boolean(truth))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(sql_expr: &Expression) -> Result<Value, EngineError> {
        let functions = FunctionRegistry::with_builtins();
        eval_expr(sql_expr, &HashMap::new(), &functions, &[])
    }

    fn num(n: &str) -> Expression {
        Expression::Literal(LiteralValue::Number(n.to_string()))
    }

    fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let sum = binary(num("2"), BinaryOperator::Plus, num("3"));
        assert_eq!(eval(&sum).unwrap().as_number(), Some(5.0));

        let cmp = binary(num("2"), BinaryOperator::Lt, num("3"));
        assert_eq!(eval(&cmp).unwrap().as_bool(), Some(true));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let division = binary(num("1"), BinaryOperator::Divide, num("0"));
        let err = eval(&division).unwrap_err();
        assert_eq!(err.sqlstate(), "22012");
    }

    #[test]
    fn null_propagates_through_arithmetic_and_comparison() {
        let null = Expression::Literal(LiteralValue::Null);
        let sum = binary(null.clone(), BinaryOperator::Plus, num("1"));
        assert!(eval(&sum).unwrap().is_null());

        let cmp = binary(null, BinaryOperator::Eq, num("1"));
        assert!(eval(&cmp).unwrap().is_null());
    }

    #[test]
    fn is_null_predicate() {
        let check = Expression::IsNull {
            expr: Box::new(Expression::Literal(LiteralValue::Null)),
            negated: false,
        };
        assert_eq!(eval(&check).unwrap().as_bool(), Some(true));

        let negated = Expression::IsNull {
            expr: Box::new(num("1")),
            negated: true,
        };
        assert_eq!(eval(&negated).unwrap().as_bool(), Some(true));
    }

    #[test]
    fn unknown_column_is_reported() {
        let err = eval(&Expression::Column("GHOST".to_string())).unwrap_err();
        assert_eq!(err.sqlstate(), "42703");
    }

    #[test]
    fn parameters_bind_by_position() {
        let functions = FunctionRegistry::with_builtins();
        let expr = Expression::Parameter(1);
        let bound = eval_expr(&expr, &HashMap::new(), &functions, &[Value::integer(9)]).unwrap();
        assert_eq!(bound.as_number(), Some(9.0));

        let unbound = eval_expr(&expr, &HashMap::new(), &functions, &[]);
        assert!(matches!(unbound, Err(EngineError::Syntax(_))));
    }

    #[test]
    fn text_comparison_is_lexicographic() {
        let cmp = binary(
            Expression::Literal(LiteralValue::String("abc".to_string())),
            BinaryOperator::Lt,
            Expression::Literal(LiteralValue::String("abd".to_string())),
        );
        assert_eq!(eval(&cmp).unwrap().as_bool(), Some(true));
    }
}
