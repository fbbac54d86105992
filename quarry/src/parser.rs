//! The SQL parser: chumsky combinators producing the statement AST.
//! Identifiers are folded to uppercase on the way in; the rest of the
//! engine never sees mixed-case names.

use std::fmt;

use chumsky::prelude::*;

use crate::errors::EngineError;
use crate::types::SqlType;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Box<SelectStatement>),
    CreateTable(CreateTableStatement),
    DropTable(String),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    StartTransaction,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub select_list: Vec<SelectItem>,
    pub from: Option<TableReference>,
    pub where_clause: Option<Expression>,
    pub offset: Option<i64>,
    pub fetch: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    UnnamedExpr(Expression),
    ExprWithAlias { expr: Expression, alias: String },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableReference {
    Table {
        name: String,
        alias: Option<String>,
    },
    Derived {
        query: Box<SelectStatement>,
        alias: String,
    },
    Values {
        rows: Vec<Vec<Expression>>,
        alias: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: String,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub assignments: Vec<(String, Expression)>,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(LiteralValue),
    Column(String),
    QualifiedColumn(String, String),
    /// A `$n` placeholder bound at execution time.
    Parameter(usize),
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// A call through the function registry; `COUNT(*)` parses with an
    /// empty argument list.
    Function {
        name: String,
        args: Vec<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(String),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(lit) => write!(f, "{lit}"),
            Expression::Column(name) => write!(f, "{name}"),
            Expression::QualifiedColumn(table, column) => write!(f, "{table}.{column}"),
            Expression::Parameter(n) => write!(f, "${n}"),
            Expression::Binary { left, op, right } => write!(f, "({left} {op} {right})"),
            Expression::Unary { op, expr } => write!(f, "({op} {expr})"),
            Expression::IsNull { expr, negated } => {
                write!(f, "({expr} IS {}NULL)", if *negated { "NOT " } else { "" })
            }
            Expression::Function { name, args } => {
                write!(f, "{name}(")?;
                if args.is_empty() {
                    write!(f, "*")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Number(s) => write!(f, "{s}"),
            LiteralValue::String(s) => write!(f, "{s}"),
            LiteralValue::Bool(b) => write!(f, "{b}"),
            LiteralValue::Null => write!(f, "NULL"),
        }
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Not => write!(f, "NOT"),
            UnaryOperator::Minus => write!(f, "-"),
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        };
        write!(f, "{op}")
    }
}

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "CREATE", "DROP", "TABLE", "INSERT", "INTO", "VALUES", "UPDATE",
    "SET", "DELETE", "AS", "START", "TRANSACTION", "BEGIN", "WORK", "COMMIT", "ROLLBACK", "AND",
    "OR", "NOT", "NULL", "TRUE", "FALSE", "IS", "PRIMARY", "KEY", "OFFSET", "FETCH", "FIRST",
    "NEXT", "ROWS", "ROW", "ONLY", "LIMIT", "INT", "INTEGER", "SMALLINT", "BIGINT", "REAL",
    "DOUBLE", "PRECISION", "FLOAT", "CHAR", "CHARACTER", "VARCHAR", "BOOLEAN",
];

/// A case-insensitive keyword.
fn kw(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |s: String, span| {
            if s.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected keyword {word}")))
            }
        })
        .padded()
}

/// A folded identifier; keywords are rejected.
fn identifier() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    text::ident()
        .padded()
        .try_map(|s: String, span| {
            let folded = s.to_uppercase();
            if KEYWORDS.contains(&folded.as_str()) {
                Err(Simple::custom(
                    span,
                    format!("keyword `{s}` cannot be used as an identifier"),
                ))
            } else {
                Ok(folded)
            }
        })
}

fn integer() -> impl Parser<char, i64, Error = Simple<char>> + Clone {
    text::int(10)
        .padded()
        .try_map(|s: String, span| s.parse::<i64>().map_err(|e| Simple::custom(span, e.to_string())))
}

fn expression() -> impl Parser<char, Expression, Error = Simple<char>> + Clone {
    recursive(|expr| {
        let number = just('-')
            .or_not()
            .then(text::int(10).chain::<char, _, _>(just('.').chain(text::digits(10)).or_not().flatten()))
            .map(|(sign, digits)| {
                let mut s: String = digits.into_iter().collect();
                if sign.is_some() {
                    s.insert(0, '-');
                }
                LiteralValue::Number(s)
            });

        let string_literal = just('\'')
            .ignore_then(filter(|c| *c != '\'').repeated())
            .then_ignore(just('\''))
            .collect::<String>()
            .map(LiteralValue::String);

        let boolean = kw("TRUE")
            .to(LiteralValue::Bool(true))
            .or(kw("FALSE").to(LiteralValue::Bool(false)));

        let null = kw("NULL").to(LiteralValue::Null);

        let literal = choice((number, string_literal, boolean, null))
            .map(Expression::Literal)
            .padded();

        let parameter = just('$')
            .ignore_then(text::int(10))
            .padded()
            .try_map(|s: String, span| {
                s.parse::<usize>()
                    .map(Expression::Parameter)
                    .map_err(|e| Simple::custom(span, e.to_string()))
            });

        let function_call = identifier()
            .then(
                just('(')
                    .padded()
                    .ignore_then(
                        just('*').padded().to(Vec::<Expression>::new()).or(expr
                            .clone()
                            .separated_by(just(',').padded())
                            .collect::<Vec<_>>()),
                    )
                    .then_ignore(just(')').padded()),
            )
            .map(|(name, args)| Expression::Function { name, args });

        let qualified_column = identifier()
            .then_ignore(just('.'))
            .then(identifier())
            .map(|(table, column)| Expression::QualifiedColumn(table, column));

        let column = identifier().map(Expression::Column);

        let atom = choice((
            literal,
            parameter,
            function_call,
            qualified_column,
            column,
            expr.clone()
                .delimited_by(just('(').padded(), just(')').padded()),
        ));

        let unary = kw("NOT")
            .to(UnaryOperator::Not)
            .or(just('-').padded().to(UnaryOperator::Minus))
            .repeated()
            .then(atom)
            .foldr(|op, expr| Expression::Unary {
                op,
                expr: Box::new(expr),
            });

        let product = unary
            .clone()
            .then(
                choice((
                    just('*').to(BinaryOperator::Multiply),
                    just('/').to(BinaryOperator::Divide),
                ))
                .padded()
                .then(unary)
                .repeated(),
            )
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        let sum = product
            .clone()
            .then(
                choice((
                    just('+').to(BinaryOperator::Plus),
                    just('-').to(BinaryOperator::Minus),
                ))
                .padded()
                .then(product)
                .repeated(),
            )
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        let predicate = sum
            .clone()
            .then(
                kw("IS")
                    .ignore_then(kw("NOT").or_not())
                    .then_ignore(kw("NULL"))
                    .or_not(),
            )
            .map(|(expr, is_null)| match is_null {
                Some(negated) => Expression::IsNull {
                    expr: Box::new(expr),
                    negated: negated.is_some(),
                },
                None => expr,
            });

        let comparison_op = choice((
            just("<>").to(BinaryOperator::NotEq),
            just("!=").to(BinaryOperator::NotEq),
            just("<=").to(BinaryOperator::LtEq),
            just(">=").to(BinaryOperator::GtEq),
            just("<").to(BinaryOperator::Lt),
            just(">").to(BinaryOperator::Gt),
            just("=").to(BinaryOperator::Eq),
        ));

        let comparison = predicate
            .clone()
            .then(comparison_op.padded().then(predicate).repeated())
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        let conjunction = comparison
            .clone()
            .then(kw("AND").to(BinaryOperator::And).then(comparison).repeated())
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        conjunction
            .clone()
            .then(kw("OR").to(BinaryOperator::Or).then(conjunction).repeated())
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })
    })
}

fn sql_type() -> impl Parser<char, SqlType, Error = Simple<char>> + Clone {
    let width = integer()
        .delimited_by(just('(').padded(), just(')').padded());

    choice((
        kw("BOOLEAN").to(SqlType::Boolean),
        kw("SMALLINT").to(SqlType::SmallInt),
        kw("INTEGER").to(SqlType::Integer),
        kw("INT").to(SqlType::Integer),
        kw("BIGINT").to(SqlType::BigInt),
        kw("REAL").to(SqlType::Real),
        kw("DOUBLE")
            .then_ignore(kw("PRECISION").or_not())
            .to(SqlType::DoublePrecision),
        kw("FLOAT")
            .ignore_then(width.clone().or_not())
            .map(|n| SqlType::Float(n.unwrap_or(53) as u8)),
        kw("CHARACTER")
            .ignore_then(width.clone().or_not())
            .map(|n| SqlType::Character(n.unwrap_or(1) as u16)),
        kw("CHAR")
            .ignore_then(width.clone().or_not())
            .map(|n| SqlType::Character(n.unwrap_or(1) as u16)),
        kw("VARCHAR")
            .ignore_then(width.or_not())
            .map(|n| SqlType::Varchar(n.unwrap_or(0) as u16)),
    ))
}

enum TableElement {
    Column(ColumnDef, bool),
    PrimaryKey(String),
}

pub fn sql_parser(input: &str) -> Result<Vec<Statement>, EngineError> {
    parser().parse(input).map_err(|errors| {
        let rendered = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        EngineError::Syntax(rendered)
    })
}

fn parser() -> impl Parser<char, Vec<Statement>, Error = Simple<char>> {
    let expr = expression();

    let select = recursive(move |select| {
        let select_item = just('*')
            .padded()
            .to(SelectItem::Wildcard)
            .or(expr
                .clone()
                .then(kw("AS").ignore_then(identifier()).or_not())
                .map(|(expr, alias)| match alias {
                    Some(alias) => SelectItem::ExprWithAlias { expr, alias },
                    None => SelectItem::UnnamedExpr(expr),
                }));

        let values_rows = kw("VALUES").ignore_then(
            expr.clone()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded())
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>(),
        );

        let alias = kw("AS").ignore_then(identifier()).or(identifier());

        let derived = select
            .clone()
            .delimited_by(just('(').padded(), just(')').padded())
            .then(alias.clone())
            .map(|(query, alias)| TableReference::Derived {
                query: Box::new(query),
                alias,
            });

        let values_table = values_rows
            .clone()
            .delimited_by(just('(').padded(), just(')').padded())
            .then(alias.clone())
            .map(|(rows, alias)| TableReference::Values { rows, alias });

        let base_table = identifier()
            .then(alias.or_not())
            .map(|(name, alias)| TableReference::Table { name, alias });

        let table_reference = choice((values_table, derived, base_table));

        let offset_clause = kw("OFFSET")
            .ignore_then(integer())
            .then_ignore(kw("ROWS").or(kw("ROW")).or_not());

        let fetch_clause = kw("FETCH")
            .ignore_then(kw("FIRST").or(kw("NEXT")))
            .ignore_then(integer())
            .then_ignore(kw("ROWS").or(kw("ROW")))
            .then_ignore(kw("ONLY"))
            .or(kw("LIMIT").ignore_then(integer()));

        kw("SELECT")
            .ignore_then(
                select_item
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .then(kw("FROM").ignore_then(table_reference).or_not())
            .then(kw("WHERE").ignore_then(expr.clone()).or_not())
            .then(offset_clause.or_not())
            .then(fetch_clause.or_not())
            .map(
                |((((select_list, from), where_clause), offset), fetch)| SelectStatement {
                    select_list,
                    from,
                    where_clause,
                    offset,
                    fetch,
                },
            )
    });

    let column_def = identifier()
        .then(sql_type())
        .then(kw("NOT").ignore_then(kw("NULL")).or_not())
        .then(kw("PRIMARY").ignore_then(kw("KEY")).or_not())
        .map(|(((name, sql_type), not_null), primary)| {
            TableElement::Column(
                ColumnDef {
                    name,
                    sql_type,
                    not_null: not_null.is_some(),
                },
                primary.is_some(),
            )
        });

    let table_primary_key = kw("PRIMARY")
        .ignore_then(kw("KEY"))
        .ignore_then(identifier().delimited_by(just('(').padded(), just(')').padded()))
        .map(TableElement::PrimaryKey);

    let create_table = kw("CREATE")
        .ignore_then(kw("TABLE"))
        .ignore_then(identifier())
        .then(
            table_primary_key
                .or(column_def)
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, elements)| {
            let mut columns = Vec::new();
            let mut primary_key = None;
            for element in elements {
                match element {
                    TableElement::Column(column, is_primary) => {
                        if is_primary {
                            primary_key = Some(column.name.clone());
                        }
                        columns.push(column);
                    }
                    TableElement::PrimaryKey(name) => primary_key = Some(name),
                }
            }
            Statement::CreateTable(CreateTableStatement {
                table_name,
                columns,
                primary_key,
            })
        });

    let drop_table = kw("DROP")
        .ignore_then(kw("TABLE"))
        .ignore_then(identifier())
        .map(Statement::DropTable);

    let expr_row = expression()
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('(').padded(), just(')').padded());

    let insert = kw("INSERT")
        .ignore_then(kw("INTO"))
        .ignore_then(identifier())
        .then(
            identifier()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded())
                .or_not(),
        )
        .then_ignore(kw("VALUES"))
        .then(
            expr_row
                .clone()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|((table_name, columns), rows)| {
            Statement::Insert(InsertStatement {
                table_name,
                columns,
                rows,
            })
        });

    let assignment = identifier()
        .then_ignore(just('=').padded())
        .then(expression());

    let update = kw("UPDATE")
        .ignore_then(identifier())
        .then_ignore(kw("SET"))
        .then(
            assignment
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then(kw("WHERE").ignore_then(expression()).or_not())
        .map(|((table_name, assignments), where_clause)| {
            Statement::Update(UpdateStatement {
                table_name,
                assignments,
                where_clause,
            })
        });

    let delete = kw("DELETE")
        .ignore_then(kw("FROM"))
        .ignore_then(identifier())
        .then(kw("WHERE").ignore_then(expression()).or_not())
        .map(|(table_name, where_clause)| {
            Statement::Delete(DeleteStatement {
                table_name,
                where_clause,
            })
        });

    let start_transaction = kw("START")
        .ignore_then(kw("TRANSACTION"))
        .to(Statement::StartTransaction)
        .or(kw("BEGIN")
            .then_ignore(kw("WORK").or_not())
            .to(Statement::StartTransaction));

    let commit = kw("COMMIT")
        .then_ignore(kw("WORK").or_not())
        .to(Statement::Commit);

    let rollback = kw("ROLLBACK")
        .then_ignore(kw("WORK").or_not())
        .to(Statement::Rollback);

    let statement = choice((
        create_table,
        drop_table,
        insert,
        update,
        delete,
        start_transaction,
        commit,
        rollback,
        select.map(|s| Statement::Select(Box::new(s))),
    ));

    statement
        .padded()
        .separated_by(just(';').padded())
        .allow_trailing()
        .collect::<Vec<_>>()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(sql: &str) -> Statement {
        let mut statements = sql_parser(sql).unwrap();
        assert_eq!(statements.len(), 1);
        statements.pop().unwrap()
    }

    #[test]
    fn parses_create_table_with_constraints() {
        let stmt = parse_one(
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(64) NOT NULL, active BOOLEAN)",
        );
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(create.table_name, "USERS");
        assert_eq!(create.primary_key.as_deref(), Some("ID"));
        assert_eq!(create.columns.len(), 3);
        assert!(create.columns[1].not_null);
        assert_eq!(create.columns[1].sql_type, SqlType::Varchar(64));
    }

    #[test]
    fn parses_table_level_primary_key() {
        let stmt = parse_one("CREATE TABLE t (a INT, b INT, PRIMARY KEY (b))");
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(create.primary_key.as_deref(), Some("B"));
        assert_eq!(create.columns.len(), 2);
    }

    #[test]
    fn parses_multi_row_insert() {
        let stmt = parse_one("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')");
        let Statement::Insert(insert) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(insert.table_name, "T");
        assert_eq!(insert.columns.as_deref().unwrap(), ["A", "B"]);
        assert_eq!(insert.rows.len(), 2);
    }

    #[test]
    fn parses_select_with_offset_and_fetch() {
        let stmt =
            parse_one("SELECT a, b AS label FROM t WHERE a > 1 OFFSET 2 ROWS FETCH FIRST 3 ROWS ONLY");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert_eq!(select.select_list.len(), 2);
        assert_eq!(select.offset, Some(2));
        assert_eq!(select.fetch, Some(3));
        assert!(select.where_clause.is_some());
    }

    #[test]
    fn parses_limit_as_fetch_alias() {
        let stmt = parse_one("SELECT * FROM t LIMIT 5");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert_eq!(select.fetch, Some(5));
    }

    #[test]
    fn parses_derived_table() {
        let stmt = parse_one("SELECT x FROM (SELECT a AS x FROM t) AS sub");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert!(matches!(
            select.from,
            Some(TableReference::Derived { ref alias, .. }) if alias == "SUB"
        ));
    }

    #[test]
    fn parses_values_constructor() {
        let stmt = parse_one("SELECT * FROM (VALUES (1, 'a'), (2, 'b')) AS v");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        let Some(TableReference::Values { rows, alias }) = select.from else {
            panic!("expected VALUES table");
        };
        assert_eq!(alias, "V");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn parses_transaction_control() {
        assert_eq!(parse_one("START TRANSACTION"), Statement::StartTransaction);
        assert_eq!(parse_one("BEGIN"), Statement::StartTransaction);
        assert_eq!(parse_one("COMMIT"), Statement::Commit);
        assert_eq!(parse_one("ROLLBACK WORK"), Statement::Rollback);
    }

    #[test]
    fn parses_count_star_and_is_null() {
        let stmt = parse_one("SELECT COUNT(*) FROM t WHERE a IS NOT NULL");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert!(matches!(
            select.select_list[0],
            SelectItem::UnnamedExpr(Expression::Function { ref name, ref args }) if name == "COUNT" && args.is_empty()
        ));
        assert!(matches!(
            select.where_clause,
            Some(Expression::IsNull { negated: true, .. })
        ));
    }

    #[test]
    fn parses_parameters_and_negative_numbers() {
        let stmt = parse_one("SELECT * FROM t WHERE a = $1 AND b < -5");
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        let rendered = format!("{}", select.where_clause.unwrap());
        assert!(rendered.contains("$1"));
        assert!(rendered.contains("-5"));
    }

    #[test]
    fn parses_multiple_statements() {
        let statements =
            sql_parser("CREATE TABLE t (a INT); INSERT INTO t (a) VALUES (1); SELECT * FROM t;")
                .unwrap();
        assert_eq!(statements.len(), 3);
    }

    #[test]
    fn rejects_keyword_identifier() {
        assert!(matches!(
            sql_parser("SELECT * FROM select"),
            Err(EngineError::Syntax(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            sql_parser("FLY ME TO THE MOON"),
            Err(EngineError::Syntax(_))
        ));
    }
}
