//! The value model: declared SQL types, payloads, and result shapes.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use strata::TransactionId;

/// A declared column type. `Float`, `Character`, and `Varchar` carry their
/// declared width; widths are declarative only (no truncation on write).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Float(u8),
    Character(u16),
    Varchar(u16),
}

impl SqlType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::DoublePrecision
                | SqlType::Float(_)
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Real => write!(f, "REAL"),
            SqlType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            SqlType::Float(n) => write!(f, "FLOAT({n})"),
            SqlType::Character(n) => write!(f, "CHARACTER({n})"),
            SqlType::Varchar(n) => write!(f, "VARCHAR({n})"),
        }
    }
}

/// The payload of a value. Numbers are carried as 64-bit floats regardless
/// of the declared type; NULL is representable in any type.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

/// A tagged scalar: a declared type plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub sql_type: SqlType,
    pub datum: Datum,
}

impl Value {
    pub fn new(sql_type: SqlType, datum: Datum) -> Self {
        Self { sql_type, datum }
    }

    pub fn null(sql_type: SqlType) -> Self {
        Self::new(sql_type, Datum::Null)
    }

    pub fn integer(n: i64) -> Self {
        Self::new(SqlType::Integer, Datum::Number(n as f64))
    }

    pub fn double(n: f64) -> Self {
        Self::new(SqlType::DoublePrecision, Datum::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(SqlType::Varchar(0), Datum::Text(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(SqlType::Boolean, Datum::Bool(b))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.datum, Datum::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.datum {
            Datum::Number(n) => Some(n),
            Datum::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.datum {
            Datum::Bool(b) => Some(b),
            Datum::Number(n) => Some(n != 0.0),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.datum {
            Datum::Null => write!(f, "NULL"),
            Datum::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Datum::Text(s) => write!(f, "{s}"),
            Datum::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
        }
    }
}

/// A stored row: the column values plus the opaque identifier assigned at
/// insert and the transaction that wrote this version (needed to address it
/// for delete and update).
#[derive(Debug, Clone)]
pub struct Row {
    pub id: u64,
    pub tid: TransactionId,
    pub columns: HashMap<String, Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(&column.to_uppercase())
    }
}

#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug)]
pub enum ExecuteResult {
    Rows(ResultSet),
    Inserted(u32),
    Updated(u32),
    Deleted(u32),
    Ddl,
    Tx,
}

impl ExecuteResult {
    /// The rows of a query result; statement results yield an empty set.
    pub fn into_rows(self) -> ResultSet {
        match self {
            ExecuteResult::Rows(set) => set,
            _ => ResultSet {
                columns: Vec::new(),
                rows: Vec::new(),
            },
        }
    }
}
