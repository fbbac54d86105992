#![allow(dead_code)]

use quarry::{Connection, ExecuteResult, Value};
use tempfile::TempDir;

/// A database file in its own temp directory; the directory is removed
/// when the handle drops.
pub struct TestDb {
    pub path: String,
    _dir: TempDir,
}

pub fn temp_db(name: &str) -> TestDb {
    let dir = TempDir::new().unwrap();
    let path = dir
        .path()
        .join(format!("{name}.db"))
        .to_string_lossy()
        .into_owned();
    TestDb { path, _dir: dir }
}

pub fn connect(db: &TestDb) -> Connection {
    Connection::open(&db.path).unwrap()
}

/// Runs a query and renders every cell to text, the way the scenarios
/// compare results.
pub fn query_strings(connection: &Connection, sql: &str) -> Vec<Vec<String>> {
    match connection.query(sql).unwrap() {
        ExecuteResult::Rows(set) => set
            .rows
            .iter()
            .map(|row| row.iter().map(Value::to_string).collect())
            .collect(),
        other => panic!("expected rows, got {other:?}"),
    }
}

pub fn single_value(connection: &Connection, sql: &str) -> String {
    let rows = query_strings(connection, sql);
    assert_eq!(rows.len(), 1, "expected a single row");
    assert_eq!(rows[0].len(), 1, "expected a single column");
    rows[0][0].clone()
}
