use quarry::Connection;

mod common;

use common::{query_strings, single_value};

#[test]
fn create_insert_select_round_trip() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();
    connection.query("INSERT INTO t (a) VALUES (1)").unwrap();

    let rows = query_strings(&connection, "SELECT * FROM t");
    assert_eq!(rows, vec![vec!["1".to_string()]]);
}

#[test]
fn rollback_discards_inserted_row() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();
    connection.query("INSERT INTO t (a) VALUES (1)").unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection.query("INSERT INTO t (a) VALUES (2)").unwrap();
    connection.query("ROLLBACK").unwrap();

    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "1");
}

#[test]
fn rollback_of_delete_restores_committed_row() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection.query("INSERT INTO t (a) VALUES (3)").unwrap();
    connection.query("COMMIT").unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection.query("DELETE FROM t WHERE a = 3").unwrap();
    connection.query("ROLLBACK").unwrap();

    let rows = query_strings(&connection, "SELECT * FROM t WHERE a = 3");
    assert_eq!(rows, vec![vec!["3".to_string()]]);
}

#[test]
fn update_changes_matching_rows_only() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE accounts (id INT PRIMARY KEY, balance INT)")
        .unwrap();
    connection
        .query("INSERT INTO accounts (id, balance) VALUES (1, 100), (2, 200)")
        .unwrap();

    connection
        .query("UPDATE accounts SET balance = balance + 50 WHERE id = 1")
        .unwrap();

    assert_eq!(
        single_value(&connection, "SELECT balance FROM accounts WHERE id = 1"),
        "150"
    );
    assert_eq!(
        single_value(&connection, "SELECT balance FROM accounts WHERE id = 2"),
        "200"
    );
}

#[test]
fn delete_with_predicate() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();
    connection
        .query("INSERT INTO t (a) VALUES (1), (2), (3), (4)")
        .unwrap();

    connection.query("DELETE FROM t WHERE a > 2").unwrap();
    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "2");
}

#[test]
fn drop_table_then_select_is_undefined() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE gone (a INT)").unwrap();
    connection.query("DROP TABLE gone").unwrap();

    let err = connection.query("SELECT * FROM gone").unwrap_err();
    assert_eq!(err.sqlstate(), "42P01");
}

#[test]
fn duplicate_table_reports_42p07() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();
    let err = connection.query("CREATE TABLE t (b INT)").unwrap_err();
    assert_eq!(err.sqlstate(), "42P07");
}

#[test]
fn not_null_violation_reports_23502() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (a INT, b VARCHAR(8) NOT NULL)")
        .unwrap();
    let err = connection
        .query("INSERT INTO t (a) VALUES (1)")
        .unwrap_err();
    assert_eq!(err.sqlstate(), "23502");
}

#[test]
fn division_by_zero_reports_22012() {
    let connection = Connection::open(":memory:").unwrap();
    let err = connection.query("SELECT 1 / 0").unwrap_err();
    assert_eq!(err.sqlstate(), "22012");
}

#[test]
fn undefined_function_reports_42883() {
    let connection = Connection::open(":memory:").unwrap();
    let err = connection.query("SELECT MYSTERY(1)").unwrap_err();
    assert_eq!(err.sqlstate(), "42883");
}

#[test]
fn offset_and_fetch_paginate() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (a INT PRIMARY KEY)")
        .unwrap();
    connection
        .query("INSERT INTO t (a) VALUES (1), (2), (3), (4), (5)")
        .unwrap();

    let rows = query_strings(
        &connection,
        "SELECT a FROM t OFFSET 1 ROWS FETCH FIRST 2 ROWS ONLY",
    );
    assert_eq!(
        rows,
        vec![vec!["2".to_string()], vec!["3".to_string()]]
    );
}

#[test]
fn derived_tables_and_values_constructors() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (a INT PRIMARY KEY)")
        .unwrap();
    connection
        .query("INSERT INTO t (a) VALUES (10), (20), (30)")
        .unwrap();

    let rows = query_strings(
        &connection,
        "SELECT doubled FROM (SELECT a * 2 AS doubled FROM t WHERE a > 10) AS sub",
    );
    assert_eq!(rows, vec![vec!["40".to_string()], vec!["60".to_string()]]);

    let rows = query_strings(
        &connection,
        "SELECT column2 FROM (VALUES (1, 'one'), (2, 'two')) AS v WHERE column1 = 2",
    );
    assert_eq!(rows, vec![vec!["two".to_string()]]);
}

#[test]
fn aggregates_over_a_table() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE m (v INT, w INT)")
        .unwrap();
    connection
        .query("INSERT INTO m (v, w) VALUES (1, 10), (2, NULL), (3, 30)")
        .unwrap();

    let row = query_strings(
        &connection,
        "SELECT COUNT(*), COUNT(w), SUM(v), MIN(v), MAX(v), AVG(v) FROM m",
    );
    assert_eq!(
        row,
        vec![vec![
            "3".to_string(),
            "2".to_string(),
            "6".to_string(),
            "1".to_string(),
            "3".to_string(),
            "2".to_string(),
        ]]
    );
}

#[test]
fn nulls_and_is_null_predicates() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT, b INT)").unwrap();
    connection
        .query("INSERT INTO t (a, b) VALUES (1, NULL), (2, 20)")
        .unwrap();

    assert_eq!(
        single_value(&connection, "SELECT a FROM t WHERE b IS NULL"),
        "1"
    );
    assert_eq!(
        single_value(&connection, "SELECT a FROM t WHERE b IS NOT NULL"),
        "2"
    );
    // NULL comparisons are undecided, so the row with b = NULL never matches.
    let rows = query_strings(&connection, "SELECT a FROM t WHERE b = 20");
    assert_eq!(rows.len(), 1);
}

#[test]
fn multi_statement_text_returns_last_result() {
    let connection = Connection::open(":memory:").unwrap();
    let result = connection
        .query("CREATE TABLE t (a INT); INSERT INTO t (a) VALUES (7); SELECT a FROM t;")
        .unwrap()
        .into_rows();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].to_string(), "7");
}

#[test]
fn table_names_fold_case() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE CaseTest (a INT)").unwrap();
    connection
        .query("INSERT INTO casetest (a) VALUES (5)")
        .unwrap();
    assert_eq!(single_value(&connection, "SELECT a FROM CASETEST"), "5");
}
