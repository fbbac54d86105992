use quarry::Connection;

mod common;

use common::single_value;

#[test]
fn commit_without_transaction_is_invalid_termination() {
    let connection = Connection::open(":memory:").unwrap();
    let err = connection.query("COMMIT").unwrap_err();
    assert_eq!(err.sqlstate(), "2D000");

    let err = connection.query("ROLLBACK").unwrap_err();
    assert_eq!(err.sqlstate(), "2D000");
}

#[test]
fn nested_start_transaction_is_rejected() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("START TRANSACTION").unwrap();
    let err = connection.query("START TRANSACTION").unwrap_err();
    assert_eq!(err.sqlstate(), "25001");

    // The original transaction is still usable.
    connection.query("CREATE TABLE t (a INT)").unwrap();
    connection.query("COMMIT").unwrap();
    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "0");
}

#[test]
fn failed_transaction_only_accepts_rollback() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection.query("INSERT INTO t (a) VALUES (1)").unwrap();

    // A statement error aborts the transaction.
    let err = connection.query("SELECT * FROM missing").unwrap_err();
    assert_eq!(err.sqlstate(), "42P01");

    let err = connection.query("INSERT INTO t (a) VALUES (2)").unwrap_err();
    assert_eq!(err.sqlstate(), "25P02");

    let err = connection.query("SELECT * FROM t").unwrap_err();
    assert_eq!(err.sqlstate(), "25P02");

    let err = connection.query("COMMIT").unwrap_err();
    assert_eq!(err.sqlstate(), "25P02");

    connection.query("ROLLBACK").unwrap();

    // The aborted transaction's insert was undone.
    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "0");
}

#[test]
fn begin_is_start_transaction() {
    let connection = Connection::open(":memory:").unwrap();
    connection.query("CREATE TABLE t (a INT)").unwrap();

    connection.query("BEGIN").unwrap();
    connection.query("INSERT INTO t (a) VALUES (1)").unwrap();
    connection.query("COMMIT").unwrap();
    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "1");
}

#[test]
fn autocommit_failure_leaves_engine_quiescent() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (a INT, b INT NOT NULL)")
        .unwrap();

    let err = connection
        .query("INSERT INTO t (a) VALUES (1)")
        .unwrap_err();
    assert_eq!(err.sqlstate(), "23502");

    // No transaction is open and the failed insert left nothing behind.
    connection
        .query("INSERT INTO t (a, b) VALUES (1, 2)")
        .unwrap();
    assert_eq!(single_value(&connection, "SELECT COUNT(*) FROM t"), "1");
}

#[test]
fn committed_work_survives_across_transactions() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE ledger (id INT PRIMARY KEY, v INT)")
        .unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection
        .query("INSERT INTO ledger (id, v) VALUES (1, 10)")
        .unwrap();
    connection.query("COMMIT").unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection
        .query("UPDATE ledger SET v = 11 WHERE id = 1")
        .unwrap();
    connection.query("ROLLBACK").unwrap();

    assert_eq!(
        single_value(&connection, "SELECT v FROM ledger WHERE id = 1"),
        "10"
    );
}

#[test]
fn reinserting_a_key_deleted_in_the_same_transaction() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (id INT PRIMARY KEY, v INT)")
        .unwrap();

    connection.query("START TRANSACTION").unwrap();
    connection.query("INSERT INTO t (id, v) VALUES (1, 10)").unwrap();
    connection.query("DELETE FROM t WHERE id = 1").unwrap();
    connection.query("INSERT INTO t (id, v) VALUES (1, 20)").unwrap();
    connection.query("COMMIT").unwrap();

    assert_eq!(single_value(&connection, "SELECT v FROM t WHERE id = 1"), "20");
}

#[test]
fn serialization_failure_aborts_the_transaction() {
    let connection = Connection::open(":memory:").unwrap();
    connection
        .query("CREATE TABLE t (id INT PRIMARY KEY)")
        .unwrap();
    connection.query("INSERT INTO t (id) VALUES (1)").unwrap();

    connection.query("START TRANSACTION").unwrap();
    // Inserting over a committed live key is a write-write conflict.
    let err = connection.query("INSERT INTO t (id) VALUES (1)").unwrap_err();
    assert_eq!(err.sqlstate(), "40001");

    let err = connection.query("SELECT * FROM t").unwrap_err();
    assert_eq!(err.sqlstate(), "25P02");
    connection.query("ROLLBACK").unwrap();
}
