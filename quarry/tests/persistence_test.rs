use quarry::{Connection, Value};

mod common;

use common::{connect, single_value, temp_db};

#[test]
fn data_survives_reopen() {
    let db = temp_db("persist_basic");
    {
        let connection = connect(&db);
        connection
            .query("CREATE TABLE notes (id INT PRIMARY KEY, body VARCHAR(64))")
            .unwrap();
        connection
            .query("INSERT INTO notes (id, body) VALUES (1, 'first'), (2, 'second')")
            .unwrap();
    }

    let reopened = connect(&db);
    assert_eq!(single_value(&reopened, "SELECT COUNT(*) FROM notes"), "2");
    assert_eq!(
        single_value(&reopened, "SELECT body FROM notes WHERE id = 2"),
        "second"
    );
}

#[test]
fn counters_persist_across_reopen() {
    let db = temp_db("persist_counters");
    {
        let connection = connect(&db);
        connection
            .query("CREATE TABLE auto_t (id INT PRIMARY KEY, v INT)")
            .unwrap();
        connection.query("INSERT INTO auto_t (v) VALUES (1)").unwrap();
        connection.query("INSERT INTO auto_t (v) VALUES (2)").unwrap();
    }

    // Auto-assigned identifiers continue past the stored rows instead of
    // colliding with them.
    let reopened = connect(&db);
    reopened.query("INSERT INTO auto_t (v) VALUES (3)").unwrap();
    assert_eq!(single_value(&reopened, "SELECT COUNT(*) FROM auto_t"), "3");
    assert_eq!(
        single_value(&reopened, "SELECT MAX(id) FROM auto_t"),
        "3"
    );
}

#[test]
fn many_rows_survive_reopen_in_order() {
    let db = temp_db("persist_many");
    {
        let connection = connect(&db);
        connection
            .query("CREATE TABLE wide (id INT PRIMARY KEY, payload VARCHAR(64))")
            .unwrap();
        let insert = connection
            .prepare("INSERT INTO wide (id, payload) VALUES ($1, $2)")
            .unwrap();
        for i in 0..500i64 {
            insert
                .query(&[Value::integer(i), Value::text(format!("payload-{i:03}"))])
                .unwrap();
        }
    }

    let reopened = connect(&db);
    assert_eq!(single_value(&reopened, "SELECT COUNT(*) FROM wide"), "500");
    assert_eq!(
        single_value(&reopened, "SELECT payload FROM wide WHERE id = 123"),
        "payload-123"
    );
}

#[test]
fn foreign_files_are_rejected() {
    let db = temp_db("persist_foreign");
    std::fs::write(&db.path, b"this is certainly not a database file....").unwrap();
    let err = Connection::open(&db.path).unwrap_err();
    assert_eq!(err.sqlstate(), "58030");
}

#[test]
fn dropped_table_stays_dropped_after_reopen() {
    let db = temp_db("persist_drop");
    {
        let connection = connect(&db);
        connection.query("CREATE TABLE ephemeral (a INT)").unwrap();
        connection.query("DROP TABLE ephemeral").unwrap();
    }

    let reopened = connect(&db);
    let err = reopened.query("SELECT * FROM ephemeral").unwrap_err();
    assert_eq!(err.sqlstate(), "42P01");
}
