//! The interactive shell: a small REPL over the embedded connection API.

use quarry::{Connection, EngineError, ExecuteResult};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

fn print_result(result: ExecuteResult) {
    match result {
        ExecuteResult::Rows(set) => {
            println!("{}", set.columns.join(" | "));
            let count = set.rows.len();
            for row in set.rows {
                let rendered: Vec<String> = row.iter().map(ToString::to_string).collect();
                println!("{}", rendered.join(" | "));
            }
            println!("({count} row{})", if count == 1 { "" } else { "s" });
        }
        ExecuteResult::Inserted(n) => println!("INSERT {n}"),
        ExecuteResult::Updated(n) => println!("UPDATE {n}"),
        ExecuteResult::Deleted(n) => println!("DELETE {n}"),
        ExecuteResult::Ddl => println!("OK"),
        ExecuteResult::Tx => println!("OK"),
    }
}

fn main() -> Result<(), EngineError> {
    let path = std::env::args().nth(1).unwrap_or_else(|| ":memory:".to_string());
    let connection = Connection::open(&path)?;
    println!("connected to {path}");

    let mut editor = DefaultEditor::new().map_err(|e| EngineError::Syntax(e.to_string()))?;
    loop {
        match editor.readline("quarry> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }
                let _ = editor.add_history_entry(line);
                match connection.query(line) {
                    Ok(result) => print_result(result),
                    Err(error) => eprintln!("ERROR [{}]: {error}", error.sqlstate()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("input error: {error}");
                break;
            }
        }
    }
    Ok(())
}
