//! # Quarry
//! An embeddable SQL database engine over the strata storage crate: a
//! single-file (or in-memory) database served through an in-process
//! connection API.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use strata::{PageId, TransactionId};

pub mod errors;
pub mod executor;
pub mod functions;
pub mod parser;
pub mod row;
pub mod schema;
pub mod storage;
pub mod types;

pub use errors::EngineError;
pub use functions::{FunctionPrototype, ScalarFunction, VirtualTableProvider};
pub use types::{Datum, ExecuteResult, ResultSet, SqlType, Value};

use functions::{FunctionRegistry, VirtualTable};
use parser::Statement;
use storage::Storage;

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("QUARRY_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! quarry_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}

/// A process-wide cache of parsed statements, shareable between
/// connections through [`OpenOptions`]. Entries are immutable once
/// published.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, Arc<Vec<Statement>>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_parse(&self, sql: &str) -> Result<Arc<Vec<Statement>>, EngineError> {
        if let Some(found) = self.entries.lock().get(sql) {
            return Ok(found.clone());
        }
        let parsed = Arc::new(parser::sql_parser(sql)?);
        self.entries
            .lock()
            .entry(sql.to_string())
            .or_insert(parsed.clone());
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[derive(Default)]
pub struct OpenOptions {
    /// Page size for `:memory:` databases; files always use the default.
    pub page_size: Option<usize>,
    /// A query cache to share between connections.
    pub cache: Option<Arc<QueryCache>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    NotActive,
    Active { tid: TransactionId },
    Aborted { tid: TransactionId },
}

struct Session {
    storage: Storage,
    state: TxState,
    dirty: HashSet<PageId>,
    functions: FunctionRegistry,
    virtual_tables: HashMap<String, VirtualTable>,
    cache: Arc<QueryCache>,
}

/// An open database handle. The connection is internally synchronized, so
/// it can be shared behind an `Arc` and used from several threads;
/// statements on one connection execute serially.
pub struct Connection {
    session: Mutex<Session>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens (creating if necessary) the database at `path`;
    /// `":memory:"` selects a private in-memory database.
    pub fn open(path: &str) -> Result<Self, EngineError> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with(path: &str, options: OpenOptions) -> Result<Self, EngineError> {
        let storage = Storage::open(path, options.page_size)?;
        Ok(Self {
            session: Mutex::new(Session {
                storage,
                state: TxState::NotActive,
                dirty: HashSet::new(),
                functions: FunctionRegistry::with_builtins(),
                virtual_tables: HashMap::new(),
                cache: options.cache.unwrap_or_default(),
            }),
        })
    }

    /// Parses (through the query cache) and executes `sql`; with several
    /// statements in one text, the last result is returned.
    pub fn query(&self, sql: &str) -> Result<ExecuteResult, EngineError> {
        self.run(sql, &[])
    }

    /// Parses `sql` once for repeated execution with `$n` placeholders.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>, EngineError> {
        let statements = self.session.lock().cache.get_or_parse(sql)?;
        Ok(PreparedStatement {
            connection: self,
            statements,
        })
    }

    /// Registers a scalar function; it becomes callable from any
    /// expression on this connection.
    pub fn register_function(&self, prototype: FunctionPrototype, function: ScalarFunction) {
        self.session.lock().functions.register(prototype, function);
    }

    /// Registers a virtual table: the schema is declared by an ordinary
    /// CREATE TABLE text and the provider materializes rows on every scan.
    pub fn register_virtual_table(
        &self,
        create_sql: &str,
        provider: Arc<dyn VirtualTableProvider>,
    ) -> Result<(), EngineError> {
        let statements = parser::sql_parser(create_sql)?;
        let Some(Statement::CreateTable(create)) = statements.into_iter().next() else {
            return Err(EngineError::Syntax(
                "expected a CREATE TABLE statement".to_string(),
            ));
        };
        let table = schema::Table {
            id: 0,
            name: create.table_name.clone(),
            columns: create
                .columns
                .iter()
                .map(|def| schema::Column {
                    name: def.name.clone(),
                    sql_type: def.sql_type,
                    nullable: !def.not_null,
                })
                .collect(),
            primary_key: create.primary_key,
        };
        self.session
            .lock()
            .virtual_tables
            .insert(create.table_name, VirtualTable { table, provider });
        Ok(())
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, EngineError> {
        let mut session = self.session.lock();
        let statements = session.cache.get_or_parse(sql)?;
        let mut last = ExecuteResult::Tx;
        for statement in statements.iter() {
            last = session.execute_statement(statement, params)?;
        }
        Ok(last)
    }
}

/// A parsed statement bound to its connection.
pub struct PreparedStatement<'a> {
    connection: &'a Connection,
    statements: Arc<Vec<Statement>>,
}

impl PreparedStatement<'_> {
    pub fn query(&self, params: &[Value]) -> Result<ExecuteResult, EngineError> {
        let mut session = self.connection.session.lock();
        let mut last = ExecuteResult::Tx;
        for statement in self.statements.iter() {
            last = session.execute_statement(statement, params)?;
        }
        Ok(last)
    }
}

impl Session {
    /// The transaction state machine around one statement.
    fn execute_statement(
        &mut self,
        statement: &Statement,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError> {
        match statement {
            Statement::StartTransaction => match self.state {
                TxState::NotActive => {
                    let tid = self.begin_with_exclusion()?;
                    self.state = TxState::Active { tid };
                    crate::quarry_debug_log!("[Session] START TRANSACTION -> tid {tid}");
                    Ok(ExecuteResult::Tx)
                }
                TxState::Active { .. } => Err(EngineError::ActiveSqlTransaction),
                TxState::Aborted { .. } => Err(EngineError::InFailedSqlTransaction),
            },
            Statement::Commit => match self.state {
                TxState::NotActive => Err(EngineError::InvalidTransactionTermination),
                TxState::Active { tid } => {
                    self.finish_with_exclusion(tid, true)?;
                    self.state = TxState::NotActive;
                    Ok(ExecuteResult::Tx)
                }
                TxState::Aborted { .. } => Err(EngineError::InFailedSqlTransaction),
            },
            Statement::Rollback => match self.state {
                TxState::NotActive => Err(EngineError::InvalidTransactionTermination),
                TxState::Active { tid } | TxState::Aborted { tid } => {
                    self.finish_with_exclusion(tid, false)?;
                    self.state = TxState::NotActive;
                    Ok(ExecuteResult::Tx)
                }
            },
            other => match self.state {
                TxState::Aborted { .. } => Err(EngineError::InFailedSqlTransaction),
                TxState::Active { tid } => {
                    let result = self.run_statement(other, tid, params);
                    self.dirty.extend(self.storage.take_touched());
                    if result.is_err() {
                        // The statement's error stands; the transaction only
                        // accepts ROLLBACK from here.
                        self.state = TxState::Aborted { tid };
                    }
                    result
                }
                TxState::NotActive => self.run_autocommit(other, params),
            },
        }
    }

    /// Claims a transaction identifier under the writer exclusion.
    fn begin_with_exclusion(&mut self) -> Result<TransactionId, EngineError> {
        let shared = self.storage.shared().clone();
        let _writer = shared.writer.lock();
        let _lock = self.storage.lock_exclusive()?;
        self.storage.refresh()?;
        self.storage.begin_transaction()
    }

    /// Applies commit or rollback work for an explicit transaction and
    /// clears the dirty set.
    fn finish_with_exclusion(
        &mut self,
        tid: TransactionId,
        commit: bool,
    ) -> Result<(), EngineError> {
        let shared = self.storage.shared().clone();
        let _writer = shared.writer.lock();
        let _lock = self.storage.lock_exclusive()?;
        self.storage.refresh()?;
        let dirty = std::mem::take(&mut self.dirty);
        let result = if commit {
            self.storage.commit_transaction(tid, &dirty)
        } else {
            self.storage.rollback_transaction(tid, &dirty)
        };
        self.storage.take_touched();
        result
    }

    /// A statement outside any explicit transaction: reads run under a
    /// shared lock against a fresh snapshot; writes run in an implicit
    /// transaction that commits on success and rolls back on error,
    /// clearing its dirty set either way.
    fn run_autocommit(
        &mut self,
        statement: &Statement,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError> {
        if matches!(statement, Statement::Select(_)) {
            let _lock = self.storage.lock_shared()?;
            return self.run_statement(statement, 0, params);
        }

        let shared = self.storage.shared().clone();
        let _writer = shared.writer.lock();
        let _lock = self.storage.lock_exclusive()?;
        self.storage.refresh()?;
        let tid = self.storage.begin_transaction()?;
        let result = self.run_statement(statement, tid, params);
        let dirty = self.storage.take_touched();
        match result {
            Ok(value) => {
                self.storage.commit_transaction(tid, &dirty)?;
                Ok(value)
            }
            Err(error) => {
                self.storage.rollback_transaction(tid, &dirty)?;
                Err(error)
            }
        }
    }

    fn run_statement(
        &mut self,
        statement: &Statement,
        tid: TransactionId,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError> {
        let in_explicit_tx = matches!(self.state, TxState::Active { .. });
        let write_statement = !matches!(statement, Statement::Select(_));
        let shared = self.storage.shared().clone();
        // Write statements inside an explicit transaction take the writer
        // exclusion per statement; autocommit writes already hold it.
        let _writer = (in_explicit_tx && write_statement).then(|| shared.writer.lock());
        let _lock = if in_explicit_tx {
            if write_statement {
                self.storage.lock_exclusive()?
            } else {
                self.storage.lock_shared()?
            }
        } else {
            None
        };
        self.storage.refresh()?;
        let snapshot = self.storage.snapshot(tid);
        let mut ctx = executor::ExecuteCtx {
            storage: &mut self.storage,
            functions: &self.functions,
            virtual_tables: &self.virtual_tables,
            tid,
            snapshot,
            params,
        };
        executor::execute(statement, &mut ctx)
    }
}
