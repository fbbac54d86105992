//! The storage coordinator: maps tables onto the shared key space, applies
//! row operations through the B-tree, and carries the MVCC bookkeeping for
//! one connection.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use strata::btree::BTree;
use strata::lock::FileLock;
use strata::pager::Pager;
use strata::transaction::{self, SharedDb, Snapshot};
use strata::{PageId, PageObject, TransactionId, DEFAULT_PAGE_SIZE};

use crate::errors::EngineError;
use crate::row::{decode_row, encode_row};
use crate::schema::{catalog_bounds, catalog_key, row_key, table_bounds, Column, Table};
use crate::types::{Datum, Row, Value};

struct TableState {
    table: Table,
    /// Highest row identifier seen plus one; populated lazily on the first
    /// auto-assigned insert.
    next_row_id: Option<i64>,
}

/// One connection's view of the database: the tree, the per-path shared
/// state, and the table map (per-connection, refreshed when the catalog
/// may have moved under it).
pub struct Storage {
    btree: BTree,
    path: Option<PathBuf>,
    shared: Arc<SharedDb>,
    tables: HashMap<String, TableState>,
}

impl Storage {
    pub fn open(path: &str, page_size: Option<usize>) -> Result<Self, EngineError> {
        let (pager, path) = if path == ":memory:" {
            (
                Pager::open_memory(page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
                None,
            )
        } else {
            if page_size.is_some() {
                return Err(EngineError::NotSupported(
                    "a page size other than the default for file databases".to_string(),
                ));
            }
            (Pager::open_file(path)?, Some(PathBuf::from(path)))
        };
        let shared = transaction::shared_db(path.as_deref());
        let mut storage = Self {
            btree: BTree::new(pager),
            path,
            shared,
            tables: HashMap::new(),
        };
        let snapshot = storage.snapshot(0);
        storage.reload_tables(&snapshot)?;
        Ok(storage)
    }

    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Picks up header changes committed by other connections to the same
    /// file. Cached row-identifier counters are dropped along the way so
    /// auto-assignment rescans instead of colliding.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        if self.is_memory() {
            return Ok(());
        }
        self.btree.pager.refresh()?;
        for state in self.tables.values_mut() {
            state.next_row_id = None;
        }
        Ok(())
    }

    /// The statement-scope exclusive lock for writers. `:memory:` databases
    /// are private and skip locking entirely.
    pub fn lock_exclusive(&self) -> Result<Option<FileLock>, EngineError> {
        match &self.path {
            Some(path) => Ok(Some(FileLock::exclusive(path)?)),
            None => Ok(None),
        }
    }

    pub fn lock_shared(&self) -> Result<Option<FileLock>, EngineError> {
        match &self.path {
            Some(path) => Ok(Some(FileLock::shared(path)?)),
            None => Ok(None),
        }
    }

    pub fn shared(&self) -> &Arc<SharedDb> {
        &self.shared
    }

    /// The snapshot a statement runs under: the connection's own
    /// transaction, or the next unclaimed identifier for autocommit reads.
    pub fn snapshot(&self, own: TransactionId) -> Snapshot {
        let id = if own != 0 {
            own
        } else {
            self.btree.pager.peek_tid()
        };
        self.shared.tx.snapshot(id, own)
    }

    /// Claims a transaction identifier and marks it in flight.
    pub fn begin_transaction(&mut self) -> Result<TransactionId, EngineError> {
        let tid = self.btree.pager.claim_tid()?;
        self.shared.tx.begin(tid);
        Ok(tid)
    }

    pub fn commit_transaction(
        &mut self,
        tid: TransactionId,
        dirty: &HashSet<PageId>,
    ) -> Result<(), EngineError> {
        transaction::commit_dirty_pages(&mut self.btree, dirty, tid)?;
        self.shared.tx.finish(tid);
        let snapshot = self.snapshot(0);
        self.reload_tables(&snapshot)?;
        Ok(())
    }

    pub fn rollback_transaction(
        &mut self,
        tid: TransactionId,
        dirty: &HashSet<PageId>,
    ) -> Result<(), EngineError> {
        transaction::rollback_dirty_pages(&mut self.btree, dirty, tid)?;
        self.shared.tx.finish(tid);
        let snapshot = self.snapshot(0);
        self.reload_tables(&snapshot)?;
        Ok(())
    }

    /// Pages the B-tree touched since the last drain; the connection folds
    /// these into the dirty set of its open transaction.
    pub fn take_touched(&mut self) -> HashSet<PageId> {
        self.btree.take_touched()
    }

    /// Rebuilds the table map from the visible catalog records.
    fn reload_tables(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        let mut counters: HashMap<String, Option<i64>> = self
            .tables
            .drain()
            .map(|(name, state)| (name, state.next_row_id))
            .collect();
        let (start, end) = catalog_bounds();
        let mut visible = Vec::new();
        for obj in self.btree.range(start, Some(end)) {
            let obj = obj.map_err(EngineError::from)?;
            if snapshot.is_visible(&obj) {
                visible.push(obj);
            }
        }
        for obj in visible {
            let table = Table::decode(&obj.value)?;
            let next_row_id = counters.remove(&table.name).flatten();
            self.tables.insert(
                table.name.clone(),
                TableState {
                    table,
                    next_row_id,
                },
            );
        }
        Ok(())
    }

    /// Resolves a table by name, refreshing the map once in case another
    /// connection committed catalog changes.
    pub fn table(&mut self, name: &str, snapshot: &Snapshot) -> Result<Table, EngineError> {
        let folded = name.to_uppercase();
        if !self.tables.contains_key(&folded) {
            self.reload_tables(snapshot)?;
        }
        self.tables
            .get(&folded)
            .map(|state| state.table.clone())
            .ok_or_else(|| EngineError::UndefinedTable(folded))
    }

    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        primary_key: Option<String>,
        tid: TransactionId,
    ) -> Result<(), EngineError> {
        let folded = name.to_uppercase();
        let snapshot = self.snapshot(tid);
        if self.tables.contains_key(&folded) {
            return Err(EngineError::DuplicateTable(folded));
        }
        let key = catalog_key(&folded);
        let duplicate = self
            .btree
            .lookup(&key)?
            .iter()
            .any(|obj| snapshot.is_visible(obj));
        if duplicate {
            return Err(EngineError::DuplicateTable(folded));
        }

        if let Some(pk) = &primary_key {
            let pk = pk.to_uppercase();
            let column = columns
                .iter()
                .find(|c| c.name == pk)
                .ok_or_else(|| EngineError::UndefinedColumn(pk.clone()))?;
            if !column.sql_type.is_numeric() {
                return Err(EngineError::NotSupported(
                    "a non-integer primary key".to_string(),
                ));
            }
        }

        let table = Table {
            id: self.btree.pager.claim_table_id()?,
            name: folded.clone(),
            columns,
            primary_key: primary_key.map(|pk| pk.to_uppercase()),
        };
        crate::quarry_debug_log!(
            "[Storage::create_table] Creating table '{}' with id {} in tid {tid}",
            table.name,
            table.id
        );
        self.btree
            .add(PageObject::new(key, table.encode()?, tid, 0))?;
        self.tables.insert(
            folded,
            TableState {
                table,
                next_row_id: Some(1),
            },
        );
        Ok(())
    }

    /// Expires the catalog record. Row data is intentionally left behind
    /// (orphaned until the file is rebuilt).
    pub fn drop_table(&mut self, name: &str, tid: TransactionId) -> Result<(), EngineError> {
        let snapshot = self.snapshot(tid);
        let table = self.table(name, &snapshot)?;
        let key = catalog_key(&table.name);
        let record = self
            .btree
            .lookup(&key)?
            .into_iter()
            .find(|obj| snapshot.is_visible(obj))
            .ok_or_else(|| EngineError::UndefinedTable(table.name.clone()))?;
        self.btree.expire(&key, record.tid, tid)?;
        self.tables.remove(&table.name);
        Ok(())
    }

    /// The next auto-assigned row identifier for a table, seeded from the
    /// highest identifier present in any stored version.
    fn next_auto_id(&mut self, table: &Table) -> Result<i64, EngineError> {
        let state = self
            .tables
            .get(&table.name)
            .and_then(|s| s.next_row_id);
        let next = match state {
            Some(next) => next,
            None => {
                let (start, end) = table_bounds(table.id);
                let mut max_id = 0;
                for obj in self.btree.range(start, Some(end)) {
                    let obj = obj.map_err(EngineError::from)?;
                    max_id = max_id.max(crate::schema::row_id_of(&obj.key));
                }
                max_id + 1
            }
        };
        if let Some(s) = self.tables.get_mut(&table.name) {
            s.next_row_id = Some(next);
        }
        Ok(next)
    }

    fn bump_auto_id(&mut self, table: &Table, used: i64) {
        if let Some(state) = self.tables.get_mut(&table.name) {
            let next = state.next_row_id.unwrap_or(1);
            state.next_row_id = Some(next.max(used + 1));
        }
    }

    /// Evaluates the primary key, enforces NOT NULL, and inserts the row.
    /// Returns the assigned row identifier.
    pub fn write_row(
        &mut self,
        table: &Table,
        mut columns: HashMap<String, Value>,
        tid: TransactionId,
    ) -> Result<i64, EngineError> {
        let row_id = match &table.primary_key {
            Some(pk) => match columns.get(pk).map(|v| v.datum.clone()) {
                Some(Datum::Number(n)) => n as i64,
                _ => {
                    let id = self.next_auto_id(table)?;
                    columns.insert(pk.clone(), Value::integer(id));
                    id
                }
            },
            None => self.next_auto_id(table)?,
        };

        for column in &table.columns {
            let missing = columns
                .get(&column.name)
                .map(Value::is_null)
                .unwrap_or(true);
            if missing && !column.nullable {
                return Err(EngineError::NotNullViolation(column.name.clone()));
            }
        }

        let key = row_key(table.id, row_id);
        let value = encode_row(table, &columns);
        self.btree.add(PageObject::new(key, value, tid, 0))?;
        self.bump_auto_id(table, row_id);
        Ok(row_id)
    }

    /// Marks the stored version of `row` as expired by `tid`.
    pub fn delete_row(
        &mut self,
        table: &Table,
        row: &Row,
        tid: TransactionId,
    ) -> Result<(), EngineError> {
        let key = row_key(table.id, row.id as i64);
        self.btree.expire(&key, row.tid, tid)?;
        Ok(())
    }

    /// Replaces `old` with the new column set. A changed primary key moves
    /// the row: the old key is expired and the new one inserted, both under
    /// the two-version rule.
    pub fn update_row(
        &mut self,
        table: &Table,
        old: &Row,
        columns: HashMap<String, Value>,
        tid: TransactionId,
    ) -> Result<(), EngineError> {
        let old_id = old.id as i64;
        let new_id = match &table.primary_key {
            Some(pk) => match columns.get(pk).map(|v| v.datum.clone()) {
                Some(Datum::Number(n)) => n as i64,
                _ => old_id,
            },
            None => old_id,
        };

        for column in &table.columns {
            let missing = columns
                .get(&column.name)
                .map(Value::is_null)
                .unwrap_or(true);
            if missing && !column.nullable {
                return Err(EngineError::NotNullViolation(column.name.clone()));
            }
        }

        if new_id != old_id {
            self.delete_row(table, old, tid)?;
            let key = row_key(table.id, new_id);
            let value = encode_row(table, &columns);
            self.btree.add(PageObject::new(key, value, tid, 0))?;
            self.bump_auto_id(table, new_id);
            return Ok(());
        }

        let key = row_key(table.id, old_id);
        let old_obj = PageObject::new(key.clone(), Vec::new(), old.tid, 0);
        let new_obj = PageObject::new(key, encode_row(table, &columns), tid, 0);
        self.btree.update(&old_obj, new_obj, tid)?;
        Ok(())
    }

    /// Materializes the rows of a table visible under `snapshot`, in row
    /// identifier order.
    pub fn scan_table(
        &mut self,
        table: &Table,
        snapshot: &Snapshot,
    ) -> Result<Vec<Row>, EngineError> {
        let (start, end) = table_bounds(table.id);
        let mut objects = Vec::new();
        for obj in self.btree.range(start, Some(end)) {
            let obj = obj.map_err(EngineError::from)?;
            if snapshot.is_visible(&obj) {
                objects.push(obj);
            }
        }
        objects
            .iter()
            .map(|obj| decode_row(table, obj))
            .collect()
    }
}
