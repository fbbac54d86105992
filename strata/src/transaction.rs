//! Transaction bookkeeping shared by every connection to one database:
//! the active-transaction table (for snapshot visibility), the in-process
//! writer mutex, and the physical cleanup applied to dirty pages on commit
//! and rollback.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::btree::BTree;
use crate::error::StorageError;
use crate::page::PageObject;
use crate::{PageId, TransactionId};

/// The view a reader evaluates visibility under: every transaction up to
/// `id` that is not still in flight has happened.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Upper bound (inclusive): the reader's own transaction identifier, or
    /// the next unclaimed identifier for autocommit reads.
    pub id: TransactionId,
    /// The reader's own transaction, zero for read-only autocommit.
    pub own: TransactionId,
    /// Transactions that were in flight when the snapshot was taken.
    pub active: Arc<HashSet<TransactionId>>,
}

impl Snapshot {
    fn committed(&self, tid: TransactionId) -> bool {
        tid <= self.id && !self.active.contains(&tid)
    }

    /// An object is visible iff its creator has happened for this snapshot
    /// and its expirer has not. The reader's own in-flight writes are
    /// visible to itself.
    pub fn is_visible(&self, obj: &PageObject) -> bool {
        if self.own != 0 && obj.tid == self.own {
            return obj.xid != self.own;
        }
        if !self.committed(obj.tid) {
            return false;
        }
        if obj.xid == 0 {
            return true;
        }
        if self.own != 0 && obj.xid == self.own {
            return false;
        }
        !self.committed(obj.xid)
    }
}

/// The set of transactions currently in flight against one database.
#[derive(Debug, Default)]
pub struct TxTable {
    active: Mutex<HashSet<TransactionId>>,
}

impl TxTable {
    pub fn begin(&self, tid: TransactionId) {
        self.active.lock().insert(tid);
        crate::strata_debug_log!("[TxTable::begin] Started tid: {tid}");
    }

    pub fn finish(&self, tid: TransactionId) {
        self.active.lock().remove(&tid);
        crate::strata_debug_log!("[TxTable::finish] Finished tid: {tid}");
    }

    pub fn is_active(&self, tid: TransactionId) -> bool {
        self.active.lock().contains(&tid)
    }

    pub fn snapshot(&self, id: TransactionId, own: TransactionId) -> Snapshot {
        Snapshot {
            id,
            own,
            active: Arc::new(self.active.lock().clone()),
        }
    }
}

/// Per-database state shared by every connection in this process: the
/// writer mutex serializing write statements and the active-transaction
/// table.
#[derive(Debug, Default)]
pub struct SharedDb {
    pub writer: Mutex<()>,
    pub tx: TxTable,
}

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<SharedDb>>>> = OnceLock::new();

/// The shared state for a database path. In-memory databases are private to
/// their connection and get a fresh instance.
pub fn shared_db(path: Option<&Path>) -> Arc<SharedDb> {
    let Some(path) = path else {
        return Arc::new(SharedDb::default());
    };
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    registry.lock().entry(key).or_default().clone()
}

/// Commit work over the writer's dirty pages: every expiration stamped by
/// this transaction becomes permanent, so the expired versions are
/// physically removed.
pub fn commit_dirty_pages(
    btree: &mut BTree,
    dirty: &HashSet<PageId>,
    tid: TransactionId,
) -> Result<(), StorageError> {
    let mut victims = Vec::new();
    for &page_id in dirty {
        if page_id >= btree.pager.total_pages() {
            continue;
        }
        let page = btree.pager.fetch_page(page_id)?;
        if !page.is_leaf() {
            continue;
        }
        for obj in page.objects() {
            if obj.xid == tid {
                victims.push((obj.key.clone(), obj.tid));
            }
        }
    }
    crate::strata_debug_log!(
        "[commit_dirty_pages] tid {tid}: purging {} expired version(s)",
        victims.len()
    );
    for (key, creator) in victims {
        btree.remove(&key, creator)?;
    }
    Ok(())
}

/// Rollback work over the writer's dirty pages: creations by this
/// transaction are removed and its expirations are cleared back to live.
pub fn rollback_dirty_pages(
    btree: &mut BTree,
    dirty: &HashSet<PageId>,
    tid: TransactionId,
) -> Result<(), StorageError> {
    let mut created = Vec::new();
    let mut expired = Vec::new();
    for &page_id in dirty {
        if page_id >= btree.pager.total_pages() {
            continue;
        }
        let page = btree.pager.fetch_page(page_id)?;
        if !page.is_leaf() {
            continue;
        }
        for obj in page.objects() {
            if obj.tid == tid {
                created.push(obj.key.clone());
            } else if obj.xid == tid {
                expired.push((obj.key.clone(), obj.tid));
            }
        }
    }
    crate::strata_debug_log!(
        "[rollback_dirty_pages] tid {tid}: undoing {} creation(s), {} expiration(s)",
        created.len(),
        expired.len()
    );
    for key in created {
        btree.remove(&key, tid)?;
    }
    for (key, creator) in expired {
        btree.expire(&key, creator, 0)?;
    }
    Ok(())
}
