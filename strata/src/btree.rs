//! B-Tree ordering of pages: key-ordered access to variable-length objects.
//!
//! Interior pages map the smallest key of each child subtree to the child
//! page number. There are no parent or sibling pointers; ancestors are
//! located by re-descending from the root, and a path is only cached for
//! the duration of one operation.

use std::collections::{HashSet, VecDeque};

use crate::error::StorageError;
use crate::page::{Page, PageKind, PageObject, PAGE_HEADER_SIZE};
use crate::pager::Pager;
use crate::{PageId, TransactionId};

pub struct BTree {
    pub pager: Pager,
    /// Every page number stored or appended since the last drain. The
    /// transaction coordinator collects these as the dirty set of the
    /// current writer.
    touched: HashSet<PageId>,
}

impl BTree {
    pub fn new(pager: Pager) -> Self {
        Self {
            pager,
            touched: HashSet::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    fn capacity(&self) -> usize {
        self.page_size() - PAGE_HEADER_SIZE
    }

    pub fn take_touched(&mut self) -> HashSet<PageId> {
        std::mem::take(&mut self.touched)
    }

    fn store(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.touched.insert(page_id);
        self.pager.store_page(page_id, page)
    }

    fn append(&mut self, page: &Page) -> Result<PageId, StorageError> {
        let page_id = self.pager.append_page(page)?;
        self.touched.insert(page_id);
        Ok(page_id)
    }

    /// The entry to follow for `key`: the rightmost entry whose head key is
    /// not greater than `key`, or the leftmost entry when every head is
    /// greater.
    fn child_index(page: &Page, key: &[u8]) -> usize {
        let at = page
            .objects()
            .partition_point(|o| o.key.as_slice() <= key);
        at.saturating_sub(1)
    }

    /// Page numbers from the root down to the leaf responsible for `key`.
    fn descend(&mut self, key: &[u8]) -> Result<Vec<PageId>, StorageError> {
        let mut path = Vec::new();
        let mut current = self.pager.root_page();
        loop {
            let page = self.pager.fetch_page(current)?;
            path.push(current);
            if page.is_leaf() {
                return Ok(path);
            }
            let index = Self::child_index(&page, key);
            current = page.objects()[index].child_page();
        }
    }

    fn pointer_key_for(page: &Page, child: PageId) -> Option<Vec<u8>> {
        page.objects()
            .iter()
            .find(|o| o.child_page() == child)
            .map(|o| o.key.clone())
    }

    /// Inserts a new object. At most two versions of a key may coexist in a
    /// leaf (the frozen one and the writer's in-flight one); violating that
    /// is a serialization conflict for the caller to retry.
    pub fn add(&mut self, obj: PageObject) -> Result<(), StorageError> {
        let size = obj.serialized_len();
        if size > self.capacity() {
            return Err(StorageError::ObjectTooLarge {
                size,
                capacity: self.capacity(),
            });
        }
        if self.pager.total_pages() == 0 {
            let mut root = Page::new(PageKind::Leaf, self.page_size());
            root.add(obj)?;
            let root_id = self.append(&root)?;
            self.pager.set_root_page(root_id)?;
            return Ok(());
        }

        let path = self.descend(&obj.key)?;
        let leaf_id = *path.last().unwrap();
        let mut leaf = self.pager.fetch_page(leaf_id)?;
        let existing: Vec<(TransactionId, TransactionId)> = leaf
            .objects()
            .iter()
            .filter(|o| o.key == obj.key)
            .map(|o| (o.tid, o.xid))
            .collect();
        match existing.as_slice() {
            [] => {}
            [(creator, expirer)] if *expirer == obj.tid => {
                // Re-inserting over a version we deleted in this same
                // transaction purges the in-flight twin instead of
                // stacking a second own version.
                if *creator == obj.tid {
                    leaf.delete(&obj.key, obj.tid);
                    self.store(leaf_id, &leaf)?;
                }
            }
            _ => return Err(StorageError::SerializationFailure),
        }
        self.insert_at(&path, path.len() - 1, obj)
    }

    /// Inserts `obj` into the page at `path[depth]`, splitting up the
    /// ancestor chain on overflow.
    fn insert_at(
        &mut self,
        path: &[PageId],
        depth: usize,
        obj: PageObject,
    ) -> Result<(), StorageError> {
        let page_id = path[depth];
        let mut page = self.pager.fetch_page(page_id)?;

        if page.fits(obj.serialized_len()) {
            page.add(obj)?;
            self.store(page_id, &page)?;
            return self.sync_parent_key(path, depth, page_id);
        }

        // Split: distribute by byte count, lower keys left, never between
        // two versions of one key.
        let mut objects = page.take_objects();
        let at = objects.partition_point(|o| o.key.as_slice() <= obj.key.as_slice());
        objects.insert(at, obj);
        let mut chunks = Self::chunk_objects(objects, self.capacity()).into_iter();
        let left = Page::with_objects(page.kind(), self.page_size(), chunks.next().unwrap());
        let left_head = left.head().unwrap().key.clone();
        self.store(page_id, &left)?;

        let mut siblings = Vec::new();
        for chunk in chunks {
            let sibling = Page::with_objects(page.kind(), self.page_size(), chunk);
            let head = sibling.head().unwrap().key.clone();
            let sibling_id = self.append(&sibling)?;
            siblings.push((head, sibling_id));
        }
        crate::strata_debug_log!(
            "[BTree::insert_at] Split page {page_id} into {} sibling(s)",
            siblings.len()
        );

        if depth == 0 {
            // The root itself overflowed: grow the tree by one level.
            let mut root = Page::new(PageKind::Interior, self.page_size());
            root.add(PageObject::pointer(left_head, page_id))?;
            for (head, sibling_id) in siblings {
                root.add(PageObject::pointer(head, sibling_id))?;
            }
            let root_id = self.append(&root)?;
            self.pager.set_root_page(root_id)?;
            return Ok(());
        }

        let parent = self.pager.fetch_page(path[depth - 1])?;
        let ref_key = Self::pointer_key_for(&parent, page_id).ok_or_else(|| {
            StorageError::CorruptedPage(format!("no parent entry for page {page_id}"))
        })?;
        if ref_key != left_head {
            self.rekey_at(path, depth - 1, &ref_key, left_head, page_id)?;
        }
        for (head, sibling_id) in siblings {
            self.insert_at(path, depth - 1, PageObject::pointer(head, sibling_id))?;
        }
        Ok(())
    }

    /// The split distribution: the balanced two-way split when one exists,
    /// otherwise greedy capacity-bounded chunks (an oversized object flanked
    /// by small neighbors can make a balanced split impossible).
    fn chunk_objects(objects: Vec<PageObject>, capacity: usize) -> Vec<Vec<PageObject>> {
        if let Some(at) = Self::split_point(&objects, capacity) {
            let mut left = objects;
            let right = left.split_off(at);
            return vec![left, right];
        }
        let mut chunks: Vec<Vec<PageObject>> = vec![Vec::new()];
        let mut used = 0;
        for obj in objects {
            let len = obj.serialized_len();
            if used + len > capacity && !chunks.last().unwrap().is_empty() {
                chunks.push(Vec::new());
                used = 0;
            }
            used += len;
            chunks.last_mut().unwrap().push(obj);
        }
        chunks
    }

    /// Realigns the parent entry for `page_id` with the page's current head
    /// key. A no-op at the root, for an emptied page, and when the entry
    /// already matches.
    fn sync_parent_key(
        &mut self,
        path: &[PageId],
        depth: usize,
        page_id: PageId,
    ) -> Result<(), StorageError> {
        if depth == 0 {
            return Ok(());
        }
        let page = self.pager.fetch_page(page_id)?;
        let Some(head) = page.head().map(|o| o.key.clone()) else {
            return Ok(());
        };
        let parent = self.pager.fetch_page(path[depth - 1])?;
        if let Some(ref_key) = Self::pointer_key_for(&parent, page_id) {
            if ref_key != head {
                self.rekey_at(path, depth - 1, &ref_key, head, page_id)?;
            }
        }
        Ok(())
    }

    /// Moves the entry for `child_id` in the page at `path[depth]` from
    /// `old_key` to `new_key`, propagating head-key changes upward.
    fn rekey_at(
        &mut self,
        path: &[PageId],
        depth: usize,
        old_key: &[u8],
        new_key: Vec<u8>,
        child_id: PageId,
    ) -> Result<(), StorageError> {
        let page_id = path[depth];
        let mut page = self.pager.fetch_page(page_id)?;
        let was_head = page.head().map(|o| o.key == old_key).unwrap_or(false);
        if !page.delete(old_key, 0) {
            return Err(StorageError::CorruptedPage(format!(
                "missing entry for page {child_id} in page {page_id}"
            )));
        }
        let pointer = PageObject::pointer(new_key, child_id);
        if page.fits(pointer.serialized_len()) {
            page.add(pointer)?;
            let head_now = page.head().unwrap().key.clone();
            self.store(page_id, &page)?;
            if was_head && depth > 0 && head_now != old_key {
                self.rekey_at(path, depth - 1, old_key, head_now, page_id)?;
            }
            return Ok(());
        }

        // The replacement key is longer than the page can absorb: store the
        // page with the entry removed and run the ordinary insert path,
        // which splits and realigns the ancestors itself.
        self.store(page_id, &page)?;
        self.insert_at(path, depth, pointer)?;
        self.sync_parent_key(path, depth, page_id)
    }

    /// Split index over the merged object list: both halves within
    /// capacity, as balanced as the byte counts allow, ties keeping the
    /// lower keys left, and the two versions of one key never separated.
    fn split_point(objects: &[PageObject], capacity: usize) -> Option<usize> {
        let total: usize = objects.iter().map(PageObject::serialized_len).sum();
        let mut left = 0;
        let mut best = None;
        let mut best_diff = usize::MAX;
        for i in 1..objects.len() {
            left += objects[i - 1].serialized_len();
            if objects[i].key == objects[i - 1].key {
                continue;
            }
            let right = total - left;
            if left <= capacity && right <= capacity {
                let diff = left.abs_diff(right);
                if diff < best_diff {
                    best_diff = diff;
                    best = Some(i);
                }
            }
        }
        best
    }

    /// Marks the live version created by `tid` as expired by `xid`. An xid
    /// of zero clears the stamp instead (the rollback path). Expiry by a
    /// writer that is not the one already recorded is a conflict.
    pub fn expire(
        &mut self,
        key: &[u8],
        tid: TransactionId,
        xid: TransactionId,
    ) -> Result<bool, StorageError> {
        if self.pager.total_pages() == 0 {
            return Ok(false);
        }
        let path = self.descend(key)?;
        let leaf_id = *path.last().unwrap();
        let mut leaf = self.pager.fetch_page(leaf_id)?;
        if xid != 0 {
            let conflicting = leaf
                .objects()
                .iter()
                .any(|o| o.key == key && o.tid == tid && o.xid != 0 && o.xid != xid);
            if conflicting {
                return Err(StorageError::SerializationFailure);
            }
        }
        if !leaf.expire(key, tid, xid) {
            return Ok(false);
        }
        self.store(leaf_id, &leaf)?;
        Ok(true)
    }

    /// Physically removes the objects with matching key and creator,
    /// collapsing the tree where pages empty out.
    pub fn remove(&mut self, key: &[u8], tid: TransactionId) -> Result<bool, StorageError> {
        if self.pager.total_pages() == 0 {
            return Ok(false);
        }
        let path = self.descend(key)?;
        let leaf_id = *path.last().unwrap();
        let mut leaf = self.pager.fetch_page(leaf_id)?;
        let old_head = match leaf.head() {
            Some(head) => head.key.clone(),
            None => return Ok(false),
        };
        if !leaf.delete(key, tid) {
            return Ok(false);
        }

        match leaf.head() {
            None if path.len() == 1 => {
                // The tree emptied out entirely.
                self.pager.truncate_all()?;
                self.pager.set_root_page(0)?;
            }
            None => {
                self.store(leaf_id, &leaf)?;
                let mut freed = Vec::new();
                self.unlink_child(&path, path.len() - 2, &old_head, leaf_id, &mut freed)?;
                self.reclaim(freed)?;
            }
            Some(_) => {
                self.store(leaf_id, &leaf)?;
                self.sync_parent_key(&path, path.len() - 1, leaf_id)?;
            }
        }
        Ok(true)
    }

    /// Removes the entry for an emptied child from the page at
    /// `path[depth]`, collapsing single-entry interior pages and demoting a
    /// single-child root. Freed page numbers are collected for reclamation.
    fn unlink_child(
        &mut self,
        path: &[PageId],
        depth: usize,
        child_key: &[u8],
        child_id: PageId,
        freed: &mut Vec<PageId>,
    ) -> Result<(), StorageError> {
        freed.push(child_id);
        let page_id = path[depth];
        let mut page = self.pager.fetch_page(page_id)?;
        if !page.delete(child_key, 0) {
            return Err(StorageError::CorruptedPage(format!(
                "missing entry for emptied page {child_id} in page {page_id}"
            )));
        }

        match page.objects().len() {
            0 => {
                // Only reachable for a root that lost its last child.
                self.store(page_id, &page)?;
                freed.clear();
                self.pager.truncate_all()?;
                self.pager.set_root_page(0)?;
            }
            1 => {
                let surviving = page.objects()[0].clone();
                self.store(page_id, &page)?;
                if depth == 0 {
                    // Demote the surviving child to be the new root.
                    self.pager.set_root_page(surviving.child_page())?;
                    freed.push(page_id);
                } else {
                    // Collapse: the grandparent points directly at the
                    // surviving child.
                    let gp_id = path[depth - 1];
                    let mut gp = self.pager.fetch_page(gp_id)?;
                    let gp_key = Self::pointer_key_for(&gp, page_id).ok_or_else(|| {
                        StorageError::CorruptedPage(format!(
                            "no grandparent entry for page {page_id}"
                        ))
                    })?;
                    gp.delete(&gp_key, 0);
                    let pointer =
                        PageObject::pointer(surviving.key.clone(), surviving.child_page());
                    if gp.fits(pointer.serialized_len()) {
                        gp.add(pointer)?;
                        self.store(gp_id, &gp)?;
                    } else {
                        self.store(gp_id, &gp)?;
                        self.insert_at(path, depth - 1, pointer)?;
                    }
                    freed.push(page_id);
                    self.sync_parent_key(path, depth - 1, gp_id)?;
                }
            }
            _ => {
                self.store(page_id, &page)?;
                self.sync_parent_key(path, depth, page_id)?;
            }
        }
        Ok(())
    }

    /// Returns freed pages to the file by swapping interior holes with the
    /// last page and truncating, patching whatever reference pointed at the
    /// moved page.
    fn reclaim(&mut self, freed: Vec<PageId>) -> Result<(), StorageError> {
        let mut holes: HashSet<PageId> = freed.into_iter().collect();
        while !holes.is_empty() {
            let last = self.pager.total_pages() - 1;
            if holes.remove(&last) {
                self.pager.truncate_last_page()?;
                continue;
            }
            let hole = *holes.iter().max().unwrap();
            holes.remove(&hole);
            let moved = self.pager.fetch_page(last)?;
            self.store(hole, &moved)?;
            self.pager.truncate_last_page()?;
            self.patch_reference(last, hole, &moved)?;
        }
        Ok(())
    }

    /// After a swap, the parent entry (or the root pointer) for the moved
    /// page still names its old number.
    fn patch_reference(
        &mut self,
        old_id: PageId,
        new_id: PageId,
        moved: &Page,
    ) -> Result<(), StorageError> {
        if self.pager.root_page() == old_id {
            return self.pager.set_root_page(new_id);
        }
        let head_key = moved
            .head()
            .ok_or_else(|| StorageError::CorruptedPage("moved page is empty".to_string()))?
            .key
            .clone();
        let mut current = self.pager.root_page();
        loop {
            let mut page = self.pager.fetch_page(current)?;
            if page.is_leaf() {
                return Err(StorageError::CorruptedPage(format!(
                    "no reference to moved page {old_id}"
                )));
            }
            let entry = page.objects()[Self::child_index(&page, &head_key)].clone();
            if entry.child_page() == old_id {
                page.replace(&entry.key, 0, new_id.to_be_bytes().to_vec());
                self.store(current, &page)?;
                return Ok(());
            }
            current = entry.child_page();
        }
    }

    /// Atomic per-key replace under the two-version rule. The replacement
    /// may be larger than the original; overflow falls back to the split
    /// path.
    pub fn update(
        &mut self,
        old: &PageObject,
        new: PageObject,
        tid: TransactionId,
    ) -> Result<(), StorageError> {
        if self.pager.total_pages() == 0 {
            return self.add(new);
        }
        let path = self.descend(&new.key)?;
        let leaf_id = *path.last().unwrap();
        let mut leaf = self.pager.fetch_page(leaf_id)?;
        // (tid, xid) stamps of the stored versions of this key.
        let versions: Vec<(TransactionId, TransactionId)> = leaf
            .objects()
            .iter()
            .filter(|o| o.key == new.key)
            .map(|o| (o.tid, o.xid))
            .collect();
        match versions.len() {
            0 => return self.add(new),
            1 => {
                let (frozen_tid, frozen_xid) = versions[0];
                if frozen_xid != 0 && frozen_xid != tid {
                    return Err(StorageError::SerializationFailure);
                }
                if frozen_tid == tid {
                    // Our own in-flight version: collapse it in place.
                    leaf.delete(&new.key, tid);
                } else if !leaf.expire(&new.key, old.tid, tid) {
                    return Err(StorageError::SerializationFailure);
                }
            }
            _ => {
                if !versions.iter().any(|&(creator, _)| creator == tid) {
                    return Err(StorageError::SerializationFailure);
                }
                leaf.delete(&new.key, tid);
            }
        }
        self.store(leaf_id, &leaf)?;
        if leaf.fits(new.serialized_len()) {
            leaf.add(new)?;
            self.store(leaf_id, &leaf)?;
            self.sync_parent_key(&path, path.len() - 1, leaf_id)
        } else {
            self.insert_at(&path, path.len() - 1, new)
        }
    }

    /// Every stored version of `key`.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Vec<PageObject>, StorageError> {
        if self.pager.total_pages() == 0 {
            return Ok(Vec::new());
        }
        let path = self.descend(key)?;
        let leaf = self.pager.fetch_page(*path.last().unwrap())?;
        Ok(leaf
            .objects()
            .iter()
            .filter(|o| o.key == key)
            .cloned()
            .collect())
    }

    /// Lazy forward scan over `[start, end)`; `end = None` scans to the end
    /// of the key space. The iterator materializes one leaf at a time and
    /// re-descends from the root between leaves, so structural changes
    /// between leaves do not invalidate it.
    pub fn range(&mut self, start: Vec<u8>, end: Option<Vec<u8>>) -> RangeIter<'_> {
        RangeIter {
            btree: self,
            cursor: start,
            end,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

pub struct RangeIter<'a> {
    btree: &'a mut BTree,
    cursor: Vec<u8>,
    end: Option<Vec<u8>>,
    buffer: VecDeque<PageObject>,
    done: bool,
}

impl RangeIter<'_> {
    fn fill(&mut self) -> Result<(), StorageError> {
        if self.btree.pager.total_pages() == 0 {
            self.done = true;
            return Ok(());
        }
        let path = self.btree.descend(&self.cursor)?;
        let leaf = self.btree.pager.fetch_page(*path.last().unwrap())?;
        for obj in leaf.objects() {
            if obj.key.as_slice() < self.cursor.as_slice() {
                continue;
            }
            if let Some(end) = &self.end {
                if obj.key.as_slice() >= end.as_slice() {
                    self.done = true;
                    break;
                }
            }
            self.buffer.push_back(obj.clone());
        }
        // Advance past this leaf: the last key plus a zero byte is the
        // smallest possible successor.
        match leaf.objects().last() {
            Some(last) => {
                let mut next = last.key.clone();
                next.push(0);
                if next <= self.cursor {
                    self.done = true;
                }
                self.cursor = next;
            }
            None => self.done = true,
        }
        Ok(())
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<PageObject, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(obj) = self.buffer.pop_front() {
                return Some(Ok(obj));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
