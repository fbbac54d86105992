use bytes::{Buf, BufMut, BytesMut};

use crate::error::StorageError;
use crate::{PageId, TransactionId};

/// Serialized page header: 1 byte kind, 2 bytes used.
pub const PAGE_HEADER_SIZE: usize = 3;

/// Fixed prefix of every serialized object:
/// total length (4), tid (4), xid (4), key length (2).
pub const OBJECT_HEADER_SIZE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Leaf = 0,
    Interior = 1,
}

impl PageKind {
    fn from_u8(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(PageKind::Leaf),
            1 => Ok(PageKind::Interior),
            other => Err(StorageError::CorruptedPage(format!(
                "unknown page kind {other}"
            ))),
        }
    }
}

/// The unit stored in a page: a key/value pair stamped with the transaction
/// that created it (`tid`) and the transaction that expired it (`xid`,
/// zero while the object is live).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageObject {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tid: TransactionId,
    pub xid: TransactionId,
}

impl PageObject {
    pub fn new(key: Vec<u8>, value: Vec<u8>, tid: TransactionId, xid: TransactionId) -> Self {
        Self {
            key,
            value,
            tid,
            xid,
        }
    }

    /// An interior-page entry: the smallest key of a child subtree mapped to
    /// the child page number.
    pub fn pointer(key: Vec<u8>, child: PageId) -> Self {
        Self::new(key, child.to_be_bytes().to_vec(), 0, 0)
    }

    /// The child page number carried by an interior-page entry.
    pub fn child_page(&self) -> PageId {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.value[..4]);
        PageId::from_be_bytes(raw)
    }

    pub fn serialized_len(&self) -> usize {
        OBJECT_HEADER_SIZE + self.key.len() + self.value.len()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.serialized_len() as u32);
        buf.put_u32(self.tid);
        buf.put_u32(self.xid);
        buf.put_u16(self.key.len() as u16);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
    }

    /// Parses one object from the front of `bytes`, returning the consumed
    /// length alongside it.
    pub fn decode(bytes: &[u8]) -> Result<(usize, Self), StorageError> {
        if bytes.len() < OBJECT_HEADER_SIZE {
            return Err(StorageError::CorruptedPage(
                "truncated object header".to_string(),
            ));
        }
        let mut cur = bytes;
        let total_len = cur.get_u32() as usize;
        let tid = cur.get_u32();
        let xid = cur.get_u32();
        let key_len = cur.get_u16() as usize;
        if total_len < OBJECT_HEADER_SIZE + key_len || bytes.len() < total_len {
            return Err(StorageError::CorruptedPage(format!(
                "object length {total_len} out of bounds"
            )));
        }
        let key = cur[..key_len].to_vec();
        let value = cur[key_len..total_len - OBJECT_HEADER_SIZE].to_vec();
        Ok((total_len, Self::new(key, value, tid, xid)))
    }
}

/// A fixed-size page: a kind byte, a used count, and serialized objects in
/// ascending key order. Interior pages hold pointer entries, leaves hold
/// data objects.
#[derive(Debug, Clone)]
pub struct Page {
    kind: PageKind,
    page_size: usize,
    objects: Vec<PageObject>,
}

impl Page {
    pub fn new(kind: PageKind, page_size: usize) -> Self {
        Self {
            kind,
            page_size,
            objects: Vec::new(),
        }
    }

    pub fn with_objects(kind: PageKind, page_size: usize, objects: Vec<PageObject>) -> Self {
        Self {
            kind,
            page_size,
            objects,
        }
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == PageKind::Leaf
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total bytes consumed, including the serialized page header.
    pub fn used(&self) -> usize {
        PAGE_HEADER_SIZE
            + self
                .objects
                .iter()
                .map(PageObject::serialized_len)
                .sum::<usize>()
    }

    pub fn fits(&self, extra: usize) -> bool {
        self.used() + extra <= self.page_size
    }

    pub fn objects(&self) -> &[PageObject] {
        &self.objects
    }

    pub fn take_objects(&mut self) -> Vec<PageObject> {
        std::mem::take(&mut self.objects)
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.objects.iter().map(|o| o.key.as_slice())
    }

    /// The first object in stored order; its key is the head key under which
    /// a parent references this page.
    pub fn head(&self) -> Option<&PageObject> {
        self.objects.first()
    }

    fn versions(&self, key: &[u8]) -> usize {
        self.objects.iter().filter(|o| o.key == key).count()
    }

    /// Inserts `obj` at its sorted position.
    ///
    /// The caller must have checked `fits`; the tree never descends into a
    /// page it cannot grow. A second version of a key is admitted only when
    /// the existing version was expired by the inserting transaction (the
    /// update and reinsert paths); anything else is a write-write conflict.
    pub fn add(&mut self, obj: PageObject) -> Result<(), StorageError> {
        assert!(
            self.fits(obj.serialized_len()),
            "page overflow: {} + {} > {}",
            self.used(),
            obj.serialized_len(),
            self.page_size
        );
        let existing: Vec<&PageObject> =
            self.objects.iter().filter(|o| o.key == obj.key).collect();
        match existing.len() {
            0 => {}
            1 if existing[0].xid == obj.tid => {}
            _ => return Err(StorageError::SerializationFailure),
        }
        let at = self
            .objects
            .partition_point(|o| o.key.as_slice() <= obj.key.as_slice());
        self.objects.insert(at, obj);
        Ok(())
    }

    /// Removes every object with matching key and creator. Returns whether
    /// anything was removed.
    pub fn delete(&mut self, key: &[u8], tid: TransactionId) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| !(o.key == key && o.tid == tid));
        self.objects.len() != before
    }

    /// Stamps `xid` on every object with matching key and creator. An xid of
    /// zero clears the stamp (the rollback path). Returns whether anything
    /// was modified.
    pub fn expire(&mut self, key: &[u8], tid: TransactionId, xid: TransactionId) -> bool {
        let mut touched = false;
        for obj in &mut self.objects {
            if obj.key == key && obj.tid == tid {
                obj.xid = xid;
                touched = true;
            }
        }
        touched
    }

    /// Swaps the value stored under `key` for the object created by `tid`.
    /// Used to patch interior pointer entries in place.
    pub fn replace(&mut self, key: &[u8], tid: TransactionId, value: Vec<u8>) -> bool {
        if !self.delete(key, tid) {
            return false;
        }
        self.add(PageObject::new(key.to_vec(), value, tid, 0))
            .is_ok()
    }

    /// Per-key replace under the two-version rule: with no existing version
    /// the new object is simply added; with one, the existing version is
    /// expired first; with two, the in-flight twin created by `tid` is
    /// collapsed, or the update fails as a serialization conflict.
    pub fn update(
        &mut self,
        old: &PageObject,
        new: PageObject,
        tid: TransactionId,
    ) -> Result<(), StorageError> {
        match self.versions(&new.key) {
            0 => self.add(new),
            1 => {
                if !self.expire(&new.key, old.tid, tid) {
                    return Err(StorageError::SerializationFailure);
                }
                self.add(new)
            }
            _ => {
                if !self.delete(&new.key, tid) {
                    return Err(StorageError::SerializationFailure);
                }
                self.add(new)
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.page_size);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.used() as u16);
        for obj in &self.objects {
            obj.encode_into(&mut buf);
        }
        buf.resize(self.page_size, 0);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < PAGE_HEADER_SIZE {
            return Err(StorageError::CorruptedPage("truncated page".to_string()));
        }
        let mut cur = bytes;
        let kind = PageKind::from_u8(cur.get_u8())?;
        let used = cur.get_u16() as usize;
        if used < PAGE_HEADER_SIZE || used > bytes.len() {
            return Err(StorageError::CorruptedPage(format!(
                "used count {used} out of bounds"
            )));
        }
        let mut objects = Vec::new();
        let mut consumed = PAGE_HEADER_SIZE;
        while consumed < used {
            let (len, obj) = PageObject::decode(&bytes[consumed..])?;
            consumed += len;
            objects.push(obj);
        }
        Ok(Self {
            kind,
            page_size: bytes.len(),
            objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &[u8], value: &[u8], tid: TransactionId, xid: TransactionId) -> PageObject {
        PageObject::new(key.to_vec(), value.to_vec(), tid, xid)
    }

    #[test]
    fn object_round_trip() {
        let original = obj(b"key-1", b"some value bytes", 7, 0);
        let mut buf = BytesMut::new();
        original.encode_into(&mut buf);

        let (len, decoded) = PageObject::decode(&buf).unwrap();
        assert_eq!(len, original.serialized_len());
        assert_eq!(decoded, original);
    }

    #[test]
    fn object_header_is_fourteen_bytes() {
        let o = obj(b"k", b"v", 1, 0);
        assert_eq!(o.serialized_len(), OBJECT_HEADER_SIZE + 2);
    }

    #[test]
    fn add_keeps_keys_sorted_and_used_accounted() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        for key in [b"m".as_slice(), b"a", b"z", b"f"] {
            page.add(obj(key, b"v", 1, 0)).unwrap();
        }
        let keys: Vec<&[u8]> = page.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"f", b"m", b"z"]);

        let expected = PAGE_HEADER_SIZE
            + page
                .objects()
                .iter()
                .map(PageObject::serialized_len)
                .sum::<usize>();
        assert_eq!(page.used(), expected);
    }

    #[test]
    fn second_version_requires_own_expiry() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        page.add(obj(b"k", b"old", 1, 0)).unwrap();

        // Another writer cannot stack a version on a live object.
        assert!(matches!(
            page.add(obj(b"k", b"new", 2, 0)),
            Err(StorageError::SerializationFailure)
        ));

        // After tx 2 expires the old version, its replacement is admitted.
        assert!(page.expire(b"k", 1, 2));
        page.add(obj(b"k", b"new", 2, 0)).unwrap();
        assert_eq!(page.versions(b"k"), 2);

        // A third version always fails.
        assert!(matches!(
            page.add(obj(b"k", b"newest", 3, 0)),
            Err(StorageError::SerializationFailure)
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        page.add(obj(b"k", b"v", 5, 0)).unwrap();

        assert!(page.delete(b"k", 5));
        assert!(!page.delete(b"k", 5));
        assert!(page.head().is_none());
    }

    #[test]
    fn delete_matches_creator() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        page.add(obj(b"k", b"v", 5, 0)).unwrap();
        assert!(!page.delete(b"k", 6));
        assert_eq!(page.versions(b"k"), 1);
    }

    #[test]
    fn expire_clears_with_zero() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        page.add(obj(b"k", b"v", 5, 0)).unwrap();
        assert!(page.expire(b"k", 5, 9));
        assert_eq!(page.objects()[0].xid, 9);
        assert!(page.expire(b"k", 5, 0));
        assert_eq!(page.objects()[0].xid, 0);
    }

    #[test]
    fn replace_swaps_pointer_value() {
        let mut page = Page::new(PageKind::Interior, 4096);
        page.add(PageObject::pointer(b"a".to_vec(), 3)).unwrap();
        assert!(page.replace(b"a", 0, 8u32.to_be_bytes().to_vec()));
        assert_eq!(page.objects()[0].child_page(), 8);
    }

    #[test]
    fn update_collapses_in_flight_twin() {
        let mut page = Page::new(PageKind::Leaf, 4096);
        page.add(obj(b"k", b"v1", 1, 0)).unwrap();

        // First update by tx 2 expires the frozen version.
        let old = page.objects()[0].clone();
        page.update(&old, obj(b"k", b"v2", 2, 0), 2).unwrap();
        assert_eq!(page.versions(b"k"), 2);

        // Second update by tx 2 collapses its own in-flight version.
        page.update(&old, obj(b"k", b"v3", 2, 0), 2).unwrap();
        assert_eq!(page.versions(b"k"), 2);
        let live: Vec<_> = page.objects().iter().filter(|o| o.xid == 0).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].value, b"v3");
    }

    #[test]
    fn page_round_trip() {
        let mut page = Page::new(PageKind::Leaf, 512);
        page.add(obj(b"alpha", b"1", 3, 0)).unwrap();
        page.add(obj(b"beta", b"2", 3, 7)).unwrap();

        let bytes = page.encode();
        assert_eq!(bytes.len(), 512);
        let decoded = Page::decode(&bytes).unwrap();
        assert_eq!(decoded.kind(), PageKind::Leaf);
        assert_eq!(decoded.objects(), page.objects());
        assert_eq!(decoded.used(), page.used());
    }

    #[test]
    fn decode_rejects_bad_kind() {
        let mut bytes = Page::new(PageKind::Leaf, 64).encode();
        bytes[0] = 9;
        assert!(Page::decode(&bytes).is_err());
    }
}
