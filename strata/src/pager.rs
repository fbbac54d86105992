use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::StorageError;
use crate::header::{Header, HEADER_SIZE};
use crate::page::Page;
use crate::{PageId, TableId, TransactionId, DEFAULT_PAGE_SIZE};

enum Backing {
    /// Dense 0-indexed page store; operations are O(1) and never touch I/O.
    Memory(Vec<Page>),
    File(File),
}

/// Page-addressed I/O over a backing file or an in-memory page vector.
///
/// The pager owns the file header and therefore the tree root and the global
/// counters. Fetches hand out owned copies so tree traversal is decoupled
/// from pager storage.
pub struct Pager {
    backing: Backing,
    header: Header,
    num_pages: u32,
}

impl Pager {
    /// An in-memory database. The page size is only configurable here; files
    /// are always created with the default.
    pub fn open_memory(page_size: usize) -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            header: Header::new(page_size as u16),
            num_pages: 0,
        }
    }

    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        crate::strata_debug_log!("[Pager::open_file] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let header = if file_size == 0 {
            let header = Header::new(DEFAULT_PAGE_SIZE as u16);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.encode())?;
            header
        } else {
            let mut raw = [0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut raw)?;
            Header::decode(&raw)?
        };

        let page_size = header.page_size as u64;
        let num_pages = ((file_size.saturating_sub(HEADER_SIZE as u64)) / page_size) as u32;
        crate::strata_debug_log!(
            "[Pager::open_file] File size: {file_size}, initial num_pages: {num_pages}"
        );

        Ok(Self {
            backing: Backing::File(file),
            header,
            num_pages,
        })
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    /// Re-reads the header and page count from the file. Another connection
    /// may have moved the root or advanced the counters since this one last
    /// looked; callers refresh at statement start, under the statement's
    /// lock.
    pub fn refresh(&mut self) -> Result<(), StorageError> {
        if let Backing::File(file) = &mut self.backing {
            let mut raw = [0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut raw)?;
            self.header = Header::decode(&raw)?;
            let file_size = file.metadata()?.len();
            self.num_pages = ((file_size.saturating_sub(HEADER_SIZE as u64))
                / self.header.page_size as u64) as u32;
        }
        Ok(())
    }

    pub fn total_pages(&self) -> u32 {
        self.num_pages
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        HEADER_SIZE as u64 + self.page_size() as u64 * page_id as u64
    }

    /// Returns an owned copy of the page. Page numbers are validated by the
    /// tree; a number past the end is a corruption signal here.
    pub fn fetch_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        crate::strata_debug_log!("[Pager::fetch_page] Reading page_id: {page_id}");
        if page_id >= self.num_pages {
            return Err(StorageError::CorruptedPage(format!(
                "page {page_id} past end of store ({} pages)",
                self.num_pages
            )));
        }
        match &mut self.backing {
            Backing::Memory(pages) => Ok(pages[page_id as usize].clone()),
            Backing::File(file) => {
                let offset = HEADER_SIZE as u64
                    + self.header.page_size as u64 * page_id as u64;
                file.seek(SeekFrom::Start(offset))?;
                let mut raw = vec![0u8; self.header.page_size as usize];
                file.read_exact(&mut raw)?;
                Page::decode(&raw)
            }
        }
    }

    pub fn store_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        crate::strata_debug_log!("[Pager::store_page] Writing page_id: {page_id}");
        let offset = self.page_offset(page_id);
        match &mut self.backing {
            Backing::Memory(pages) => {
                if page_id as usize == pages.len() {
                    pages.push(page.clone());
                } else {
                    pages[page_id as usize] = page.clone();
                }
            }
            Backing::File(file) => {
                // One buffered write per page; durability is the OS cache's
                // problem (no fsync contract).
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&page.encode())?;
            }
        }
        if page_id >= self.num_pages {
            self.num_pages = page_id + 1;
        }
        Ok(())
    }

    pub fn append_page(&mut self, page: &Page) -> Result<PageId, StorageError> {
        let page_id = self.num_pages;
        crate::strata_debug_log!("[Pager::append_page] Allocating new page_id: {page_id}");
        self.store_page(page_id, page)?;
        Ok(page_id)
    }

    /// Drops the last page; the tree reclaims interior holes by swapping
    /// them with the last page first.
    pub fn truncate_last_page(&mut self) -> Result<(), StorageError> {
        if self.num_pages == 0 {
            return Ok(());
        }
        self.num_pages -= 1;
        match &mut self.backing {
            Backing::Memory(pages) => {
                pages.pop();
            }
            Backing::File(file) => {
                let len = HEADER_SIZE as u64
                    + self.header.page_size as u64 * self.num_pages as u64;
                file.set_len(len)?;
            }
        }
        Ok(())
    }

    pub fn truncate_all(&mut self) -> Result<(), StorageError> {
        self.num_pages = 0;
        match &mut self.backing {
            Backing::Memory(pages) => pages.clear(),
            Backing::File(file) => file.set_len(HEADER_SIZE as u64)?,
        }
        Ok(())
    }

    pub fn root_page(&self) -> PageId {
        self.header.root_page
    }

    pub fn set_root_page(&mut self, page_id: PageId) -> Result<(), StorageError> {
        crate::strata_debug_log!("[Pager::set_root_page] New root: {page_id}");
        self.header.root_page = page_id;
        self.write_header()
    }

    /// Claims the next transaction identifier. Callers hold the writer
    /// exclusion while doing so.
    pub fn claim_tid(&mut self) -> Result<TransactionId, StorageError> {
        let tid = self.header.next_tid;
        self.header.next_tid += 1;
        self.write_header()?;
        Ok(tid)
    }

    /// The next unclaimed transaction identifier, taken non-destructively.
    /// Autocommit readers use it as their snapshot.
    pub fn peek_tid(&self) -> TransactionId {
        self.header.next_tid
    }

    pub fn claim_table_id(&mut self) -> Result<TableId, StorageError> {
        let table_id = self.header.next_table_id;
        self.header.next_table_id += 1;
        self.write_header()?;
        Ok(table_id)
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        if let Backing::File(file) = &mut self.backing {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&self.header.encode())?;
        }
        Ok(())
    }
}
