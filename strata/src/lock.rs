//! Advisory file locks scoped to one statement: writers take the exclusive
//! lock, readers the shared one. In-memory databases never lock.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::StorageError;

/// A held advisory lock on the database file, released on drop.
pub struct FileLock {
    file: std::fs::File,
}

impl FileLock {
    /// Blocks until the exclusive lock is held. Combined with the
    /// per-process writer mutex this serializes all writers on a file.
    pub fn exclusive<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        file.lock()?;
        crate::strata_debug_log!("[FileLock::exclusive] Locked {:?}", path.as_ref());
        Ok(Self { file })
    }

    /// Blocks until a shared lock is held; readers coexist with each other
    /// but not with a writer.
    pub fn shared<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        file.lock_shared()?;
        crate::strata_debug_log!("[FileLock::shared] Locked {:?}", path.as_ref());
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock.db");
        std::fs::write(&path, b"").unwrap();

        let first = FileLock::shared(&path).unwrap();
        let second = FileLock::shared(&path).unwrap();
        drop(first);
        drop(second);

        let exclusive = FileLock::exclusive(&path).unwrap();
        drop(exclusive);
    }
}
