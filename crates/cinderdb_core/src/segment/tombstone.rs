//! Tombstone log: an append-only file of deletion entries.
//!
//! Deletes never touch the data segments; the deletion is recorded here
//! and replayed against the rebuilt directory at open. A fresh tombstone
//! file is created every time the store opens, and old ones are read only
//! by recovery.

use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::segment::record::{TombstoneEntry, TOMBSTONE_HEADER_SIZE};
use crate::types::FileId;
use cinderdb_storage::{FileBackend, StorageBackend};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Append-only deletion log with segment-style rollover.
pub struct TombstoneFile {
    id: FileId,
    backend: Box<dyn StorageBackend>,
    write_offset: AtomicU64,
}

impl TombstoneFile {
    /// Creates a new empty tombstone file in the store directory.
    pub fn create(dir: &StoreDir, id: FileId) -> StoreResult<Self> {
        let backend = FileBackend::create_new(&dir.tombstone_file_path(id))?;
        dir.sync_directory()?;

        debug!(%id, "created tombstone file");

        Ok(Self {
            id,
            backend: Box::new(backend),
            write_offset: AtomicU64::new(0),
        })
    }

    /// Opens an existing tombstone file for recovery reads.
    pub fn open_for_reading(dir: &StoreDir, id: FileId) -> StoreResult<Self> {
        let backend = FileBackend::open_read_only(&dir.tombstone_file_path(id))?;
        let size = backend.size()?;

        Ok(Self {
            id,
            backend: Box::new(backend),
            write_offset: AtomicU64::new(size),
        })
    }

    /// Builds a tombstone file over an arbitrary backend, for tests.
    #[must_use]
    pub fn from_backend(id: FileId, backend: Box<dyn StorageBackend>) -> Self {
        let size = backend.size().unwrap_or(0);
        Self {
            id,
            backend,
            write_offset: AtomicU64::new(size),
        }
    }

    /// Returns the file id.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the current write offset.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Appends one tombstone entry.
    pub fn append(&self, entry: &TombstoneEntry) -> StoreResult<()> {
        let bytes = entry.encode();
        let offset = self.backend.append(&bytes)?;
        self.write_offset
            .store(offset + bytes.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Forces appended entries to durable storage.
    pub fn sync(&self) -> StoreResult<()> {
        self.backend.sync_data()?;
        Ok(())
    }

    /// Returns an iterator over entries in write order.
    ///
    /// Same scan policy as index files: a truncated or unparseable tail
    /// entry yields one `Err` and then stops.
    pub fn iter(&self) -> StoreResult<TombstoneFileIter<'_>> {
        Ok(TombstoneFileIter {
            backend: self.backend.as_ref(),
            offset: 0,
            size: self.backend.size()?,
            failed: false,
        })
    }
}

impl std::fmt::Debug for TombstoneFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneFile")
            .field("id", &self.id)
            .field("write_offset", &self.write_offset())
            .finish_non_exhaustive()
    }
}

/// Iterator over a tombstone file's entries.
pub struct TombstoneFileIter<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    size: u64,
    failed: bool,
}

impl TombstoneFileIter<'_> {
    fn read_entry(&mut self) -> StoreResult<TombstoneEntry> {
        let header = self
            .backend
            .read_at(self.offset, TOMBSTONE_HEADER_SIZE)
            .map_err(|_| StoreError::corruption("tombstone entry header truncated"))?;

        let key_len = header[4] as usize;
        let total = TOMBSTONE_HEADER_SIZE + key_len;

        let bytes = self
            .backend
            .read_at(self.offset, total)
            .map_err(|_| StoreError::corruption("tombstone entry key truncated"))?;

        let entry = TombstoneEntry::decode(&bytes)?;
        self.offset += total as u64;
        Ok(entry)
    }
}

impl Iterator for TombstoneFileIter<'_> {
    type Item = StoreResult<TombstoneEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.size {
            return None;
        }

        match self.read_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;
    use cinderdb_storage::InMemoryBackend;
    use tempfile::tempdir;

    #[test]
    fn append_and_iterate() {
        let file = TombstoneFile::from_backend(FileId::new(1), Box::new(InMemoryBackend::new()));

        let e1 = TombstoneEntry::new(b"a".to_vec(), SequenceNumber::new(1));
        let e2 = TombstoneEntry::new(b"bb".to_vec(), SequenceNumber::new(2));
        file.append(&e1).unwrap();
        file.append(&e2).unwrap();

        assert_eq!(file.write_offset(), u64::from(e1.size() + e2.size()));

        let entries: Vec<_> = file.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries, vec![e1, e2]);
    }

    #[test]
    fn corrupt_tail_stops_iteration() {
        let e = TombstoneEntry::new(b"key".to_vec(), SequenceNumber::new(1));
        let mut bytes = e.encode();
        let mut bad = e.encode();
        bad[0] ^= 0xFF; // break the checksum
        bytes.extend_from_slice(&bad);

        let file = TombstoneFile::from_backend(
            FileId::new(1),
            Box::new(InMemoryBackend::with_data(bytes)),
        );
        let results: Vec<_> = file.iter().unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn create_and_reopen_on_disk() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        let id = FileId::new(9);

        let entry = TombstoneEntry::new(b"gone".to_vec(), SequenceNumber::new(3));
        {
            let file = TombstoneFile::create(&dir, id).unwrap();
            file.append(&entry).unwrap();
            file.sync().unwrap();
        }

        let file = TombstoneFile::open_for_reading(&dir, id).unwrap();
        let entries: Vec<_> = file.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries, vec![entry]);
    }
}
