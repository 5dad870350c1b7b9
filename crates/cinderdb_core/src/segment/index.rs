//! Index files: one entry per appended record.
//!
//! An index file is the append-only sidecar of a data segment. It lets
//! recovery and compaction walk a segment's records without touching
//! value bytes.
//!
//! ## Scan policy
//!
//! Iteration ends cleanly at the exact end of the file. A truncated or
//! unparseable tail entry yields one `Err` and then stops; callers treat
//! that as the file's truncation point.

use crate::error::{StoreError, StoreResult};
use crate::segment::record::{IndexFileEntry, INDEX_HEADER_SIZE};
use cinderdb_storage::StorageBackend;

/// Append-only stream of [`IndexFileEntry`] values.
pub struct IndexFile {
    backend: Box<dyn StorageBackend>,
}

impl IndexFile {
    /// Wraps a storage backend as an index file.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends one entry.
    pub fn append(&self, entry: &IndexFileEntry) -> StoreResult<()> {
        self.backend.append(&entry.encode())?;
        Ok(())
    }

    /// Forces appended entries to durable storage.
    pub fn sync(&self) -> StoreResult<()> {
        self.backend.sync_data()?;
        Ok(())
    }

    /// Returns an iterator over `(offset, entry)` pairs in write order.
    pub fn iter(&self) -> StoreResult<IndexFileIter<'_>> {
        Ok(IndexFileIter {
            backend: self.backend.as_ref(),
            offset: 0,
            size: self.backend.size()?,
            failed: false,
        })
    }
}

impl std::fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFile").finish_non_exhaustive()
    }
}

/// Iterator over an index file's entries.
///
/// Yields at most one `Err`; iteration stops after it.
pub struct IndexFileIter<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    size: u64,
    failed: bool,
}

impl IndexFileIter<'_> {
    fn read_entry(&mut self) -> StoreResult<IndexFileEntry> {
        let header = self
            .backend
            .read_at(self.offset, INDEX_HEADER_SIZE)
            .map_err(|_| StoreError::corruption("index entry header truncated"))?;

        let key_len = header[0] as usize;
        let total = INDEX_HEADER_SIZE + key_len;

        let bytes = self
            .backend
            .read_at(self.offset, total)
            .map_err(|_| StoreError::corruption("index entry key truncated"))?;

        let entry = IndexFileEntry::decode(&bytes)?;
        self.offset += total as u64;
        Ok(entry)
    }
}

impl Iterator for IndexFileIter<'_> {
    type Item = StoreResult<(u64, IndexFileEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.size {
            return None;
        }

        let entry_offset = self.offset;
        match self.read_entry() {
            Ok(entry) => Some(Ok((entry_offset, entry))),
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
    use crate::segment::record::RecordFlags;
    use crate::types::SequenceNumber;
    use cinderdb_storage::InMemoryBackend;

    fn entry(key: &[u8], offset: u32, seq: u64) -> IndexFileEntry {
        IndexFileEntry {
            key: key.to_vec(),
            record_size: (crate::segment::record::DATA_HEADER_SIZE + key.len() + 8) as u32,
            record_offset: offset,
            sequence: SequenceNumber::new(seq),
            flags: RecordFlags::NONE,
        }
    }

    #[test]
    fn append_and_iterate() {
        let file = IndexFile::new(Box::new(InMemoryBackend::new()));

        let e1 = entry(b"a", 0, 1);
        let e2 = entry(b"bb", 30, 2);
        file.append(&e1).unwrap();
        file.append(&e2).unwrap();

        let entries: Vec<_> = file.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 0);
        assert_eq!(entries[0].1, e1);
        assert_eq!(entries[1].0, e1.size() as u64);
        assert_eq!(entries[1].1, e2);
    }

    #[test]
    fn empty_file_iterates_nothing() {
        let file = IndexFile::new(Box::new(InMemoryBackend::new()));
        assert_eq!(file.iter().unwrap().count(), 0);
    }

    #[test]
    fn truncated_tail_yields_single_error() {
        let e = entry(b"key", 0, 1);
        let mut bytes = e.encode();
        bytes.extend_from_slice(&e.encode()[..10]); // half an entry

        let file = IndexFile::new(Box::new(InMemoryBackend::with_data(bytes)));
        let results: Vec<_> = file.iter().unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn unparseable_entry_stops_iteration() {
        let e = entry(b"key", 0, 1);
        let mut bytes = e.encode();
        let mut bad = e.encode();
        bad[1..5].copy_from_slice(&1u32.to_le_bytes()); // record_size too small
        bytes.extend_from_slice(&bad);
        bytes.extend_from_slice(&e.encode()); // never reached

        let file = IndexFile::new(Box::new(InMemoryBackend::with_data(bytes)));
        let results: Vec<_> = file.iter().unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
