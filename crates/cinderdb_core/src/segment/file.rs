//! Data segments: an append-only data file paired with an index file.

use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::segment::index::IndexFile;
use crate::segment::record::{value_offset, IndexFileEntry, Record};
use crate::types::{FileId, RecordMetadata};
use cinderdb_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A segment: data file plus paired index file sharing one id.
///
/// The write offset is private to the segment; readers only ever see
/// bytes below it, so every record a reader can reach is fully written.
/// Appends are serialized by the store's writer lock; reads and appends
/// run concurrently.
pub struct SegmentFile {
    id: FileId,
    data: Box<dyn StorageBackend>,
    index: IndexFile,
    write_offset: AtomicU64,
    data_path: Option<PathBuf>,
    index_path: Option<PathBuf>,
}

impl SegmentFile {
    /// Creates a new empty segment in the store directory.
    pub fn create(dir: &StoreDir, id: FileId) -> StoreResult<Self> {
        let data_path = dir.data_file_path(id);
        let index_path = dir.index_file_path(id);

        let data = FileBackend::create_new(&data_path)?;
        let index = FileBackend::create_new(&index_path)?;
        dir.sync_directory()?;

        debug!(%id, "created segment");

        Ok(Self {
            id,
            data: Box::new(data),
            index: IndexFile::new(Box::new(index)),
            write_offset: AtomicU64::new(0),
            data_path: Some(data_path),
            index_path: Some(index_path),
        })
    }

    /// Opens an existing segment for reading.
    ///
    /// The write offset is initialized to the data file's size. A missing
    /// index file is tolerated as empty (a crash can land between the two
    /// file creations).
    pub fn open_for_reading(dir: &StoreDir, id: FileId) -> StoreResult<Self> {
        let data_path = dir.data_file_path(id);
        let index_path = dir.index_file_path(id);

        let data = FileBackend::open_read_only(&data_path)?;
        let index = FileBackend::open(&index_path)?;

        let size = data.size()?;

        Ok(Self {
            id,
            data: Box::new(data),
            index: IndexFile::new(Box::new(index)),
            write_offset: AtomicU64::new(size),
            data_path: Some(data_path),
            index_path: Some(index_path),
        })
    }

    /// Builds a segment over arbitrary backends, for tests.
    #[must_use]
    pub fn from_backends(
        id: FileId,
        data: Box<dyn StorageBackend>,
        index: Box<dyn StorageBackend>,
    ) -> Self {
        let size = data.size().unwrap_or(0);
        Self {
            id,
            data,
            index: IndexFile::new(index),
            write_offset: AtomicU64::new(size),
            data_path: None,
            index_path: None,
        }
    }

    /// Returns the segment's file id.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the current write offset: the size of the data file.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Appends a record and its index entry, returning the directory
    /// metadata for the new record.
    ///
    /// The caller serializes appends; concurrent readers are safe.
    pub fn append(&self, record: &Record) -> StoreResult<RecordMetadata> {
        let bytes = record.encode();
        let offset = self.data.append(&bytes)?;

        let entry = IndexFileEntry {
            key: record.key.clone(),
            record_size: bytes.len() as u32,
            record_offset: offset as u32,
            sequence: record.sequence,
            flags: record.flags,
        };
        self.index.append(&entry)?;

        self.write_offset
            .store(offset + bytes.len() as u64, Ordering::Release);

        Ok(RecordMetadata {
            file_id: self.id,
            value_offset: value_offset(offset as u32, record.key.len()),
            value_size: record.value.len() as u32,
            sequence: record.sequence,
        })
    }

    /// Copies pre-encoded record bytes into this segment and writes the
    /// given index entry for them. Used by compaction; the record bytes
    /// are transferred verbatim from the source segment.
    ///
    /// Returns the offset the record landed at.
    pub fn append_raw(&self, record_bytes: &[u8], mut entry: IndexFileEntry) -> StoreResult<u32> {
        let offset = self.data.append(record_bytes)?;

        entry.record_offset = offset as u32;
        self.index.append(&entry)?;

        self.write_offset
            .store(offset + record_bytes.len() as u64, Ordering::Release);

        Ok(offset as u32)
    }

    /// Reads raw value bytes.
    pub fn read_value(&self, value_offset: u32, value_size: u32) -> StoreResult<Vec<u8>> {
        Ok(self
            .data
            .read_at(u64::from(value_offset), value_size as usize)?)
    }

    /// Reads and decodes a full record, verifying its checksum.
    pub fn read_record(&self, record_offset: u32, record_size: u32) -> StoreResult<Record> {
        let bytes = self
            .data
            .read_at(u64::from(record_offset), record_size as usize)?;
        Record::decode(&bytes)
    }

    /// Reads raw record bytes, for compaction's verbatim copy.
    pub fn read_raw(&self, offset: u32, len: u32) -> StoreResult<Vec<u8>> {
        Ok(self.data.read_at(u64::from(offset), len as usize)?)
    }

    /// Returns the paired index file.
    #[must_use]
    pub fn index_file(&self) -> &IndexFile {
        &self.index
    }

    /// Flushes outstanding data to durable storage.
    ///
    /// With `metadata` false this is an fdatasync; with `metadata` true it
    /// also syncs file metadata.
    pub fn force(&self, metadata: bool) -> StoreResult<()> {
        if metadata {
            self.data.sync()?;
        } else {
            self.data.sync_data()?;
        }
        Ok(())
    }

    /// Unlinks the segment's data and index files.
    ///
    /// Open handles stay readable until dropped; the names are gone once
    /// this returns.
    pub fn delete(&self) -> StoreResult<()> {
        debug!(id = %self.id, "deleting segment");
        if let Some(path) = &self.data_path {
            remove_if_exists(path)?;
        }
        if let Some(path) = &self.index_path {
            remove_if_exists(path)?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("id", &self.id)
            .field("write_offset", &self.write_offset())
            .finish_non_exhaustive()
    }
}
