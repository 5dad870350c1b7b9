//! Crash recovery: rebuilding the key directory from index and tombstone
//! files at open.
//!
//! Index files are replayed in ascending file-id order, and entries
//! within a file in write order. Newer records carry larger sequence
//! numbers, so comparing sequences decides every collision regardless of
//! replay order — which is also what makes an interrupted compaction
//! safe: a fully-written destination entry has the same sequence number
//! as its source and sits in a higher-numbered file, and an equal
//! sequence never displaces the entry already installed.
//!
//! A corrupted entry truncates that file's scan (the remainder is
//! skipped); recovery continues with the next file.

use crate::dir::StoreDir;
use crate::directory::KeyDirectory;
use crate::error::StoreResult;
use crate::segment::{SegmentFile, TombstoneFile, DATA_HEADER_SIZE};
use crate::types::{FileId, RecordMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State rebuilt from disk before the store accepts operations.
pub(crate) struct RecoveredState {
    /// Data segments opened for reading, keyed by id.
    pub files: HashMap<FileId, Arc<SegmentFile>>,
    /// Stale byte counters reconstructed from superseded index entries.
    pub stale: HashMap<FileId, u64>,
    /// Largest sequence number seen; seeds the sequence allocator.
    pub max_sequence: u64,
    /// Largest file id seen; seeds the file-id allocator.
    pub max_file_id: u32,
}

/// Scans the store directory and rebuilds the directory and stale
/// accounting.
pub(crate) fn recover(dir: &StoreDir, directory: &KeyDirectory) -> StoreResult<RecoveredState> {
    let mut files = HashMap::new();
    let mut max_file_id = 0u32;

    for id in dir.list_data_file_ids()? {
        let segment = SegmentFile::open_for_reading(dir, id)?;
        files.insert(id, Arc::new(segment));
        max_file_id = max_file_id.max(id.as_u32());
    }

    let index_ids = dir.list_index_file_ids()?;
    info!(
        data_files = files.len(),
        index_files = index_ids.len(),
        "scanning index files to rebuild the key directory"
    );

    // An index file can outlive its data file (a crash between the two
    // unlinks); its id must still be fenced off from reallocation.
    for id in &index_ids {
        max_file_id = max_file_id.max(id.as_u32());
    }

    let mut stale: HashMap<FileId, u64> = HashMap::new();
    let mut max_sequence = 0u64;

    for id in index_ids {
        let Some(segment) = files.get(&id) else {
            warn!(%id, "index file has no data file, skipping");
            continue;
        };

        let mut scanned = 0usize;
        let mut applied = 0usize;

        for result in segment.index_file().iter()? {
            let (_, entry) = match result {
                Ok(item) => item,
                Err(e) => {
                    warn!(%id, error = %e, "corrupt index entry, truncating scan of this file");
                    break;
                }
            };

            scanned += 1;
            max_sequence = max_sequence.max(entry.sequence.as_u64());

            let metadata = RecordMetadata {
                file_id: id,
                value_offset: entry.value_offset(),
                value_size: entry.value_size(),
                sequence: entry.sequence,
            };

            match directory.get(&entry.key) {
                None => {
                    directory.put(&entry.key, metadata);
                    applied += 1;
                }
                Some(existing) if existing.sequence < entry.sequence => {
                    directory.put(&entry.key, metadata);
                    let superseded = (entry.key.len() + DATA_HEADER_SIZE) as u64
                        + u64::from(existing.value_size);
                    *stale.entry(existing.file_id).or_insert(0) += superseded;
                    applied += 1;
                }
                Some(_) => {}
            }
        }

        debug!(%id, scanned, applied, "scanned index file");
    }

    let tombstone_ids = dir.list_tombstone_file_ids()?;
    info!(
        tombstone_files = tombstone_ids.len(),
        "scanning tombstone files"
    );

    for id in tombstone_ids {
        max_file_id = max_file_id.max(id.as_u32());

        let file = TombstoneFile::open_for_reading(dir, id)?;
        let mut scanned = 0usize;
        let mut removed = 0usize;

        for result in file.iter()? {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(%id, error = %e, "corrupt tombstone entry, truncating scan of this file");
                    break;
                }
            };

            scanned += 1;
            max_sequence = max_sequence.max(entry.sequence.as_u64());

            if let Some(existing) = directory.get(&entry.key) {
                if existing.sequence < entry.sequence {
                    directory.remove(&entry.key);
                    removed += 1;
                }
            }
        }

        debug!(%id, scanned, removed, "scanned tombstone file");
    }

    info!(live_keys = directory.len(), "recovery complete");

    Ok(RecoveredState {
        files,
        stale,
        max_sequence,
        max_file_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Record, TombstoneEntry};
    use crate::types::SequenceNumber;
    use tempfile::tempdir;

    fn write_segment(dir: &StoreDir, id: u32, records: &[(&[u8], &[u8], u64)]) {
        let segment = SegmentFile::create(dir, FileId::new(id)).unwrap();
        for (key, value, seq) in records {
            let record = Record::new(key.to_vec(), value.to_vec(), SequenceNumber::new(*seq));
            segment.append(&record).unwrap();
        }
        segment.force(true).unwrap();
    }

    fn write_tombstones(dir: &StoreDir, id: u32, entries: &[(&[u8], u64)]) {
        let file = TombstoneFile::create(dir, FileId::new(id)).unwrap();
        for (key, seq) in entries {
            file.append(&TombstoneEntry::new(key.to_vec(), SequenceNumber::new(*seq)))
                .unwrap();
        }
        file.sync().unwrap();
    }

    #[test]
    fn rebuilds_latest_entries() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        write_segment(&dir, 1, &[(b"a", b"old", 1), (b"b", b"bee", 2)]);
        write_segment(&dir, 2, &[(b"a", b"new", 3)]);

        let directory = KeyDirectory::new(64, Some(2));
        let state = recover(&dir, &directory).unwrap();

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get(b"a").unwrap().file_id, FileId::new(2));
        assert_eq!(directory.get(b"b").unwrap().file_id, FileId::new(1));
        assert_eq!(state.max_sequence, 3);
        assert_eq!(state.max_file_id, 2);

        // The superseded "a" record in file 1 is accounted stale.
        let expected = (1 + DATA_HEADER_SIZE + 3) as u64;
        assert_eq!(state.stale.get(&FileId::new(1)), Some(&expected));
    }

    #[test]
    fn older_record_replayed_later_is_ignored() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        // The newer record sits in the lower-numbered file, as it does
        // after a compaction that copied it forward was interrupted.
        write_segment(&dir, 1, &[(b"k", b"newer", 10)]);
        write_segment(&dir, 2, &[(b"k", b"older", 5)]);

        let directory = KeyDirectory::new(64, Some(2));
        let state = recover(&dir, &directory).unwrap();

        assert_eq!(directory.get(b"k").unwrap().file_id, FileId::new(1));
        assert!(state.stale.is_empty());
    }

    #[test]
    fn equal_sequence_does_not_displace() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        // A completed compaction copy: same record, same sequence, two files.
        write_segment(&dir, 1, &[(b"k", b"v", 7)]);
        write_segment(&dir, 2, &[(b"k", b"v", 7)]);

        let directory = KeyDirectory::new(64, Some(2));
        recover(&dir, &directory).unwrap();

        assert_eq!(directory.get(b"k").unwrap().file_id, FileId::new(1));
    }

    #[test]
    fn tombstones_remove_older_entries() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        write_segment(&dir, 1, &[(b"dead", b"v", 1), (b"live", b"v", 2)]);
        write_tombstones(&dir, 2, &[(b"dead", 5)]);

        let directory = KeyDirectory::new(64, Some(2));
        let state = recover(&dir, &directory).unwrap();

        assert_eq!(directory.len(), 1);
        assert!(directory.get(b"dead").is_none());
        assert!(directory.get(b"live").is_some());
        assert_eq!(state.max_sequence, 5);
        assert_eq!(state.max_file_id, 2);
    }

    #[test]
    fn tombstone_older_than_record_is_ignored() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        // Deleted, then written again with a later sequence.
        write_segment(&dir, 1, &[(b"k", b"rewritten", 9)]);
        write_tombstones(&dir, 2, &[(b"k", 4)]);

        let directory = KeyDirectory::new(64, Some(2));
        recover(&dir, &directory).unwrap();

        assert_eq!(directory.len(), 1);
        assert!(directory.get(b"k").is_some());
    }

    #[test]
    fn corrupt_index_tail_truncates_that_file_only() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        write_segment(&dir, 1, &[(b"a", b"1", 1)]);
        // Append garbage to file 1's index.
        {
            use cinderdb_storage::{FileBackend, StorageBackend};
            let index = FileBackend::open(&dir.index_file_path(FileId::new(1))).unwrap();
            index.append(&[0xFF; 7]).unwrap();
        }
        write_segment(&dir, 2, &[(b"b", b"2", 2)]);

        let directory = KeyDirectory::new(64, Some(2));
        recover(&dir, &directory).unwrap();

        // Entry before the corruption survives; the next file is scanned.
        assert_eq!(directory.len(), 2);
        assert!(directory.get(b"a").is_some());
        assert!(directory.get(b"b").is_some());
    }

    #[test]
    fn orphan_index_file_fences_its_id() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        // A crash between the two unlinks of a segment delete leaves the
        // index file behind.
        write_segment(&dir, 5, &[(b"k", b"v", 1)]);
        std::fs::remove_file(dir.data_file_path(FileId::new(5))).unwrap();

        let directory = KeyDirectory::new(64, Some(2));
        let state = recover(&dir, &directory).unwrap();

        assert!(directory.is_empty());
        assert_eq!(state.max_file_id, 5);
    }

    #[test]
    fn empty_directory_recovers_empty() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        let directory = KeyDirectory::new(64, Some(2));
        let state = recover(&dir, &directory).unwrap();

        assert!(directory.is_empty());
        assert!(state.files.is_empty());
        assert_eq!(state.max_sequence, 0);
        assert_eq!(state.max_file_id, 0);
    }
}
