//! Store core: the write, read, and delete paths, stale-data accounting,
//! and segment lifecycle.
//!
//! ## Concurrency
//!
//! Writers (`put`, `delete`) are serialized by a store-level mutex; only
//! one writer advances the current write segment's offset at a time.
//! Readers take no locks beyond a brief file-map read: a directory lookup
//! plus a retry when the compactor has deleted the looked-up file covers
//! the read path. The compactor runs on its own thread and hands records
//! off through the directory's compare-and-swap, never owning entries.
//!
//! ## Stale accounting
//!
//! Every overwrite or delete adds the superseded record's on-disk size to
//! its file's stale counter. When a file's stale bytes reach
//! `merge_threshold_per_file` of its size, the file is promoted to the
//! merge candidate set and its counter cleared, so a file is promoted
//! exactly once per crossing.

use crate::compaction::CompactionManager;
use crate::config::Options;
use crate::dir::StoreDir;
use crate::directory::KeyDirectory;
use crate::error::{StoreError, StoreResult};
use crate::recovery;
use crate::segment::{
    Record, SegmentFile, TombstoneEntry, TombstoneFile, DATA_HEADER_SIZE, MAX_KEY_SIZE,
};
use crate::stats::{Operation, StoreStats};
use crate::types::{FileId, RecordMetadata, SequenceAllocator};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Bound on directory re-lookups when a `get` misses the file map. The
/// compactor completes its directory hand-off before deleting a source
/// file, so one re-lookup is sufficient; the second attempt is slack.
const GET_RETRIES: usize = 2;

/// An embedded, log-structured key-value store.
///
/// All writes append to rolling segment files; an in-memory directory
/// maps each live key to the exact on-disk location of its current value;
/// a background compactor reclaims space from files whose live fraction
/// has decayed.
///
/// # Example
///
/// ```no_run
/// use cinderdb_core::{Options, Store};
/// use std::path::Path;
///
/// let store = Store::open(Path::new("my_store"), Options::default())?;
/// store.put(b"key", b"value")?;
/// assert_eq!(store.get(b"key")?, Some(b"value".to_vec()));
/// store.close()?;
/// # Ok::<(), cinderdb_core::StoreError>(())
/// ```
pub struct Store {
    inner: Arc<StoreInner>,
    compactor: Mutex<Option<CompactionManager>>,
}

impl Store {
    /// Opens a store, rebuilding the key directory from the index and
    /// tombstone files before accepting operations.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for out-of-range options
    /// - `Locked` when another process holds the directory lock
    /// - `Io` / `Storage` on filesystem failures
    pub fn open(path: impl AsRef<Path>, options: Options) -> StoreResult<Self> {
        options.validate()?;

        let dir = StoreDir::open(path.as_ref(), options.create_if_missing)?;
        let directory = KeyDirectory::new(options.number_of_records, options.index_shards);

        let recovered = recovery::recover(&dir, &directory)?;

        let next_file_id = AtomicU32::new(recovered.max_file_id + 1);
        let sequences = SequenceAllocator::new(recovered.max_sequence);

        let inner = StoreInner {
            options,
            dir,
            directory,
            files: RwLock::new(recovered.files),
            current: RwLock::new(None),
            tombstones: Mutex::new(None),
            stale: Mutex::new(recovered.stale),
            candidates: Mutex::new(BTreeSet::new()),
            sequences,
            next_file_id,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            stats: StoreStats::new(),
        };

        // Fresh write segment and tombstone log, created after recovery so
        // they carry ids above everything replayed.
        let write_segment = inner.create_write_segment()?;
        *inner.current.write() = Some(write_segment);

        let tombstone_id = inner.allocate_file_id();
        let tombstones = TombstoneFile::create(&inner.dir, tombstone_id)?;
        *inner.tombstones.lock() = Some(tombstones);

        let inner = Arc::new(inner);

        info!(
            path = %path.as_ref().display(),
            live_keys = inner.directory.len(),
            "opened store"
        );
        info!(
            max_file_size = inner.options.max_file_size,
            merge_disabled = inner.options.merge_disabled,
            merge_job_interval = ?inner.options.merge_job_interval,
            merge_threshold_per_file = inner.options.merge_threshold_per_file,
            merge_threshold_file_number = inner.options.merge_threshold_file_number,
            "store options"
        );

        let compactor = if inner.options.merge_disabled {
            None
        } else {
            Some(CompactionManager::start(Arc::clone(&inner))?)
        };

        Ok(Self {
            inner,
            compactor: Mutex::new(compactor),
        })
    }

    /// Writes a key-value pair.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` when the key exceeds 127 bytes
    /// - `Closed` after `close`
    /// - `Io` / `Storage` on append failure; the directory is untouched
    pub fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let start = Instant::now();
        self.inner.ensure_open()?;

        if key.len() > MAX_KEY_SIZE {
            return Err(StoreError::invalid_argument(format!(
                "key length {} exceeds maximum {MAX_KEY_SIZE}",
                key.len()
            )));
        }

        {
            let _writer = self.inner.write_lock.lock();

            let sequence = self.inner.sequences.next();
            let record = Record::new(key.to_vec(), value.to_vec(), sequence);
            let metadata = self.inner.append_record(&record)?;

            // Account the record this one supersedes before the directory
            // forgets it.
            if let Some(previous) = self.inner.directory.get(key) {
                self.inner.update_stale(key.len(), &previous);
            }
            self.inner.directory.put(key, metadata);

            self.inner.stats.record_put(u64::from(record.size()));
        }

        self.inner
            .options
            .metrics
            .observe(Operation::Put, start.elapsed().as_nanos() as u64);
        Ok(())
    }

    /// Reads the current value for a key, or `None` if absent.
    ///
    /// # Errors
    ///
    /// - `Closed` after `close`
    /// - `ChecksumMismatch` / `Corruption` when the record fails
    ///   verification (fatal to this call, not to the store)
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let start = Instant::now();
        self.inner.ensure_open()?;

        let Some(mut metadata) = self.inner.directory.get(key) else {
            return Ok(None);
        };

        for _ in 0..GET_RETRIES {
            let segment = self.inner.files.read().get(&metadata.file_id).cloned();

            let Some(segment) = segment else {
                // The compactor deleted this file after our lookup; it
                // finished the directory hand-off first, so looking up
                // again finds the rewritten location.
                debug!(id = %metadata.file_id, "file missing during read, retrying lookup");
                match self.inner.directory.get(key) {
                    Some(fresh) => {
                        metadata = fresh;
                        continue;
                    }
                    None => return Ok(None),
                }
            };

            let record_offset = metadata.value_offset - (DATA_HEADER_SIZE + key.len()) as u32;
            let record_size = (DATA_HEADER_SIZE + key.len()) as u32 + metadata.value_size;
            let record = segment.read_record(record_offset, record_size)?;

            self.inner.stats.record_get(u64::from(metadata.value_size));
            self.inner
                .options
                .metrics
                .observe(Operation::Get, start.elapsed().as_nanos() as u64);
            return Ok(Some(record.value));
        }

        Err(StoreError::corruption(format!(
            "directory references {} which is not in the file map",
            metadata.file_id
        )))
    }

    /// Deletes a key. A no-op if the key is absent.
    ///
    /// # Errors
    ///
    /// - `Closed` after `close`
    /// - `Io` / `Storage` on tombstone append failure
    pub fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let start = Instant::now();
        self.inner.ensure_open()?;

        {
            let _writer = self.inner.write_lock.lock();

            if let Some(previous) = self.inner.directory.remove(key) {
                let sequence = self.inner.sequences.next();
                let entry = TombstoneEntry::new(key.to_vec(), sequence);
                self.inner.append_tombstone(&entry)?;
                self.inner.update_stale(key.len(), &previous);
                self.inner.stats.record_delete();
            }
        }

        self.inner
            .options
            .metrics
            .observe(Operation::Delete, start.elapsed().as_nanos() as u64);
        Ok(())
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.directory.len()
    }

    /// Reports the stale fraction of each file with a nonzero stale
    /// counter, ascending by file id.
    #[must_use]
    pub fn stale_ratios(&self) -> Vec<(FileId, f64)> {
        let stale = self.inner.stale.lock();
        let files = self.inner.files.read();

        let mut ratios: Vec<_> = stale
            .iter()
            .map(|(id, bytes)| {
                let size = files
                    .get(id)
                    .map_or(self.inner.options.max_file_size, |f| f.write_offset().max(1));
                (*id, *bytes as f64 / size as f64)
            })
            .collect();
        ratios.sort_by_key(|(id, _)| *id);
        ratios
    }

    /// Returns the store's operation counters.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.inner.stats
    }

    /// Shared state, for tests elsewhere in the crate.
    #[cfg(test)]
    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    /// Stops the compactor and closes all files. Idempotent; operations
    /// after the first `close` fail with [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(manager) = self.compactor.lock().take() {
            manager.stop();
        }

        if let Some(current) = self.inner.current.read().clone() {
            current.force(true)?;
        }
        if let Some(tombstones) = self.inner.tombstones.lock().as_ref() {
            tombstones.sync()?;
        }

        self.inner.directory.close();
        self.inner.files.write().clear();

        info!("closed store");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Shared state behind the public handle. The compactor holds a
/// back-reference to this to read segments and CAS the directory; it
/// never owns directory entries.
pub(crate) struct StoreInner {
    pub(crate) options: Options,
    pub(crate) dir: StoreDir,
    pub(crate) directory: KeyDirectory,
    /// Segment lookup by id. Readers look up by id; the writer inserts on
    /// create; the compactor removes on delete. A missed lookup is
    /// retriable through the directory.
    pub(crate) files: RwLock<HashMap<FileId, Arc<SegmentFile>>>,
    /// The current write segment. `None` only during open and after close.
    pub(crate) current: RwLock<Option<Arc<SegmentFile>>>,
    tombstones: Mutex<Option<TombstoneFile>>,
    stale: Mutex<HashMap<FileId, u64>>,
    pub(crate) candidates: Mutex<BTreeSet<FileId>>,
    sequences: SequenceAllocator,
    next_file_id: AtomicU32,
    write_lock: Mutex<()>,
    closed: AtomicBool,
    pub(crate) stats: StoreStats,
}

impl StoreInner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    pub(crate) fn allocate_file_id(&self) -> FileId {
        FileId::new(self.next_file_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Id of the current write segment; the compactor must never drain it.
    pub(crate) fn current_write_file_id(&self) -> Option<FileId> {
        self.current.read().as_ref().map(|s| s.id())
    }

    fn create_write_segment(&self) -> StoreResult<Arc<SegmentFile>> {
        let id = self.allocate_file_id();
        let segment = Arc::new(SegmentFile::create(&self.dir, id)?);
        self.files.write().insert(id, Arc::clone(&segment));
        self.stats.record_segment_created();
        Ok(segment)
    }

    /// Appends a record to the current write segment, rolling over first
    /// when the record would overflow `max_file_size`. Called with the
    /// writer lock held.
    fn append_record(&self, record: &Record) -> StoreResult<RecordMetadata> {
        let current = self
            .current
            .read()
            .clone()
            .ok_or(StoreError::Closed)?;

        // An empty segment is never sealed; an oversized record simply
        // overflows it.
        let segment = if current.write_offset() > 0
            && current.write_offset() + u64::from(record.size()) > self.options.max_file_size
        {
            let fresh = self.create_write_segment()?;
            debug!(old = %current.id(), new = %fresh.id(), "rolled over write segment");
            *self.current.write() = Some(Arc::clone(&fresh));
            fresh
        } else {
            current
        };

        let metadata = segment.append(record)?;
        if self.options.sync_on_put {
            segment.force(false)?;
        }
        Ok(metadata)
    }

    /// Appends a tombstone, rolling the tombstone log over first when the
    /// entry would overflow `max_file_size`. Called with the writer lock
    /// held.
    fn append_tombstone(&self, entry: &TombstoneEntry) -> StoreResult<()> {
        let mut guard = self.tombstones.lock();
        let log = guard.as_mut().ok_or(StoreError::Closed)?;

        if log.write_offset() > 0
            && log.write_offset() + u64::from(entry.size()) > self.options.max_file_size
        {
            let id = self.allocate_file_id();
            let fresh = TombstoneFile::create(&self.dir, id)?;
            debug!(old = %log.id(), new = %id, "rolled over tombstone log");
            *log = fresh;
        }

        log.append(entry)
    }

    /// Adds a superseded record's bytes to its file's stale counter and
    /// promotes the file to the merge candidate set when the stale
    /// fraction crosses the threshold. The counter is cleared on
    /// promotion so each crossing promotes exactly once.
    pub(crate) fn update_stale(&self, key_len: usize, previous: &RecordMetadata) {
        let added = (key_len + DATA_HEADER_SIZE) as u64 + u64::from(previous.value_size);

        let mut stale = self.stale.lock();
        let total = {
            let counter = stale.entry(previous.file_id).or_insert(0);
            *counter += added;
            *counter
        };

        let file_size = self
            .files
            .read()
            .get(&previous.file_id)
            .map(|f| f.write_offset());

        match file_size {
            Some(size)
                if size > 0
                    && total as f64 >= size as f64 * self.options.merge_threshold_per_file =>
            {
                stale.remove(&previous.file_id);
                self.candidates.lock().insert(previous.file_id);
                debug!(
                    id = %previous.file_id,
                    stale_bytes = total,
                    file_size = size,
                    "segment became a merge candidate"
                );
            }
            Some(_) => {}
            None => {
                // Already compacted away; nothing left to account.
                stale.remove(&previous.file_id);
            }
        }
    }

    pub(crate) fn enough_candidates(&self) -> bool {
        self.candidates.lock().len() >= self.options.merge_threshold_file_number
    }

    /// Drains up to `merge_threshold_file_number` candidate ids, skipping
    /// (and retaining) the current write segment's id.
    pub(crate) fn drain_merge_candidates(&self) -> Vec<FileId> {
        let current_id = self.current_write_file_id();
        let mut candidates = self.candidates.lock();

        let drained: Vec<FileId> = candidates
            .iter()
            .copied()
            .filter(|id| Some(*id) != current_id)
            .take(self.options.merge_threshold_file_number)
            .collect();

        for id in &drained {
            candidates.remove(id);
        }
        drained
    }

    /// Removes a compacted source segment: file map, disk, stale counter.
    pub(crate) fn delete_segment(&self, id: FileId) -> StoreResult<()> {
        let removed = self.files.write().remove(&id);
        if let Some(segment) = removed {
            segment.delete()?;
            self.dir.sync_directory()?;
        }
        self.stale.lock().remove(&id);
        self.stats.record_segment_compacted();
        info!(%id, "deleted compacted segment");
        Ok(())
    }
}
