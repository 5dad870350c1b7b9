//! Background compaction: rewriting segments whose live fraction has
//! decayed below the merge threshold.
//!
//! A single worker thread wakes every `merge_job_interval`. When enough
//! candidates have accumulated it drains a batch (never the current write
//! segment), copies each source's fresh records into a fresh destination
//! segment, hands the copied records over through the directory's
//! compare-and-swap, and deletes the drained sources.
//!
//! ## Safety argument
//!
//! For every fresh record the hand-off CAS completes before the source
//! file is deleted, so a reader that misses the file map re-reads the
//! directory and finds the destination. A record superseded between the
//! copy and the CAS simply loses the CAS; the copied bytes stay as dead
//! weight in the destination, which has its own stale accounting.
//!
//! A crash mid-merge is safe: the destination's index entries carry their
//! source sequence numbers, so recovery resolves every key to the right
//! record whether or not the destination was fully written.

use crate::error::StoreResult;
use crate::rate_limiter::RateLimiter;
use crate::segment::{value_offset, SegmentFile};
use crate::store::StoreInner;
use crate::types::{FileId, RecordMetadata};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Owns the compaction worker thread.
pub(crate) struct CompactionManager {
    stop: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl CompactionManager {
    /// Spawns the worker thread.
    pub(crate) fn start(inner: Arc<StoreInner>) -> StoreResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cinderdb-compactor".into())
            .spawn(move || {
                let interval = inner.options.merge_job_interval;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    if !inner.enough_candidates() {
                        continue;
                    }

                    let sources = inner.drain_merge_candidates();
                    if sources.is_empty() {
                        continue;
                    }

                    if let Err(e) = run_merge(&inner, &sources, &thread_stop) {
                        error!(error = %e, "merge run failed");
                    }
                }
            })?;

        Ok(Self {
            stop,
            stop_tx,
            handle,
        })
    }

    /// Signals the worker to stop and joins it. The worker checks the
    /// signal between source files and between records.
    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

/// Copies the fresh records of `sources` into one fresh destination
/// segment and deletes each fully-processed source.
fn run_merge(inner: &Arc<StoreInner>, sources: &[FileId], stop: &AtomicBool) -> StoreResult<()> {
    let start = Instant::now();

    let dest_id = inner.allocate_file_id();
    let dest = Arc::new(SegmentFile::create(&inner.dir, dest_id)?);
    inner.files.write().insert(dest_id, Arc::clone(&dest));
    inner.stats.record_segment_created();

    info!(?sources, dest = %dest_id, "starting merge run");

    let limiter = RateLimiter::new(inner.options.compaction_job_rate);
    let mut unflushed = 0u64;

    for &source_id in sources {
        if stop.load(Ordering::SeqCst) {
            info!("merge run interrupted by shutdown");
            return Ok(());
        }

        let source = inner.files.read().get(&source_id).cloned();
        let Some(source) = source else {
            warn!(id = %source_id, "merge candidate no longer in the file map, skipping");
            continue;
        };

        match copy_fresh_records(inner, &source, &dest, &limiter, &mut unflushed, stop) {
            Ok(true) => inner.delete_segment(source_id)?,
            Ok(false) => {
                info!(id = %source_id, "merge run interrupted by shutdown");
                return Ok(());
            }
            // A failed source is logged and left in place; the next
            // source is still attempted, and partial work in the
            // destination stays readable.
            Err(e) => error!(id = %source_id, error = %e, "error while compacting source"),
        }
    }

    info!(
        dest = %dest_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "completed merge run"
    );
    Ok(())
}

/// Walks one source's index file and copies every fresh record into the
/// destination. Returns `Ok(false)` when interrupted by shutdown.
///
/// A record is fresh iff its directory entry still points at it, or it is
/// an unmatched tombstone.
fn copy_fresh_records(
    inner: &Arc<StoreInner>,
    source: &SegmentFile,
    dest: &SegmentFile,
    limiter: &RateLimiter,
    unflushed: &mut u64,
    stop: &AtomicBool,
) -> StoreResult<bool> {
    for result in source.index_file().iter()? {
        if stop.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let (_, entry) = result?;

        let current = inner.directory.get(&entry.key);
        let live = match current {
            Some(metadata)
                if metadata.file_id == source.id()
                    && metadata.value_offset == entry.value_offset() =>
            {
                Some(metadata)
            }
            // An unmatched tombstone record is carried forward so the
            // deletion it marks survives this file.
            None if entry.flags.is_tombstone() => None,
            _ => continue,
        };

        limiter.acquire(u64::from(entry.record_size));

        let bytes = source.read_raw(entry.record_offset, entry.record_size)?;
        let new_offset = dest.append_raw(&bytes, entry.clone())?;
        inner.stats.record_record_copied();

        *unflushed += u64::from(entry.record_size);
        if let Some(flush_at) = inner.options.flush_data_size_bytes {
            if *unflushed > flush_at {
                dest.force(false)?;
                *unflushed = 0;
            }
        }

        if let Some(old) = live {
            let new_metadata = RecordMetadata {
                file_id: dest.id(),
                value_offset: value_offset(new_offset, entry.key.len()),
                value_size: old.value_size,
                sequence: entry.sequence,
            };
            if !inner.directory.replace(&entry.key, &old, new_metadata) {
                // Concurrently superseded; the copy becomes dead weight
                // in the destination.
                inner.stats.record_cas_loss();
                debug!(id = %source.id(), "record superseded during merge, skipping hand-off");
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::store::Store;
    use std::time::Duration;
    use tempfile::tempdir;

    fn compacting_options() -> Options {
        Options::new()
            .max_file_size(1024)
            .merge_threshold_per_file(0.5)
            .merge_threshold_file_number(2)
            .merge_job_interval(Duration::from_millis(20))
            .flush_data_size_bytes(Some(512))
            .index_shards(4)
            .number_of_records(1024)
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Overwrites `key` enough times to drive several files past the
    /// stale threshold. Records are ~101 bytes against a 1024-byte cap,
    /// so 200 overwrites churn through roughly 20 files.
    fn churn(store: &Store, key: &[u8]) {
        for _ in 0..200 {
            store.put(key, &[0u8; 80]).unwrap();
        }
    }

    #[test]
    fn merge_rewrites_and_deletes_sources() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path(), compacting_options()).unwrap();

        store.put(b"stable", b"untouched").unwrap();
        churn(&store, b"hot");

        assert!(
            wait_until(Duration::from_secs(10), || {
                store.stats().segments_compacted() >= 2
            }),
            "compactor never deleted any source"
        );

        // Every key still reads its latest value.
        assert_eq!(store.get(b"stable").unwrap(), Some(b"untouched".to_vec()));
        assert_eq!(store.get(b"hot").unwrap(), Some(vec![0u8; 80]));

        // Every directory entry points at a file that exists.
        for key in [b"stable".as_slice(), b"hot".as_slice()] {
            let file_id = store.inner().directory.get(key).unwrap().file_id;
            assert!(store.inner().files.read().contains_key(&file_id));
        }

        store.close().unwrap();
    }

    #[test]
    fn merge_never_touches_current_write_segment() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path(), compacting_options()).unwrap();

        churn(&store, b"hot");

        assert!(wait_until(Duration::from_secs(10), || {
            store.stats().segments_compacted() >= 2
        }));

        let current = store.inner().current_write_file_id().unwrap();
        assert!(store.inner().files.read().contains_key(&current));
        store.close().unwrap();
    }

    #[test]
    fn disabled_merge_leaves_candidates_alone() {
        let temp = tempdir().unwrap();
        let store = Store::open(
            temp.path(),
            compacting_options()
                .merge_disabled(true)
                .merge_job_interval(Duration::from_millis(10)),
        )
        .unwrap();

        churn(&store, b"hot");
        thread::sleep(Duration::from_millis(100));

        assert_eq!(store.stats().segments_compacted(), 0);
        assert!(store.inner().candidates.lock().len() >= 2);
        store.close().unwrap();
    }
}
