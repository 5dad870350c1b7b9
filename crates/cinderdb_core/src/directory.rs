//! The key directory: in-memory mapping from key bytes to the on-disk
//! location of the key's current record.
//!
//! The directory is the store's single point of truth for liveness. It is
//! shared by three roles: readers (`get`), the writer (`put`/`remove`),
//! and the compactor (`replace`, an atomic compare-and-swap used to hand
//! records off to their rewritten location without ever owning entries).
//!
//! ## Backing table
//!
//! [`KeyDirectory`] is a thin facade over a sharded hash table. The value
//! type, [`RecordMetadata`], is a fixed-width `Copy` struct, so per-entry
//! memory stays flat as the directory grows to millions of keys. Shard
//! count is a power of two at least twice the available hardware
//! parallelism; per-shard capacity is pre-sized from the expected record
//! count so inserts don't rehash during normal operation.
//!
//! Any table with fixed-width values, per-key linearizability, and
//! CAS-on-value satisfies the directory contract; the mutex-per-shard
//! table here is the in-process rendition.

use crate::types::RecordMetadata;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::thread;

/// In-memory key directory with atomic per-key operations.
pub struct KeyDirectory {
    shards: Box<[Mutex<HashMap<Box<[u8]>, RecordMetadata>>]>,
    mask: u64,
}

impl KeyDirectory {
    /// Creates a directory sized for `number_of_records` keys.
    ///
    /// `shard_override` must be a power of two; when `None`, the shard
    /// count is the next power of two at or above twice the available
    /// hardware parallelism.
    #[must_use]
    pub fn new(number_of_records: usize, shard_override: Option<usize>) -> Self {
        let shard_count = shard_override.unwrap_or_else(|| {
            let parallelism = thread::available_parallelism().map_or(4, usize::from);
            (parallelism * 2).next_power_of_two()
        });

        let capacity = number_of_records.div_ceil(shard_count);
        let shards: Vec<_> = (0..shard_count)
            .map(|_| Mutex::new(HashMap::with_capacity(capacity)))
            .collect();

        Self {
            shards: shards.into_boxed_slice(),
            mask: (shard_count - 1) as u64,
        }
    }

    fn shard(&self, key: &[u8]) -> &Mutex<HashMap<Box<[u8]>, RecordMetadata>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() & self.mask) as usize]
    }

    /// Returns the metadata for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<RecordMetadata> {
        self.shard(key).lock().get(key).copied()
    }

    /// Unconditionally inserts or replaces the metadata for `key`.
    pub fn put(&self, key: &[u8], metadata: RecordMetadata) {
        self.shard(key).lock().insert(key.into(), metadata);
    }

    /// Removes `key`, returning the metadata it mapped to.
    pub fn remove(&self, key: &[u8]) -> Option<RecordMetadata> {
        self.shard(key).lock().remove(key)
    }

    /// Compare-and-swap: replaces the metadata for `key` with `new` iff
    /// the current metadata equals `expected`. Returns whether the swap
    /// happened.
    pub fn replace(&self, key: &[u8], expected: &RecordMetadata, new: RecordMetadata) -> bool {
        let mut shard = self.shard(key).lock();
        match shard.get_mut(key) {
            Some(current) if current == expected => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    /// Checks whether `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Checks whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Releases the directory's entries eagerly.
    pub fn close(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.clear();
            shard.shrink_to_fit();
        }
    }
}

impl std::fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirectory")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
