//! Core type definitions for cinderdb.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier for a segment or tombstone file.
///
/// File ids are positive, monotonically allocated, and unique within the
/// lifetime of a store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a new file id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Sequence number ordering every written record and tombstone.
///
/// Of two records for the same key, the one with the larger sequence
/// number is newer. Sequence numbers are strictly monotonic across the
/// store, including across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Fixed-width directory value: where a key's current record lives.
///
/// This is the value type stored per key in the key directory. It is
/// `Copy` and has no per-entry heap allocation, which keeps directory
/// memory predictable when it holds millions of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Segment file holding the record.
    pub file_id: FileId,
    /// Offset of the value bytes within the data file.
    pub value_offset: u32,
    /// Length of the value bytes.
    pub value_size: u32,
    /// Sequence number of the record.
    pub sequence: SequenceNumber,
}

/// Allocator for store-wide strictly monotonic sequence numbers.
///
/// Sourced from the wall clock in nanoseconds, with an atomic bump past
/// the previous allocation when two writers observe the same tick. Seeded
/// past the maximum recovered sequence number at open so ordering also
/// holds across restarts.
#[derive(Debug)]
pub struct SequenceAllocator {
    last: AtomicU64,
}

impl SequenceAllocator {
    /// Creates an allocator that will only hand out values above `floor`.
    #[must_use]
    pub fn new(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Returns the next sequence number, strictly greater than any
    /// previously returned by this allocator.
    pub fn next(&self) -> SequenceNumber {
        let now = Self::clock_nanos();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return SequenceNumber::new(next),
                Err(observed) => prev = observed,
            }
        }
    }

    fn clock_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}
