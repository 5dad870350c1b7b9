//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level, append-only storage backend.
///
/// Backends are opaque byte stores. The layer above owns all file format
/// interpretation; a backend only guarantees that bytes come back exactly
/// as they were appended.
///
/// # Invariants
///
/// - `append` returns the offset where the data was written, and offsets
///   are dense: the next append lands at `offset + data.len()`.
/// - `read_at` returns exactly the bytes previously appended at that range.
/// - Reads never block other reads; a backend must be usable from many
///   reader threads while a single logical writer appends.
/// - After `sync_data` returns, previously appended bytes survive process
///   termination.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size, or with `Io` on an underlying failure.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data, returning the offset where it was written.
    ///
    /// Appends are atomic with respect to `size`: a reader that observes a
    /// size covering the appended range will read the full bytes.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes userspace buffers to the operating system.
    fn flush(&self) -> StorageResult<()>;

    /// Forces appended contents to durable storage, without file metadata.
    fn sync_data(&self) -> StorageResult<()>;

    /// Forces contents and metadata to durable storage.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size in bytes: the offset of the next append.
    fn size(&self) -> StorageResult<u64>;
}
