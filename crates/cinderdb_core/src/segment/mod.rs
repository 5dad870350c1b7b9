//! Segmented log: on-disk entry formats, data segments, index files, and
//! the tombstone log.

mod file;
mod index;
mod record;
mod tombstone;

pub use file::SegmentFile;
pub use index::{IndexFile, IndexFileIter};
pub use record::{
    compute_crc32, compute_crc32_pair, value_offset, IndexFileEntry, Record, RecordFlags,
    TombstoneEntry, DATA_HEADER_SIZE, INDEX_HEADER_SIZE, MAX_KEY_SIZE, TOMBSTONE_HEADER_SIZE,
};
pub use tombstone::{TombstoneFile, TombstoneFileIter};
