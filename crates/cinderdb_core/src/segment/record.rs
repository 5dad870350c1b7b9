//! On-disk entry formats: data records, index entries, tombstone entries.
//!
//! All fields are little-endian and the layouts are fixed; a store
//! directory written with one layout must be read with the same layout.
//!
//! ```text
//! data record:     | checksum (4) | key_len (1) | value_len (4) | seq (8) | flags (1) | key | value |
//! index entry:     | key_len (1) | record_size (4) | record_offset (4) | seq (8) | flags (1) | key |
//! tombstone entry: | checksum (4) | key_len (1) | seq (8) | key |
//! ```
//!
//! The data record checksum covers `key ‖ value`; the tombstone checksum
//! covers `seq ‖ key`. Index entries carry no checksum — a malformed entry
//! is detected structurally (key length over [`MAX_KEY_SIZE`], or a record
//! size smaller than its own header and key).
//!
//! Tombstone entries live in their own files with their own smaller
//! header; they are distinguished from data records by file type, not by
//! flag placement.

use crate::error::{StoreError, StoreResult};
use crate::types::SequenceNumber;

/// Maximum key length in bytes. Key length is stored in one byte and kept
/// within the positive signed range.
pub const MAX_KEY_SIZE: usize = 127;

/// Size of a data record header.
pub const DATA_HEADER_SIZE: usize = 18;

/// Size of an index entry header.
pub const INDEX_HEADER_SIZE: usize = 18;

/// Size of a tombstone entry header.
pub const TOMBSTONE_HEADER_SIZE: usize = 13;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

fn crc32_feed(state: u32, data: &[u8]) -> u32 {
    let mut crc = state;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    crc
}

/// Computes the CRC32 (IEEE) of a byte slice.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    !crc32_feed(!0, data)
}

/// Computes the CRC32 (IEEE) of the concatenation of two slices without
/// materializing it.
#[must_use]
pub fn compute_crc32_pair(first: &[u8], second: &[u8]) -> u32 {
    !crc32_feed(crc32_feed(!0, first), second)
}

/// Flags carried by data records and index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFlags(u8);

impl RecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Record marks a deletion.
    pub const TOMBSTONE: Self = Self(0x01);

    /// Creates flags from a raw byte. Reserved bits are preserved.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks whether the tombstone bit is set.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & 0x01 != 0
    }
}

fn check_key_len(key_len: usize) -> StoreResult<()> {
    if key_len > MAX_KEY_SIZE {
        return Err(StoreError::corruption(format!(
            "key length {key_len} exceeds maximum {MAX_KEY_SIZE}"
        )));
    }
    Ok(())
}

/// A record as written to a data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key bytes (at most [`MAX_KEY_SIZE`]).
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
    /// Sequence number assigned at write time.
    pub sequence: SequenceNumber,
    /// Record flags.
    pub flags: RecordFlags,
}

impl Record {
    /// Creates a plain data record.
    #[must_use]
    pub fn new(key: Vec<u8>, value: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self {
            key,
            value,
            sequence,
            flags: RecordFlags::NONE,
        }
    }

    /// Returns the on-disk size of this record.
    #[must_use]
    pub fn size(&self) -> u32 {
        (DATA_HEADER_SIZE + self.key.len() + self.value.len()) as u32
    }

    /// Encodes the record to its on-disk byte form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);

        let crc = compute_crc32_pair(&self.key, &self.value);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.push(self.key.len() as u8);
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        buf
    }

    /// Decodes a record, verifying its checksum.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a truncated or malformed buffer and
    /// `ChecksumMismatch` when the stored checksum does not match the
    /// payload.
    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < DATA_HEADER_SIZE {
            return Err(StoreError::corruption("data record header truncated"));
        }

        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let key_len = data[4] as usize;
        check_key_len(key_len)?;
        let value_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        let sequence = SequenceNumber::new(u64::from_le_bytes([
            data[9], data[10], data[11], data[12], data[13], data[14], data[15], data[16],
        ]));
        let flags = RecordFlags::from_byte(data[17]);

        let total = DATA_HEADER_SIZE + key_len + value_len;
        if data.len() < total {
            return Err(StoreError::corruption("data record payload truncated"));
        }

        let key = data[DATA_HEADER_SIZE..DATA_HEADER_SIZE + key_len].to_vec();
        let value = data[DATA_HEADER_SIZE + key_len..total].to_vec();

        let actual = compute_crc32_pair(&key, &value);
        if actual != stored_crc {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_crc,
                actual,
            });
        }

        Ok(Self {
            key,
            value,
            sequence,
            flags,
        })
    }
}

/// An index entry, written to the paired index file when a record is
/// appended. Allows the key directory to be rebuilt without reading
/// value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFileEntry {
    /// Key bytes.
    pub key: Vec<u8>,
    /// On-disk size of the record in the data file.
    pub record_size: u32,
    /// Offset of the record in the data file.
    pub record_offset: u32,
    /// Sequence number of the record.
    pub sequence: SequenceNumber,
    /// Record flags, mirrored from the data record.
    pub flags: RecordFlags,
}

impl IndexFileEntry {
    /// Returns the on-disk size of this entry.
    #[must_use]
    pub fn size(&self) -> u32 {
        (INDEX_HEADER_SIZE + self.key.len()) as u32
    }

    /// Offset of the record's value bytes within the data file.
    #[must_use]
    pub fn value_offset(&self) -> u32 {
        value_offset(self.record_offset, self.key.len())
    }

    /// Length of the record's value bytes.
    #[must_use]
    pub fn value_size(&self) -> u32 {
        self.record_size - (DATA_HEADER_SIZE + self.key.len()) as u32
    }

    /// Encodes the entry to its on-disk byte form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);

        buf.push(self.key.len() as u8);
        buf.extend_from_slice(&self.record_size.to_le_bytes());
        buf.extend_from_slice(&self.record_offset.to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.key);

        buf
    }

    /// Decodes an entry.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a truncated buffer, an over-long key, or a
    /// record size that cannot hold its own header and key.
    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < INDEX_HEADER_SIZE {
            return Err(StoreError::corruption("index entry header truncated"));
        }

        let key_len = data[0] as usize;
        check_key_len(key_len)?;
        let record_size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let record_offset = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        let sequence = SequenceNumber::new(u64::from_le_bytes([
            data[9], data[10], data[11], data[12], data[13], data[14], data[15], data[16],
        ]));
        let flags = RecordFlags::from_byte(data[17]);

        if (record_size as usize) < DATA_HEADER_SIZE + key_len {
            return Err(StoreError::corruption(format!(
                "index entry record size {record_size} cannot hold key of {key_len} bytes"
            )));
        }

        if data.len() < INDEX_HEADER_SIZE + key_len {
            return Err(StoreError::corruption("index entry key truncated"));
        }

        let key = data[INDEX_HEADER_SIZE..INDEX_HEADER_SIZE + key_len].to_vec();

        Ok(Self {
            key,
            record_size,
            record_offset,
            sequence,
            flags,
        })
    }
}

/// Computes the value offset of a record from its offset and key length.
#[must_use]
pub fn value_offset(record_offset: u32, key_len: usize) -> u32 {
    record_offset + (DATA_HEADER_SIZE + key_len) as u32
}

/// A deletion marker, written to the tombstone log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneEntry {
    /// Key of the deleted record.
    pub key: Vec<u8>,
    /// Sequence number assigned to the deletion.
    pub sequence: SequenceNumber,
}

impl TombstoneEntry {
    /// Creates a tombstone entry.
    #[must_use]
    pub fn new(key: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self { key, sequence }
    }

    /// Returns the on-disk size of this entry.
    #[must_use]
    pub fn size(&self) -> u32 {
        (TOMBSTONE_HEADER_SIZE + self.key.len()) as u32
    }

    /// Encodes the entry to its on-disk byte form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let seq = self.sequence.as_u64().to_le_bytes();
        let mut buf = Vec::with_capacity(self.size() as usize);

        let crc = compute_crc32_pair(&seq, &self.key);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.push(self.key.len() as u8);
        buf.extend_from_slice(&seq);
        buf.extend_from_slice(&self.key);

        buf
    }

    /// Decodes an entry, verifying its checksum.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a truncated or malformed buffer and
    /// `ChecksumMismatch` when the stored checksum does not match.
    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < TOMBSTONE_HEADER_SIZE {
            return Err(StoreError::corruption("tombstone entry header truncated"));
        }

        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let key_len = data[4] as usize;
        check_key_len(key_len)?;
        let seq_bytes = [
            data[5], data[6], data[7], data[8], data[9], data[10], data[11], data[12],
        ];
        let sequence = SequenceNumber::new(u64::from_le_bytes(seq_bytes));

        if data.len() < TOMBSTONE_HEADER_SIZE + key_len {
            return Err(StoreError::corruption("tombstone entry key truncated"));
        }

        let key = data[TOMBSTONE_HEADER_SIZE..TOMBSTONE_HEADER_SIZE + key_len].to_vec();

        let actual = compute_crc32_pair(&seq_bytes, &key);
        if actual != stored_crc {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_crc,
                actual,
            });
        }

        Ok(Self { key, sequence })
    }
}
