//! Store directory management.
//!
//! All persistent state lives in a single flat directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK             # Advisory lock for single-process access
//! ├─ <id>.data        # Data segment: concatenated records
//! ├─ <id>.index       # Paired index file: one entry per record
//! └─ <id>.tombstone   # Tombstone log: deletion entries
//! ```
//!
//! File ids are positive 32-bit integers embedded in the file name, so
//! enumeration can recover the id from the name alone.

use crate::error::{StoreError, StoreResult};
use crate::types::FileId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DATA_EXT: &str = "data";
const INDEX_EXT: &str = "index";
const TOMBSTONE_EXT: &str = "tombstone";

/// Manages the store directory: file naming, enumeration, locking, and
/// directory durability.
///
/// Holds an exclusive advisory lock for its lifetime; a second open of the
/// same directory fails with [`StoreError::Locked`].
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its exclusive lock.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the path is missing and `create_if_missing`
    ///   is false, or the path is not a directory
    /// - `Locked` if another process holds the lock
    /// - `Io` on filesystem failures
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::invalid_argument(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a data file.
    #[must_use]
    pub fn data_file_path(&self, id: FileId) -> PathBuf {
        self.path.join(format!("{}.{DATA_EXT}", id.as_u32()))
    }

    /// Returns the path of an index file.
    #[must_use]
    pub fn index_file_path(&self, id: FileId) -> PathBuf {
        self.path.join(format!("{}.{INDEX_EXT}", id.as_u32()))
    }

    /// Returns the path of a tombstone file.
    #[must_use]
    pub fn tombstone_file_path(&self, id: FileId) -> PathBuf {
        self.path.join(format!("{}.{TOMBSTONE_EXT}", id.as_u32()))
    }

    /// Lists data file ids, ascending.
    pub fn list_data_file_ids(&self) -> StoreResult<Vec<FileId>> {
        self.list_ids(DATA_EXT)
    }

    /// Lists index file ids, ascending. Recovery replays oldest first.
    pub fn list_index_file_ids(&self) -> StoreResult<Vec<FileId>> {
        self.list_ids(INDEX_EXT)
    }

    /// Lists tombstone file ids, ascending.
    pub fn list_tombstone_file_ids(&self) -> StoreResult<Vec<FileId>> {
        self.list_ids(TOMBSTONE_EXT)
    }

    fn list_ids(&self, extension: &str) -> StoreResult<Vec<FileId>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = parse_file_id(name, extension) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Fsyncs the directory so created, renamed, or deleted file names are
    /// durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> StoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Fsyncs the directory. Windows NTFS journals metadata operations, so
    /// the explicit fsync is skipped.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Extracts the file id from a name like `42.data` for the given
/// extension. Ids must be positive.
fn parse_file_id(name: &str, extension: &str) -> Option<FileId> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
    let id: u32 = stem.parse().ok()?;
    if id == 0 || stem.starts_with('+') {
        return None;
    }
    Some(FileId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_store");

        assert!(!path.exists());
        let _dir = StoreDir::open(&path, true).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn open_fails_without_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");

        let _first = StoreDir::open(&path, true).unwrap();
        assert!(matches!(
            StoreDir::open(&path, true),
            Err(StoreError::Locked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");

        {
            let _dir = StoreDir::open(&path, true).unwrap();
        }
        let _second = StoreDir::open(&path, true).unwrap();
    }

    #[test]
    fn file_paths_embed_id() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        let id = FileId::new(42);
        assert!(dir.data_file_path(id).ends_with("42.data"));
        assert!(dir.index_file_path(id).ends_with("42.index"));
        assert!(dir.tombstone_file_path(id).ends_with("42.tombstone"));
    }

    #[test]
    fn listing_sorts_and_filters() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        for name in ["3.data", "1.data", "2.data", "2.index", "1.tombstone", "junk.data", "0.data"] {
            fs::write(temp.path().join(name), b"").unwrap();
        }

        let data_ids: Vec<u32> = dir
            .list_data_file_ids()
            .unwrap()
            .into_iter()
            .map(FileId::as_u32)
            .collect();
        assert_eq!(data_ids, vec![1, 2, 3]);

        assert_eq!(dir.list_index_file_ids().unwrap(), vec![FileId::new(2)]);
        assert_eq!(dir.list_tombstone_file_ids().unwrap(), vec![FileId::new(1)]);
    }

    #[test]
    fn parse_rejects_non_numeric_and_zero() {
        assert_eq!(parse_file_id("12.data", "data"), Some(FileId::new(12)));
        assert_eq!(parse_file_id("0.data", "data"), None);
        assert_eq!(parse_file_id("x.data", "data"), None);
        assert_eq!(parse_file_id("12.index", "data"), None);
        assert_eq!(parse_file_id("12data", "data"), None);
        assert_eq!(parse_file_id("+3.data", "data"), None);
    }

    #[test]
    fn sync_directory_succeeds() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        assert!(dir.sync_directory().is_ok());
    }
}
