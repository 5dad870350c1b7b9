//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A file-based storage backend.
///
/// Reads use positioned I/O (`pread` on Unix) directly against the file
/// descriptor, so any number of readers can proceed without taking a lock.
/// Appends are serialized by an internal mutex; the published size is only
/// advanced once the bytes are fully written, so a reader that passes the
/// bounds check always sees complete data.
///
/// # Durability
///
/// - `flush()` pushes userspace buffers (a no-op for unbuffered files)
/// - `sync_data()` calls `File::sync_data` (contents only)
/// - `sync()` calls `File::sync_all` (contents and metadata)
///
/// # Example
///
/// ```no_run
/// use cinderdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("data.bin")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync_data().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: AtomicU64,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// An existing file is opened for reading and appending; a missing file
    /// is created empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size: AtomicU64::new(size),
            write_lock: Mutex::new(()),
        })
    }

    /// Creates a new, empty file backend; fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be created.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    /// Opens an existing file backend read-only.
    ///
    /// Appends will fail with a permission error from the OS.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size: AtomicU64::new(size),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = self.file.seek_read(buf, offset)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            buf = &mut buf[n..];
            offset += n as u64;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = self.file.seek_write(buf, offset)?;
            buf = &buf[n..];
            offset += n as u64;
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size.load(Ordering::Acquire);
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; len];
        self.read_exact_at(&mut buffer, offset)?;

        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let _guard = self.write_lock.lock();

        let offset = self.size.load(Ordering::Acquire);
        if !data.is_empty() {
            self.write_all_at(data, offset)?;
            // Publish the new size only after the bytes are on file.
            self.size
                .store(offset + data.len() as u64, Ordering::Release);
        }

        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        let mut file = &self.file;
        file.flush()?;
        Ok(())
    }

    fn sync_data(&self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn create_new_fails_on_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let _first = FileBackend::create_new(&path).unwrap();
        assert!(FileBackend::create_new(&path).is_err());
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);
            assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        }
    }

    #[test]
    fn read_only_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"sealed").unwrap();
        }

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.read_at(0, 6).unwrap(), b"sealed");
        assert!(backend.append(b"more").is_err());
    }

    #[test]
    fn empty_append_keeps_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"x").unwrap();

        let offset = backend.append(b"").unwrap();
        assert_eq!(offset, 1);
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn empty_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn concurrent_readers() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = Arc::new(FileBackend::open(&path).unwrap());
        for i in 0..100u8 {
            backend.append(&[i; 8]).unwrap();
        }

        let mut handles = vec![];
        for t in 0..4 {
            let b = Arc::clone(&backend);
            handles.push(thread::spawn(move || {
                for i in 0..100u64 {
                    let data = b.read_at(i * 8, 8).unwrap();
                    assert_eq!(data, vec![i as u8; 8]);
                }
                t
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn flush_and_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"data").unwrap();

        assert!(backend.flush().is_ok());
        assert!(backend.sync_data().is_ok());
        assert!(backend.sync().is_ok());
    }

    #[test]
    fn path_accessor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.path(), path);
    }
}
