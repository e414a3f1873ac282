//! File-based backend for persistent logs.

use crate::backend::{check_range, Backend};
use crate::error::{BackendError, BackendResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An open file and the offset its next append lands at.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

/// A file-based backend.
///
/// Writable backends take an exclusive advisory lock on the file for their
/// whole lifetime, so a second writer in this or another process fails with
/// [`BackendError::Locked`] instead of interleaving lines. Read-only backends
/// take no lock, reject appends and see bytes another process appends.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// A failed append re-reads the file length, so a torn line stays visible to
/// [`Backend::size`] and a reopened log reports it.
///
/// # Example
///
/// ```no_run
/// use keeldb_backend::{Backend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("storage.log")).unwrap();
/// backend.append(b"line\n").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
    writable: bool,
}

impl FileBackend {
    /// Opens or creates a writable file backend and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or another writer
    /// holds the lock.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(BackendError::Locked(path.display().to_string()));
        }
        Self::wrap(path, file, true)
    }

    /// Opens or creates a writable backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens an existing file without locking it. Appends are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    pub fn open_read_only(path: &Path) -> BackendResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::wrap(path, file, false)
    }

    fn wrap(path: &Path, file: File, writable: bool) -> BackendResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle { file, len }),
            writable,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether appends are allowed.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl Handle {
    /// Length as far as this backend can tell. Readers pick up growth from
    /// the writer.
    fn current_len(&mut self, writable: bool) -> BackendResult<u64> {
        if !writable {
            self.len = self.file.metadata()?.len();
        }
        Ok(self.len)
    }
}

impl Backend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> BackendResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        let size = handle.current_len(self.writable)?;
        check_range(offset, len, size)?;

        let mut buffer = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> BackendResult<u64> {
        if !self.writable {
            return Err(BackendError::ReadOnly);
        }
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if let Err(e) = handle.file.write_all(data) {
            handle.len = handle.file.metadata().map_or(offset, |m| m.len());
            return Err(e.into());
        }
        handle.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.handle.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> BackendResult<()> {
        if self.writable {
            self.handle.get_mut().file.sync_all()?;
        }
        Ok(())
    }

    fn size(&self) -> BackendResult<u64> {
        self.handle.lock().current_len(self.writable)
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.writable {
            let _ = FileExt::unlock(&self.handle.get_mut().file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert!(backend.is_writable());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let mut backend = FileBackend::open(&path).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);

        assert_eq!(&backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
        assert_eq!(&backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(BackendError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent\n").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read_all().unwrap(), b"persistent\n");
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(BackendError::Locked(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        drop(FileBackend::open(&path).unwrap());
        assert!(FileBackend::open(&path).is_ok());
    }

    #[test]
    fn read_only_rejects_appends_and_ignores_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let mut writer = FileBackend::open(&path).unwrap();
        writer.append(b"abc").unwrap();

        let mut reader = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(&reader.read_all().unwrap(), b"abc");
        assert!(matches!(reader.append(b"x"), Err(BackendError::ReadOnly)));
    }

    #[test]
    fn read_only_sees_later_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let mut writer = FileBackend::open(&path).unwrap();
        writer.append(b"one\n").unwrap();
        let reader = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 4);

        writer.append(b"two\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(reader.size().unwrap(), 8);
        assert_eq!(&reader.read_at(4, 4).unwrap(), b"two\n");
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.log");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }
}
