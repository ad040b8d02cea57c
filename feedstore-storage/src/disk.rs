//! File-backed storage backend
//!
//! One file per container under a root directory. Container names may
//! contain `/`; parent directories are created on open.

use feedstore_model::{RandomAccess, Storage, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct DiskFile {
    file: Mutex<File>,
    closed: AtomicBool,
}

impl DiskFile {
    fn guard(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RandomAccess for DiskFile {
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        self.guard()?;
        let mut file = self.file.lock().expect("disk file lock poisoned");
        let end = file.metadata()?.len();
        if offset + length > end {
            return Err(StorageError::OutOfBounds {
                offset,
                length,
                end,
            });
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.guard()?;
        let mut file = self.file.lock().expect("disk file lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, StorageError> {
        self.guard()?;
        let file = self.file.lock().expect("disk file lock poisoned");
        Ok(file.metadata()?.len())
    }

    async fn truncate(&self, length: u64) -> Result<(), StorageError> {
        self.guard()?;
        let file = self.file.lock().expect("disk file lock poisoned");
        file.set_len(length)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let file = self.file.lock().expect("disk file lock poisoned");
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Storage backend rooted at a directory.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Root the backend at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for DiskStorage {
    fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StorageError> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Arc::new(DiskFile {
            file: Mutex::new(file),
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let file = storage.open("feed/data").unwrap();

        file.write(0, b"block one").await.unwrap();
        assert_eq!(file.read(0, 9).await.unwrap(), b"block one");
        assert_eq!(file.len().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_nested_names_create_directories() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let file = storage.open("aa/bb/cc/data").unwrap();
        file.write(0, b"x").await.unwrap();

        assert!(dir.path().join("aa/bb/cc/data").exists());
    }

    #[tokio::test]
    async fn test_reopen_sees_previous_bytes() {
        let dir = tempdir().unwrap();
        {
            let storage = DiskStorage::new(dir.path()).unwrap();
            let file = storage.open("data").unwrap();
            file.write(0, b"durable").await.unwrap();
            file.close().await.unwrap();
        }

        let storage = DiskStorage::new(dir.path()).unwrap();
        let file = storage.open("data").unwrap();
        assert_eq!(file.read(0, 7).await.unwrap(), b"durable");
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let file = storage.open("data").unwrap();
        file.write(0, b"ab").await.unwrap();

        assert!(matches!(
            file.read(0, 10).await,
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let file = storage.open("data").unwrap();
        file.close().await.unwrap();
        file.close().await.unwrap();
        assert!(matches!(file.len().await, Err(StorageError::Closed)));
    }
}
