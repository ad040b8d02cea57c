//! In-memory storage backend
//!
//! Containers live for the lifetime of the `MemoryStorage` instance, so a
//! store can be closed and reopened over the same backend within a process.

use feedstore_model::{RandomAccess, Storage, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Shared bytes for one named container.
#[derive(Default)]
struct MemBlob {
    data: RwLock<Vec<u8>>,
}

/// One open view of a container. Closing the view does not discard the
/// underlying bytes; reopening the name sees them again.
struct MemFile {
    blob: Arc<MemBlob>,
    closed: AtomicBool,
}

impl MemFile {
    fn guard(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RandomAccess for MemFile {
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        self.guard()?;
        let data = self.blob.data.read().expect("memory blob lock poisoned");
        let end = offset
            .checked_add(length)
            .ok_or(StorageError::OutOfBounds {
                offset,
                length,
                end: data.len() as u64,
            })?;
        if end > data.len() as u64 {
            return Err(StorageError::OutOfBounds {
                offset,
                length,
                end: data.len() as u64,
            });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    async fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        self.guard()?;
        let mut data = self.blob.data.write().expect("memory blob lock poisoned");
        let end = offset as usize + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn len(&self) -> Result<u64, StorageError> {
        self.guard()?;
        let data = self.blob.data.read().expect("memory blob lock poisoned");
        Ok(data.len() as u64)
    }

    async fn truncate(&self, length: u64) -> Result<(), StorageError> {
        self.guard()?;
        let mut data = self.blob.data.write().expect("memory blob lock poisoned");
        data.resize(length as usize, 0);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Named in-RAM byte containers.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Arc<MemBlob>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of containers ever opened. Test helper.
    pub fn container_count(&self) -> usize {
        self.blobs.lock().expect("memory storage lock poisoned").len()
    }
}

impl Storage for MemoryStorage {
    fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StorageError> {
        let mut blobs = self.blobs.lock().expect("memory storage lock poisoned");
        let blob = blobs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemBlob::default()))
            .clone();
        Ok(Arc::new(MemFile {
            blob,
            closed: AtomicBool::new(false),
        }))
    }
}
