//! Storage abstraction
//!
//! A `Storage` backend hands out named random-access byte containers. The
//! rest of the system never touches the filesystem directly; feeds root
//! their block files at `<hex(key)>/<name>` on whatever backend the caller
//! injected.

use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read out of bounds: offset {offset} + {length} past end {end}")]
    OutOfBounds { offset: u64, length: u64, end: u64 },

    #[error("storage is closed")]
    Closed,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One named byte container: positional reads and writes.
#[async_trait::async_trait]
pub trait RandomAccess: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError>;

    /// Write `data` at `offset`, growing the container as needed.
    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StorageError>;

    /// Current container length in bytes.
    async fn len(&self) -> Result<u64, StorageError>;

    /// Shrink (or grow, zero-filled) the container to `length` bytes.
    async fn truncate(&self, length: u64) -> Result<(), StorageError>;

    /// Release the container. Reads and writes after close fail.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Factory for named containers.
///
/// Opening the same name twice must yield views of the same bytes.
pub trait Storage: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StorageError>;
}

/// A storage factory pre-rooted at a directory-like prefix.
pub type RootedStorage =
    Arc<dyn Fn(&str) -> Result<Arc<dyn RandomAccess>, StorageError> + Send + Sync>;

/// Root a backend at `prefix`, so `open("data")` resolves `prefix/data`.
pub fn rooted(storage: Arc<dyn Storage>, prefix: String) -> RootedStorage {
    Arc::new(move |name: &str| storage.open(&format!("{}/{}", prefix, name)))
}
