//! Key/value index abstraction
//!
//! The minimal contract the persistent feed index needs from its backend:
//! string keys, opaque values, list-by-prefix. The default implementation
//! lives in `feedstore-storage`; callers may inject their own (e.g. a trie).

use crate::storage::StorageError;
use thiserror::Error;

/// Errors from the index backend
#[derive(Error, Debug)]
pub enum KvError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("index is closed")]
    Closed,

    #[error("index backend error: {0}")]
    Backend(String),
}

/// A durable string-keyed map with prefix listing.
#[async_trait::async_trait]
pub trait KvIndex: Send + Sync {
    /// Load persisted state. Must be called before any other operation;
    /// idempotent.
    async fn ready(&self) -> Result<(), KvError>;

    /// Insert or replace `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Fetch `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Remove `key`. Removing an absent key is a no-op.
    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError>;

    /// Flush and release the backend.
    async fn close(&self) -> Result<(), KvError>;
}
