//! Log engine abstraction
//!
//! The contract the store consumes from an append-only log engine. The
//! default implementation (`feedstore-log`) stores blocks on the injected
//! storage backend; replication-capable engines can be swapped in through
//! `LogFactory` as long as they honor this surface.

use crate::storage::{RootedStorage, StorageError};
use crate::types::{DiscoveryKey, FeedKey, SecretKey};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Notifications emitted by a log instance.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// One block was appended; `length` is the new log length.
    Append { length: u64 },
    /// Block `seq` became available locally.
    Download { seq: u64 },
    /// The log was closed; live readers should end.
    Close,
}

/// Errors from the log engine
#[derive(Error, Debug)]
pub enum LogError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("block {seq} out of range (length {length})")]
    OutOfRange { seq: u64, length: u64 },

    #[error("log is not writable")]
    NotWritable,

    #[error("block hash mismatch at {0}")]
    HashMismatch(u64),

    #[error("log is closed")]
    Closed,

    #[error("secret key does not match public key")]
    SecretKeyMismatch,

    #[error("corrupt log: {0}")]
    Corrupt(String),

    #[error("log engine error: {0}")]
    Engine(String),
}

/// One append-only, cryptographically keyed block log.
#[async_trait::async_trait]
pub trait Log: Send + Sync {
    /// Load persisted state; must complete before reads or appends.
    /// Idempotent.
    async fn ready(&self) -> Result<(), LogError>;

    /// Append one block, returning its sequence number.
    async fn append(&self, block: &[u8]) -> Result<u64, LogError>;

    /// Read block `seq`.
    async fn get(&self, seq: u64) -> Result<Vec<u8>, LogError>;

    /// Read blocks `start..end` (end exclusive, clamped to the log length).
    async fn get_batch(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, LogError>;

    /// The last block, or `None` on an empty log.
    async fn head(&self) -> Result<Option<Vec<u8>>, LogError>;

    /// Make blocks `start..end` locally available, emitting `Download`
    /// events as they land. A local-only engine reports present blocks.
    async fn download(&self, start: u64, end: u64) -> Result<(), LogError>;

    /// Flush and release the log. Idempotent.
    async fn close(&self) -> Result<(), LogError>;

    /// Number of blocks in the log.
    fn len(&self) -> u64;

    /// True when the log holds no blocks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self) -> &FeedKey;

    fn discovery_key(&self) -> &DiscoveryKey;

    /// True when the log can append (a secret key is present).
    fn writable(&self) -> bool;

    fn is_opened(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Subscribe to append/download notifications.
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;
}

/// Options handed to the log factory on create.
#[derive(Default)]
pub struct LogOptions {
    pub secret_key: Option<SecretKey>,
}

/// Constructs log instances over a rooted storage.
pub trait LogFactory: Send + Sync {
    fn create(
        &self,
        storage: RootedStorage,
        key: FeedKey,
        opts: LogOptions,
    ) -> Result<Arc<dyn Log>, LogError>;
}
