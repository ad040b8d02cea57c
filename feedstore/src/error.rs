//! Error taxonomy for store operations

use feedstore_model::{CodecError, FeedKey, KvError, LogError, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the feed store and its readers
#[derive(Error, Debug)]
pub enum FeedStoreError {
    #[error("path is required")]
    MissingPath,

    #[error("invalid public key: {0}")]
    BadKey(String),

    #[error("invalid secret key: {0}")]
    BadSecretKey(String),

    #[error("unknown value encoding: {0}")]
    BadEncoding(String),

    #[error("path {path} is already bound to a different key")]
    KeyMismatch { path: String },

    #[error("key {key} is already bound to path {path}")]
    DuplicateKey { key: FeedKey, path: String },

    #[error("no feed at path {0}")]
    NotFound(String),

    #[error("store is closed")]
    Closed,

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("log engine error: {0}")]
    Engine(#[from] LogError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index error: {0}")]
    Index(#[from] KvError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("reader failed: {0}")]
    ReaderFailed(String),
}

impl FeedStoreError {
    /// True for errors that mean "the store or feed is not serviceable".
    pub fn is_closed(&self) -> bool {
        matches!(self, FeedStoreError::Closed)
    }
}
