//! FeedHandle - opaque handle to an opened feed
//!
//! Wraps the engine instance together with the descriptor's codec, so
//! callers append and read typed block values. Equality is engine-instance
//! identity: two handles from concurrent opens of the same path compare
//! equal. `FeedStore::descriptor_of` resolves a handle back to its
//! descriptor.

use crate::error::FeedStoreError;
use feedstore_model::{BlockCodec, BlockValue, DiscoveryKey, FeedKey, Log, LogEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct FeedHandle {
    log: Arc<dyn Log>,
    codec: Arc<dyn BlockCodec>,
    discovery_key: DiscoveryKey,
}

impl FeedHandle {
    pub(crate) fn new(log: Arc<dyn Log>, codec: Arc<dyn BlockCodec>) -> Self {
        Self {
            discovery_key: *log.discovery_key(),
            log,
            codec,
        }
    }

    pub fn key(&self) -> &FeedKey {
        self.log.key()
    }

    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    /// Number of blocks in the feed.
    pub fn len(&self) -> u64 {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn writable(&self) -> bool {
        self.log.writable()
    }

    /// Append one value, encoded with the feed's codec. Returns the new
    /// block's sequence number.
    pub async fn append(&self, value: impl Into<BlockValue>) -> Result<u64, FeedStoreError> {
        let bytes = self.codec.encode(&value.into())?;
        Ok(self.log.append(&bytes).await?)
    }

    /// Read and decode block `seq`.
    pub async fn get(&self, seq: u64) -> Result<BlockValue, FeedStoreError> {
        let bytes = self.log.get(seq).await?;
        Ok(self.codec.decode(&bytes)?)
    }

    /// Read and decode blocks `start..end`.
    pub async fn get_batch(&self, start: u64, end: u64) -> Result<Vec<BlockValue>, FeedStoreError> {
        let blocks = self.log.get_batch(start, end).await?;
        blocks
            .iter()
            .map(|bytes| self.codec.decode(bytes).map_err(Into::into))
            .collect()
    }

    /// The last value in the feed, or `None` when empty.
    pub async fn head(&self) -> Result<Option<BlockValue>, FeedStoreError> {
        match self.log.head().await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Request blocks `start..end`, surfacing `download` events.
    pub async fn download(&self, start: u64, end: u64) -> Result<(), FeedStoreError> {
        Ok(self.log.download(start, end).await?)
    }

    /// Subscribe to the engine's append/download notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// The underlying engine instance.
    pub fn log(&self) -> &Arc<dyn Log> {
        &self.log
    }
}

impl PartialEq for FeedHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.log, &other.log)
    }
}

impl Eq for FeedHandle {}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("key", self.key())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
