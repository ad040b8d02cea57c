//! FeedDescriptor - persistable identity + lifecycle for one feed
//!
//! The descriptor serializes concurrent open/close through its own mutex
//! and notifies watchers on state and metadata transitions. The engine
//! handle lives here while the feed is open; the store only ever observes
//! coherent `closed`/`opened` states.

use crate::error::FeedStoreError;
use crate::index_db::FeedRecord;
use crate::mutex::{Mutex, Releaser};
use feedstore_model::{
    keys, rooted, BlockCodec, DiscoveryKey, FeedKey, Log, LogFactory, LogOptions, SecretKey,
    Storage,
};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default deadline for engine ready/close.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle states of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    Closed,
    Opening,
    Opened,
    Closing,
}

/// Watcher notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorEvent {
    Opened,
    Updated,
    Closed,
}

/// Per-feed metadata, state machine, lock and watcher fanout.
pub struct FeedDescriptor {
    path: String,
    key: FeedKey,
    secret_key: Option<SecretKey>,
    discovery_key: DiscoveryKey,
    value_encoding: String,
    codec: Arc<dyn BlockCodec>,
    metadata: RwLock<Option<serde_json::Value>>,
    state: RwLock<DescriptorState>,
    feed: RwLock<Option<Arc<dyn Log>>>,
    lock: Mutex,
    watchers: broadcast::Sender<DescriptorEvent>,
    factory: Arc<dyn LogFactory>,
    storage: Arc<dyn Storage>,
    timeout: Duration,
}

impl std::fmt::Debug for FeedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDescriptor")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FeedDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: String,
        key: FeedKey,
        secret_key: Option<SecretKey>,
        value_encoding: String,
        codec: Arc<dyn BlockCodec>,
        metadata: Option<serde_json::Value>,
        factory: Arc<dyn LogFactory>,
        storage: Arc<dyn Storage>,
        timeout: Duration,
    ) -> Self {
        let (watchers, _) = broadcast::channel(64);
        Self {
            discovery_key: keys::discovery_key(&key),
            path,
            key,
            secret_key,
            value_encoding,
            codec,
            metadata: RwLock::new(metadata),
            state: RwLock::new(DescriptorState::Closed),
            feed: RwLock::new(None),
            lock: Mutex::new(),
            watchers,
            factory,
            storage,
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        self.secret_key.as_ref()
    }

    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    pub fn value_encoding(&self) -> &str {
        &self.value_encoding
    }

    pub fn codec(&self) -> Arc<dyn BlockCodec> {
        self.codec.clone()
    }

    /// True when a secret key is present, so the feed can append.
    pub fn writable(&self) -> bool {
        self.secret_key.is_some()
    }

    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.metadata.read().expect("metadata lock poisoned").clone()
    }

    pub fn state(&self) -> DescriptorState {
        *self.state.read().expect("state lock poisoned")
    }

    pub fn is_opened(&self) -> bool {
        self.state() == DescriptorState::Opened
    }

    /// The bound engine handle while opened.
    pub fn feed(&self) -> Option<Arc<dyn Log>> {
        self.feed.read().expect("feed lock poisoned").clone()
    }

    /// The persistable record for this descriptor.
    pub fn record(&self) -> FeedRecord {
        FeedRecord {
            path: self.path.clone(),
            key: self.key,
            secret_key: self.secret_key,
            value_encoding: self.value_encoding.clone(),
            metadata: self.metadata(),
        }
    }

    /// Expose the descriptor mutex for cross-cutting critical sections
    /// (the store holds it across deletion).
    pub async fn lock(&self) -> Releaser {
        self.lock.acquire().await
    }

    /// Subscribe to `Opened`/`Updated`/`Closed` notifications.
    pub fn watch(&self) -> broadcast::Receiver<DescriptorEvent> {
        self.watchers.subscribe()
    }

    fn set_state(&self, next: DescriptorState) {
        *self.state.write().expect("state lock poisoned") = next;
    }

    fn set_feed(&self, feed: Option<Arc<dyn Log>>) {
        *self.feed.write().expect("feed lock poisoned") = feed;
    }

    /// Open the feed, returning the engine handle and whether this call
    /// performed the transition (`false` when the feed was already open).
    ///
    /// On any failure the state reverts to `Closed`, the mutex is released
    /// and the error surfaces; no partial handle is retained.
    pub async fn open(&self) -> Result<(Arc<dyn Log>, bool), FeedStoreError> {
        let releaser = self.lock.acquire().await;

        match self.state() {
            DescriptorState::Opened => {
                let feed = self.feed().ok_or_else(|| {
                    FeedStoreError::Engine(feedstore_model::LogError::Engine(
                        "opened descriptor lost its feed handle".into(),
                    ))
                });
                releaser.release();
                return feed.map(|feed| (feed, false));
            }
            DescriptorState::Closing => {
                releaser.release();
                return Err(FeedStoreError::Closed);
            }
            DescriptorState::Closed | DescriptorState::Opening => {}
        }

        self.set_state(DescriptorState::Opening);
        match self.open_inner().await {
            Ok(feed) => {
                self.set_feed(Some(feed.clone()));
                self.set_state(DescriptorState::Opened);
                debug!(path = %self.path, key = %self.key, "feed opened");
                let _ = self.watchers.send(DescriptorEvent::Opened);
                releaser.release();
                Ok((feed, true))
            }
            Err(err) => {
                self.set_feed(None);
                self.set_state(DescriptorState::Closed);
                warn!(path = %self.path, error = %err, "feed open failed");
                releaser.release();
                Err(err)
            }
        }
    }

    async fn open_inner(&self) -> Result<Arc<dyn Log>, FeedStoreError> {
        let storage = rooted(self.storage.clone(), self.key.to_hex());
        let feed = self.factory.create(
            storage,
            self.key,
            LogOptions {
                secret_key: self.secret_key,
            },
        )?;
        match tokio::time::timeout(self.timeout, feed.ready()).await {
            Ok(Ok(())) => Ok(feed),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(FeedStoreError::Timeout {
                op: "feed open",
                after: self.timeout,
            }),
        }
    }

    /// Close the feed. No-op when already closed. A failed close leaves the
    /// descriptor in `Closing` with the handle retained, so a later call can
    /// retry; the mutex is always released before the error surfaces.
    pub async fn close(&self) -> Result<(), FeedStoreError> {
        let releaser = self.lock.acquire().await;

        let feed = match self.state() {
            DescriptorState::Closed => {
                releaser.release();
                return Ok(());
            }
            DescriptorState::Opened | DescriptorState::Closing => match self.feed() {
                Some(feed) => feed,
                None => {
                    self.set_state(DescriptorState::Closed);
                    releaser.release();
                    return Ok(());
                }
            },
            DescriptorState::Opening => {
                // Unreachable while the mutex serializes transitions.
                releaser.release();
                return Ok(());
            }
        };

        self.set_state(DescriptorState::Closing);
        match tokio::time::timeout(self.timeout, feed.close()).await {
            Ok(Ok(())) => {
                self.set_feed(None);
                self.set_state(DescriptorState::Closed);
                debug!(path = %self.path, "feed closed");
                let _ = self.watchers.send(DescriptorEvent::Closed);
                releaser.release();
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(path = %self.path, error = %err, "feed close failed");
                releaser.release();
                Err(err.into())
            }
            Err(_) => {
                releaser.release();
                Err(FeedStoreError::Timeout {
                    op: "feed close",
                    after: self.timeout,
                })
            }
        }
    }

    /// Replace the metadata under the descriptor lock and notify watchers.
    pub async fn set_metadata(&self, metadata: Option<serde_json::Value>) {
        let releaser = self.lock.acquire().await;
        *self.metadata.write().expect("metadata lock poisoned") = metadata;
        let _ = self.watchers.send(DescriptorEvent::Updated);
        releaser.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedstore_log::BlockLogFactory;
    use feedstore_model::{CodecRegistry, Keypair, LogError, RootedStorage};
    use feedstore_storage::MemoryStorage;
    use serde_json::json;

    fn descriptor(storage: Arc<dyn Storage>, pair: &Keypair) -> FeedDescriptor {
        FeedDescriptor::new(
            "/books".into(),
            pair.public,
            Some(pair.secret),
            "binary".into(),
            CodecRegistry::new().resolve("binary").unwrap(),
            Some(json!({"topic": "books"})),
            Arc::new(BlockLogFactory::new()),
            storage,
            DEFAULT_TIMEOUT,
        )
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let desc = descriptor(storage, &Keypair::generate());

        let (first, newly) = desc.open().await.unwrap();
        assert!(newly);
        assert!(desc.is_opened());

        let (second, newly) = desc.open().await.unwrap();
        assert!(!newly);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_feed_iff_opened() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let desc = descriptor(storage, &Keypair::generate());

        assert_eq!(desc.state(), DescriptorState::Closed);
        assert!(desc.feed().is_none());

        desc.open().await.unwrap();
        assert_eq!(desc.state(), DescriptorState::Opened);
        assert!(desc.feed().is_some());

        desc.close().await.unwrap();
        assert_eq!(desc.state(), DescriptorState::Closed);
        assert!(desc.feed().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let desc = descriptor(storage, &Keypair::generate());
        desc.open().await.unwrap();
        desc.close().await.unwrap();
        desc.close().await.unwrap();
        assert_eq!(desc.state(), DescriptorState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_open_single_instantiation() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let desc = Arc::new(descriptor(storage, &Keypair::generate()));

        let (a, b) = tokio::join!(desc.open(), desc.open());
        let (feed_a, newly_a) = a.unwrap();
        let (feed_b, newly_b) = b.unwrap();

        assert!(Arc::ptr_eq(&feed_a, &feed_b));
        assert_eq!(
            [newly_a, newly_b].iter().filter(|n| **n).count(),
            1,
            "exactly one caller performs the transition"
        );
    }

    #[tokio::test]
    async fn test_failed_open_frees_mutex() {
        struct FailingFactory;
        impl LogFactory for FailingFactory {
            fn create(
                &self,
                _storage: RootedStorage,
                _key: FeedKey,
                _opts: LogOptions,
            ) -> Result<Arc<dyn Log>, LogError> {
                Err(LogError::Engine("boom".into()))
            }
        }

        let pair = Keypair::generate();
        let desc = FeedDescriptor::new(
            "/broken".into(),
            pair.public,
            Some(pair.secret),
            "binary".into(),
            CodecRegistry::new().resolve("binary").unwrap(),
            None,
            Arc::new(FailingFactory),
            Arc::new(MemoryStorage::new()),
            DEFAULT_TIMEOUT,
        );

        assert!(desc.open().await.is_err());
        assert_eq!(desc.state(), DescriptorState::Closed);
        assert!(desc.feed().is_none());

        // The mutex is free again: lock() succeeds immediately.
        let releaser = desc.lock().await;
        releaser.release();
    }

    #[tokio::test]
    async fn test_watchers_fire_on_transitions() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let desc = descriptor(storage, &Keypair::generate());
        let mut events = desc.watch();

        desc.open().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), DescriptorEvent::Opened);

        desc.set_metadata(Some(json!({"topic": "films"}))).await;
        assert_eq!(events.recv().await.unwrap(), DescriptorEvent::Updated);
        assert_eq!(desc.metadata(), Some(json!({"topic": "films"})));

        desc.close().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), DescriptorEvent::Closed);
    }

    #[tokio::test]
    async fn test_record_round_trip_fields() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let pair = Keypair::generate();
        let desc = descriptor(storage, &pair);
        let record = desc.record();

        assert_eq!(record.path, "/books");
        assert_eq!(record.key, pair.public);
        assert_eq!(record.secret_key, Some(pair.secret));
        assert_eq!(record.value_encoding, "binary");
        assert_eq!(record.metadata, Some(json!({"topic": "books"})));
    }
}
