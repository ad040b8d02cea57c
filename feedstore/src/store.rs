//! FeedStore - orchestrator for feed lifecycle, persistence and readers
//!
//! Owns the descriptor map (keyed by discovery key), the persistent index,
//! the store-level event fanout and the set of live readers. All state
//! transitions go through the store mutex; descriptor transitions go
//! through each descriptor's own mutex, acquired only after the store
//! mutex is released.

use crate::descriptor::{FeedDescriptor, DEFAULT_TIMEOUT};
use crate::error::FeedStoreError;
use crate::events::StoreEvent;
use crate::handle::FeedHandle;
use crate::index_db::{FeedRecord, IndexDb};
use crate::mutex::Mutex;
use crate::read::{
    bulk, ordered, selective, BulkFilter, BulkStream, Evaluate, FeedDecision, FeedSource,
    OrderedStream, ReadOptions, ReaderPort, SelectiveStream,
};
use feedstore_log::BlockLogFactory;
use feedstore_model::{
    keys, BlockCodec, CodecRegistry, DiscoveryKey, FeedKey, Keypair, KvIndex, Log, LogEvent,
    LogFactory, SecretKey, Storage,
};
use feedstore_storage::FileKv;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle states of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Closed,
    Opening,
    Opened,
    Closing,
}

/// Construction-time configuration.
pub struct FeedStoreOptions {
    /// Encoding used when `open_feed` does not name one.
    pub value_encoding: String,
    /// Codec registry; starts with `binary`, `utf-8`, `json`.
    pub codecs: CodecRegistry,
    /// Deadline for engine ready/close.
    pub timeout: Duration,
    /// Log engine factory.
    pub log_factory: Arc<dyn LogFactory>,
    /// Index backend; defaults to `FileKv` over the container `"index"`.
    pub index: Option<Arc<dyn KvIndex>>,
}

impl Default for FeedStoreOptions {
    fn default() -> Self {
        Self {
            value_encoding: "binary".to_string(),
            codecs: CodecRegistry::new(),
            timeout: DEFAULT_TIMEOUT,
            log_factory: Arc::new(BlockLogFactory::new()),
            index: None,
        }
    }
}

impl FeedStoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.value_encoding = encoding.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn log_factory(mut self, factory: Arc<dyn LogFactory>) -> Self {
        self.log_factory = factory;
        self
    }

    pub fn index(mut self, index: Arc<dyn KvIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn BlockCodec>) -> Self {
        self.codecs.register(codec);
        self
    }
}

/// Options for `open_feed`.
#[derive(Default, Clone)]
pub struct OpenFeedOptions {
    /// Public key for the feed; generated (with a secret) when absent.
    pub key: Option<FeedKey>,
    /// Secret key; requires `key` and must match it.
    pub secret_key: Option<SecretKey>,
    /// Codec name; falls back to the store default.
    pub value_encoding: Option<String>,
    /// Opaque metadata persisted with the descriptor.
    pub metadata: Option<serde_json::Value>,
}

impl OpenFeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: FeedKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn keypair(mut self, pair: &Keypair) -> Self {
        self.key = Some(pair.public);
        self.secret_key = Some(pair.secret);
        self
    }

    pub fn secret_key(mut self, secret: SecretKey) -> Self {
        self.secret_key = Some(secret);
        self
    }

    pub fn value_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.value_encoding = Some(encoding.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Descriptor registry keyed by discovery key, preserving insertion order
/// so readers attach feeds deterministically.
#[derive(Default)]
struct DescriptorMap {
    by_key: HashMap<DiscoveryKey, Arc<FeedDescriptor>>,
    order: Vec<DiscoveryKey>,
}

impl DescriptorMap {
    fn insert(&mut self, descriptor: Arc<FeedDescriptor>) {
        let discovery_key = *descriptor.discovery_key();
        if self.by_key.insert(discovery_key, descriptor).is_none() {
            self.order.push(discovery_key);
        }
    }

    fn remove(&mut self, discovery_key: &DiscoveryKey) -> Option<Arc<FeedDescriptor>> {
        let removed = self.by_key.remove(discovery_key);
        if removed.is_some() {
            self.order.retain(|key| key != discovery_key);
        }
        removed
    }

    fn get(&self, discovery_key: &DiscoveryKey) -> Option<&Arc<FeedDescriptor>> {
        self.by_key.get(discovery_key)
    }

    fn values(&self) -> impl Iterator<Item = &Arc<FeedDescriptor>> {
        self.order.iter().filter_map(|key| self.by_key.get(key))
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }

    fn clear(&mut self) {
        self.by_key.clear();
        self.order.clear();
    }
}

struct StoreInner {
    storage: Arc<dyn Storage>,
    index: RwLock<IndexDb>,
    /// True when the index is the default `FileKv`; rebuilt on each open so
    /// the store can be reopened after a full close.
    default_index: bool,
    factory: Arc<dyn LogFactory>,
    codecs: CodecRegistry,
    default_encoding: String,
    timeout: Duration,
    descriptors: RwLock<DescriptorMap>,
    state_tx: watch::Sender<StoreState>,
    lock: Mutex,
    events: broadcast::Sender<StoreEvent>,
    readers: StdMutex<Vec<ReaderPort>>,
}

/// Cloneable handle to the store.
#[derive(Clone)]
pub struct FeedStore {
    inner: Arc<StoreInner>,
}

impl FeedStore {
    /// Build a store over `storage` without initializing it; call `open`.
    pub fn new(storage: Arc<dyn Storage>, opts: FeedStoreOptions) -> Result<Self, FeedStoreError> {
        opts.codecs
            .resolve(&opts.value_encoding)
            .map_err(|_| FeedStoreError::BadEncoding(opts.value_encoding.clone()))?;

        let default_index = opts.index.is_none();
        let index = match opts.index {
            Some(kv) => IndexDb::new(kv),
            None => IndexDb::new(Arc::new(FileKv::new(storage.open("index")?))),
        };
        let (state_tx, _) = watch::channel(StoreState::Closed);
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            inner: Arc::new(StoreInner {
                storage,
                index: RwLock::new(index),
                default_index,
                factory: opts.log_factory,
                codecs: opts.codecs,
                default_encoding: opts.value_encoding,
                timeout: opts.timeout,
                descriptors: RwLock::new(DescriptorMap::default()),
                state_tx,
                lock: Mutex::new(),
                events,
                readers: StdMutex::new(Vec::new()),
            }),
        })
    }

    /// Build and initialize a store in one call.
    pub async fn create(
        storage: Arc<dyn Storage>,
        opts: FeedStoreOptions,
    ) -> Result<Self, FeedStoreError> {
        let store = Self::new(storage, opts)?;
        store.open().await?;
        Ok(store)
    }

    pub fn state(&self) -> StoreState {
        *self.inner.state_tx.borrow()
    }

    fn set_state(&self, next: StoreState) {
        self.inner.state_tx.send_replace(next);
    }

    fn index(&self) -> IndexDb {
        self.inner.index.read().expect("index lock poisoned").clone()
    }

    /// Subscribe to store-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Initialize the store: load every persisted descriptor (without
    /// opening its feed) and become `Opened`. At most one caller performs
    /// the transition; the rest observe the result. Allowed again after a
    /// full `close`.
    pub async fn open(&self) -> Result<(), FeedStoreError> {
        let releaser = self.inner.lock.acquire().await;
        match self.state() {
            StoreState::Opened => {
                releaser.release();
                return Ok(());
            }
            StoreState::Closing => {
                releaser.release();
                return Err(FeedStoreError::Closed);
            }
            StoreState::Closed | StoreState::Opening => {}
        }

        self.set_state(StoreState::Opening);

        // The default index backend is closed with the store; build a fresh
        // one over the same container so reopen sees the persisted records.
        if self.inner.default_index {
            match self.inner.storage.open("index") {
                Ok(file) => {
                    *self
                        .inner
                        .index
                        .write()
                        .expect("index lock poisoned") = IndexDb::new(Arc::new(FileKv::new(file)));
                }
                Err(err) => {
                    self.set_state(StoreState::Closed);
                    releaser.release();
                    return Err(err.into());
                }
            }
        }

        let index = self.index();
        let loaded = async {
            index.ready().await?;
            index.list().await
        }
        .await;

        let records = match loaded {
            Ok(records) => records,
            Err(err) => {
                self.set_state(StoreState::Closed);
                releaser.release();
                return Err(err);
            }
        };

        let mut failed = None;
        {
            let mut descriptors = self
                .inner
                .descriptors
                .write()
                .expect("descriptor map lock poisoned");
            for record in records {
                match self.descriptor_from_record(record) {
                    Ok(descriptor) => descriptors.insert(descriptor),
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }
            if failed.is_some() {
                descriptors.clear();
            }
        }
        if let Some(err) = failed {
            self.set_state(StoreState::Closed);
            releaser.release();
            return Err(err);
        }

        self.set_state(StoreState::Opened);
        info!(
            descriptors = self.get_descriptors().len(),
            "feed store ready"
        );
        let _ = self.inner.events.send(StoreEvent::Ready);
        releaser.release();
        Ok(())
    }

    /// Wait out `Opening`; error `Closed` when the store is not serviceable.
    async fn ensure_open(&self) -> Result<(), FeedStoreError> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                StoreState::Opened => return Ok(()),
                StoreState::Closed | StoreState::Closing => return Err(FeedStoreError::Closed),
                StoreState::Opening => {
                    if rx.changed().await.is_err() {
                        return Err(FeedStoreError::Closed);
                    }
                }
            }
        }
    }

    fn descriptor_from_record(
        &self,
        record: FeedRecord,
    ) -> Result<Arc<FeedDescriptor>, FeedStoreError> {
        let codec = self
            .inner
            .codecs
            .resolve(&record.value_encoding)
            .map_err(|_| FeedStoreError::BadEncoding(record.value_encoding.clone()))?;
        Ok(Arc::new(FeedDescriptor::new(
            record.path,
            record.key,
            record.secret_key,
            record.value_encoding,
            codec,
            record.metadata,
            self.inner.factory.clone(),
            self.inner.storage.clone(),
            self.inner.timeout,
        )))
    }

    fn create_descriptor(
        &self,
        path: &str,
        opts: &OpenFeedOptions,
        encoding: String,
    ) -> Result<Arc<FeedDescriptor>, FeedStoreError> {
        let (key, secret_key) = match &opts.key {
            Some(key) => (*key, opts.secret_key),
            None => {
                let pair = Keypair::generate();
                (pair.public, Some(pair.secret))
            }
        };
        let codec = self
            .inner
            .codecs
            .resolve(&encoding)
            .map_err(|_| FeedStoreError::BadEncoding(encoding.clone()))?;
        let descriptor = Arc::new(FeedDescriptor::new(
            path.to_string(),
            key,
            secret_key,
            encoding,
            codec,
            opts.metadata.clone(),
            self.inner.factory.clone(),
            self.inner.storage.clone(),
            self.inner.timeout,
        ));
        self.inner
            .descriptors
            .write()
            .expect("descriptor map lock poisoned")
            .insert(descriptor.clone());
        debug!(path = %path, key = %descriptor.key(), "descriptor created");
        Ok(descriptor)
    }

    /// Open (creating if needed) the feed at `path`.
    ///
    /// With a `key` on an existing path, the key must match (`KeyMismatch`);
    /// a `key` already bound to another path is rejected (`DuplicateKey`).
    /// The descriptor record is persisted once the feed first opens, and the
    /// `feed` event fires exactly once per open-to-close interval, before
    /// any reader observes a record from the feed.
    pub async fn open_feed(
        &self,
        path: &str,
        opts: OpenFeedOptions,
    ) -> Result<FeedHandle, FeedStoreError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(FeedStoreError::MissingPath);
        }
        if let Some(secret) = &opts.secret_key {
            match &opts.key {
                None => {
                    return Err(FeedStoreError::BadSecretKey(
                        "secret key supplied without its public key".into(),
                    ))
                }
                Some(key) => {
                    keys::verify_pair(key, secret)
                        .map_err(|err| FeedStoreError::BadSecretKey(err.to_string()))?;
                }
            }
        }
        let encoding = opts
            .value_encoding
            .clone()
            .unwrap_or_else(|| self.inner.default_encoding.clone());
        self.inner
            .codecs
            .resolve(&encoding)
            .map_err(|_| FeedStoreError::BadEncoding(encoding.clone()))?;

        self.ensure_open().await?;
        let releaser = self.inner.lock.acquire().await;
        if self.state() != StoreState::Opened {
            releaser.release();
            return Err(FeedStoreError::Closed);
        }

        let descriptor = match self.get_descriptor_by_path(path) {
            Some(existing) => {
                if let Some(key) = &opts.key {
                    if key != existing.key() {
                        releaser.release();
                        return Err(FeedStoreError::KeyMismatch {
                            path: path.to_string(),
                        });
                    }
                }
                existing
            }
            None => {
                if let Some(key) = &opts.key {
                    let discovery = keys::discovery_key(key);
                    if let Some(bound) = self.get_descriptor_by_discovery_key(&discovery) {
                        let bound_path = bound.path().to_string();
                        releaser.release();
                        return Err(FeedStoreError::DuplicateKey {
                            key: *key,
                            path: bound_path,
                        });
                    }
                }
                match self.create_descriptor(path, &opts, encoding) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        releaser.release();
                        return Err(err);
                    }
                }
            }
        };
        releaser.release();

        let (log, newly_opened) = descriptor.open().await?;
        let handle = FeedHandle::new(log.clone(), descriptor.codec());
        if newly_opened {
            if let Err(err) = self.index().put(&descriptor.record()).await {
                // Leave no half-registered feed behind the error.
                if let Err(close_err) = descriptor.close().await {
                    warn!(path = %descriptor.path(), error = %close_err,
                        "failed to unwind after index error");
                }
                return Err(err);
            }
            self.spawn_forwarder(descriptor.clone(), handle.clone());
            let _ = self.inner.events.send(StoreEvent::Feed {
                handle: handle.clone(),
                descriptor: descriptor.clone(),
            });
            self.attach_readers(&descriptor, &log);
            info!(path = %descriptor.path(), key = %descriptor.key(), "feed opened");
        }
        Ok(handle)
    }

    /// Open every feed whose descriptor matches `filter`.
    pub async fn open_feeds<F>(&self, filter: F) -> Result<Vec<FeedHandle>, FeedStoreError>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.ensure_open().await?;
        let paths: Vec<String> = self
            .get_descriptors()
            .into_iter()
            .filter(|descriptor| filter(descriptor))
            .map(|descriptor| descriptor.path().to_string())
            .collect();

        let mut handles = Vec::with_capacity(paths.len());
        for path in paths {
            handles.push(self.open_feed(&path, OpenFeedOptions::default()).await?);
        }
        Ok(handles)
    }

    /// Close the feed at `path`. Errors `NotFound` for unknown paths.
    pub async fn close_feed(&self, path: &str) -> Result<(), FeedStoreError> {
        self.ensure_open().await?;
        let descriptor = self
            .get_descriptor_by_path(path)
            .ok_or_else(|| FeedStoreError::NotFound(path.to_string()))?;
        descriptor.close().await
    }

    /// Remove the index record and unregister the descriptor. Does NOT
    /// close the feed; an open handle stays live.
    pub async fn delete_descriptor(&self, path: &str) -> Result<(), FeedStoreError> {
        self.ensure_open().await?;
        let descriptor = self
            .get_descriptor_by_path(path)
            .ok_or_else(|| FeedStoreError::NotFound(path.to_string()))?;

        let releaser = descriptor.lock().await;
        match self.index().del(descriptor.key()).await {
            Ok(()) => {
                self.inner
                    .descriptors
                    .write()
                    .expect("descriptor map lock poisoned")
                    .remove(descriptor.discovery_key());
                info!(path = %path, "descriptor removed");
                let _ = self.inner.events.send(StoreEvent::DescriptorRemove {
                    descriptor: descriptor.clone(),
                });
                releaser.release();
                Ok(())
            }
            Err(err) => {
                releaser.release();
                Err(err)
            }
        }
    }

    /// Replace a descriptor's metadata and re-persist its record when one
    /// is already stored.
    pub async fn update_metadata(
        &self,
        path: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), FeedStoreError> {
        self.ensure_open().await?;
        let descriptor = self
            .get_descriptor_by_path(path)
            .ok_or_else(|| FeedStoreError::NotFound(path.to_string()))?;
        descriptor.set_metadata(metadata).await;
        let index = self.index();
        if index.get(descriptor.key()).await?.is_some() {
            index.put(&descriptor.record()).await?;
        }
        Ok(())
    }

    /// All registered descriptors.
    pub fn get_descriptors(&self) -> Vec<Arc<FeedDescriptor>> {
        self.inner
            .descriptors
            .read()
            .expect("descriptor map lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_descriptor_by_path(&self, path: &str) -> Option<Arc<FeedDescriptor>> {
        self.inner
            .descriptors
            .read()
            .expect("descriptor map lock poisoned")
            .values()
            .find(|descriptor| descriptor.path() == path)
            .cloned()
    }

    pub fn get_descriptor_by_discovery_key(
        &self,
        discovery_key: &DiscoveryKey,
    ) -> Option<Arc<FeedDescriptor>> {
        self.inner
            .descriptors
            .read()
            .expect("descriptor map lock poisoned")
            .get(discovery_key)
            .cloned()
    }

    /// Resolve a handle back to its descriptor.
    pub fn descriptor_of(&self, handle: &FeedHandle) -> Option<Arc<FeedDescriptor>> {
        self.get_descriptor_by_discovery_key(handle.discovery_key())
    }

    /// Handles for every currently open feed matching `filter`.
    pub fn get_open_feeds<F>(&self, filter: F) -> Vec<FeedHandle>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.get_descriptors()
            .into_iter()
            .filter(|descriptor| filter(descriptor))
            .filter_map(|descriptor| {
                descriptor
                    .feed()
                    .map(|log| FeedHandle::new(log, descriptor.codec()))
            })
            .collect()
    }

    /// The first open feed matching `filter`.
    pub fn get_open_feed<F>(&self, filter: F) -> Option<FeedHandle>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.get_open_feeds(filter).into_iter().next()
    }

    /// Close every descriptor, the readers and the index, then become
    /// `Closed`. The first descriptor failure is surfaced after every close
    /// was attempted; the store still reaches `Closed`.
    pub async fn close(&self) -> Result<(), FeedStoreError> {
        let releaser = self.inner.lock.acquire().await;
        if self.state() == StoreState::Closed {
            releaser.release();
            return Ok(());
        }
        self.set_state(StoreState::Closing);

        let descriptors = self.get_descriptors();
        let results =
            futures_util::future::join_all(descriptors.iter().map(|descriptor| descriptor.close()))
                .await;

        self.inner
            .descriptors
            .write()
            .expect("descriptor map lock poisoned")
            .clear();
        {
            let mut readers = self.inner.readers.lock().expect("readers lock poisoned");
            for port in readers.drain(..) {
                port.cancel.cancel();
            }
        }
        let index_result = self.index().close().await;

        self.set_state(StoreState::Closed);
        let _ = self.inner.events.send(StoreEvent::Closed);
        releaser.release();
        info!("feed store closed");

        for result in results {
            result?;
        }
        index_result
    }

    // ==================== Readers ====================

    /// Bulk merge stream over every open feed, with hot-attach of feeds
    /// opened later. On a closed store the stream immediately fails with
    /// `Closed`.
    pub fn create_read_stream(&self, opts: ReadOptions) -> BulkStream {
        self.create_read_stream_filtered(Arc::new(|_| FeedDecision::Include), opts)
    }

    /// Bulk merge stream with a per-descriptor filter; `defaults` applies
    /// to feeds the filter includes without options of their own.
    pub fn create_read_stream_filtered(
        &self,
        filter: BulkFilter,
        defaults: ReadOptions,
    ) -> BulkStream {
        if !self.serviceable() {
            return BulkStream::already_closed();
        }
        let (attach_rx, cancel) = self.register_reader();
        bulk::spawn(self.open_sources(), filter, defaults, attach_rx, cancel)
    }

    /// Per-message admission stream; see the selective reader.
    pub fn create_selective_stream(
        &self,
        evaluate: Evaluate,
        opts: ReadOptions,
    ) -> SelectiveStream {
        if !self.serviceable() {
            return SelectiveStream::already_closed();
        }
        let (attach_rx, cancel) = self.register_reader();
        selective::spawn(self.open_sources(), evaluate, opts, attach_rx, cancel)
    }

    /// Strictly-ordered admission stream; see the ordered reader.
    pub fn create_ordered_stream(&self, evaluate: Evaluate, opts: ReadOptions) -> OrderedStream {
        if !self.serviceable() {
            return OrderedStream::already_closed();
        }
        let (attach_rx, cancel) = self.register_reader();
        ordered::spawn(self.open_sources(), evaluate, opts, attach_rx, cancel)
    }

    fn serviceable(&self) -> bool {
        matches!(self.state(), StoreState::Opened | StoreState::Opening)
    }

    fn open_sources(&self) -> Vec<FeedSource> {
        self.get_descriptors()
            .into_iter()
            .filter_map(|descriptor| {
                descriptor.feed().map(|log| FeedSource {
                    descriptor: descriptor.clone(),
                    log,
                })
            })
            .collect()
    }

    fn register_reader(&self) -> (mpsc::UnboundedReceiver<FeedSource>, CancellationToken) {
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut readers = self.inner.readers.lock().expect("readers lock poisoned");
        readers.retain(|port| !port.attach.is_closed() && !port.cancel.is_cancelled());
        readers.push(ReaderPort {
            attach: attach_tx,
            cancel: cancel.clone(),
        });
        (attach_rx, cancel)
    }

    fn attach_readers(&self, descriptor: &Arc<FeedDescriptor>, log: &Arc<dyn Log>) {
        let mut readers = self.inner.readers.lock().expect("readers lock poisoned");
        readers.retain(|port| {
            if port.cancel.is_cancelled() {
                return false;
            }
            port.attach
                .send(FeedSource {
                    descriptor: descriptor.clone(),
                    log: log.clone(),
                })
                .is_ok()
        });
    }

    fn spawn_forwarder(&self, descriptor: Arc<FeedDescriptor>, handle: FeedHandle) {
        let events = self.inner.events.clone();
        let mut rx = handle.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LogEvent::Append { .. }) => {
                        let _ = events.send(StoreEvent::Append {
                            handle: handle.clone(),
                            descriptor: descriptor.clone(),
                        });
                    }
                    Ok(LogEvent::Download { seq }) => {
                        let _ = events.send(StoreEvent::Download {
                            seq,
                            handle: handle.clone(),
                            descriptor: descriptor.clone(),
                        });
                    }
                    Ok(LogEvent::Close) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }
}

impl std::fmt::Debug for FeedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStore")
            .field("state", &self.state())
            .field(
                "descriptors",
                &self
                    .inner
                    .descriptors
                    .read()
                    .expect("descriptor map lock poisoned")
                    .len(),
            )
            .finish_non_exhaustive()
    }
}
