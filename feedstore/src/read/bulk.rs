//! Bulk reader
//!
//! Merges every matching feed into one unordered record stream. Per-feed
//! pump tasks push into a shared bounded channel, so a slow consumer
//! throttles all feeds uniformly. Feeds with blocks at creation form the
//! sync cohort: once each has delivered its snapshot head, the stream
//! publishes a `{hex(key) → seq}` watermark exactly once. Feeds attached
//! after creation never reopen the watermark.

use super::batch::BatchStream;
use super::{BulkFilter, FeedDecision, FeedSource, ReadOptions, Record};
use crate::error::FeedStoreError;
use feedstore_model::DiscoveryKey;
use futures_core::Stream;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Map published when a cohort finishes syncing: hex public key → last
/// delivered sequence.
pub type SyncMap = HashMap<String, u64>;

/// Handle to a running bulk reader. Implements `Stream`.
pub struct BulkStream {
    rx: ReceiverStream<Result<Record, FeedStoreError>>,
    synced_rx: watch::Receiver<Option<SyncMap>>,
    cancel: CancellationToken,
}

impl Stream for BulkStream {
    type Item = Result<Record, FeedStoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl BulkStream {
    /// End the stream and detach from the store.
    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    /// Wait for the cohort watermark. Resolves immediately when it already
    /// fired; returns `None` when the reader died before syncing.
    pub async fn synced(&mut self) -> Option<SyncMap> {
        match self.synced_rx.wait_for(|value| value.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }

    /// The watermark, when it has fired.
    pub fn synced_now(&self) -> Option<SyncMap> {
        self.synced_rx.borrow().clone()
    }

    /// A stream that immediately fails with `Closed`; returned when a
    /// reader is requested from a closed store.
    pub(crate) fn already_closed() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(FeedStoreError::Closed));
        let (_synced_tx, synced_rx) = watch::channel(None);
        Self {
            rx: ReceiverStream::new(rx),
            synced_rx,
            cancel: CancellationToken::new(),
        }
    }
}

struct SyncState {
    pending: HashSet<DiscoveryKey>,
    collected: SyncMap,
    fired: bool,
}

pub(crate) fn spawn(
    sources: Vec<FeedSource>,
    filter: BulkFilter,
    defaults: ReadOptions,
    attach_rx: mpsc::UnboundedReceiver<FeedSource>,
    cancel: CancellationToken,
) -> BulkStream {
    let (tx, rx) = mpsc::channel(64);
    let (synced_tx, synced_rx) = watch::channel(None);
    tokio::spawn(run(
        sources,
        filter,
        defaults,
        attach_rx,
        cancel.clone(),
        tx,
        synced_tx,
    ));
    BulkStream {
        rx: ReceiverStream::new(rx),
        synced_rx,
        cancel,
    }
}

async fn run(
    sources: Vec<FeedSource>,
    filter: BulkFilter,
    defaults: ReadOptions,
    mut attach_rx: mpsc::UnboundedReceiver<FeedSource>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<Record, FeedStoreError>>,
    synced_tx: watch::Sender<Option<SyncMap>>,
) {
    let live = defaults.live;
    let sync = Arc::new(StdMutex::new(SyncState {
        pending: HashSet::new(),
        collected: SyncMap::new(),
        fired: false,
    }));

    // Build every cohort stream before pumping, so the watermark covers all
    // feeds present at creation.
    let mut streams = Vec::new();
    for source in &sources {
        if let Some(stream) = open_stream(&filter, &defaults, source) {
            if stream.sync_pending() {
                let mut state = sync.lock().expect("sync state lock poisoned");
                state.pending.insert(*source.descriptor.discovery_key());
            }
            streams.push(stream);
        }
    }
    maybe_fire(&sync, &synced_tx);

    let mut pumps = JoinSet::new();
    for stream in streams {
        spawn_pump(&mut pumps, stream, tx.clone(), sync.clone(), synced_tx.clone());
    }

    let mut attach_open = true;
    loop {
        if pumps.is_empty() && (!live || !attach_open) {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                pumps.abort_all();
                break;
            }
            source = attach_rx.recv(), if attach_open => match source {
                Some(source) => {
                    if live {
                        if let Some(stream) = open_stream(&filter, &defaults, &source) {
                            debug!(path = %source.descriptor.path(), "bulk reader hot-attach");
                            spawn_pump(&mut pumps, stream, tx.clone(), sync.clone(), synced_tx.clone());
                        }
                    }
                }
                None => attach_open = false,
            },
            joined = pumps.join_next(), if !pumps.is_empty() => {
                let _ = joined;
            }
        }
    }
}

fn open_stream(
    filter: &BulkFilter,
    defaults: &ReadOptions,
    source: &FeedSource,
) -> Option<BatchStream> {
    let opts = match filter(&source.descriptor) {
        FeedDecision::Skip => return None,
        FeedDecision::Include => defaults.clone(),
        FeedDecision::IncludeWith(opts) => opts,
    };
    Some(BatchStream::new(source, opts))
}

fn spawn_pump(
    pumps: &mut JoinSet<()>,
    mut stream: BatchStream,
    tx: mpsc::Sender<Result<Record, FeedStoreError>>,
    sync: Arc<StdMutex<SyncState>>,
    synced_tx: watch::Sender<Option<SyncMap>>,
) {
    let discovery_key = *stream.descriptor().discovery_key();
    let key_hex = stream.descriptor().key().to_hex();
    pumps.spawn(async move {
        loop {
            match stream.next_batch().await {
                Ok(Some(records)) => {
                    for record in records {
                        let sync_seq = record.sync.then_some(record.seq);
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                        if let Some(seq) = sync_seq {
                            mark_synced(&sync, &synced_tx, &discovery_key, &key_hex, seq);
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });
}

fn mark_synced(
    sync: &Arc<StdMutex<SyncState>>,
    synced_tx: &watch::Sender<Option<SyncMap>>,
    discovery_key: &DiscoveryKey,
    key_hex: &str,
    seq: u64,
) {
    let mut state = sync.lock().expect("sync state lock poisoned");
    if state.fired || !state.pending.remove(discovery_key) {
        return;
    }
    state.collected.insert(key_hex.to_string(), seq);
    if state.pending.is_empty() {
        state.fired = true;
        debug!(feeds = state.collected.len(), "bulk reader synced");
        let _ = synced_tx.send(Some(state.collected.clone()));
    }
}

fn maybe_fire(sync: &Arc<StdMutex<SyncState>>, synced_tx: &watch::Sender<Option<SyncMap>>) {
    let mut state = sync.lock().expect("sync state lock poisoned");
    if !state.fired && state.pending.is_empty() {
        state.fired = true;
        let _ = synced_tx.send(Some(state.collected.clone()));
    }
}
