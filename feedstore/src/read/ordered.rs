//! Ordered reader
//!
//! Same admission predicate as the selective reader, but the pass visits
//! feeds in attachment order and a feed whose head is rejected is not
//! advanced this pass. The output therefore interleaves feeds
//! deterministically pass by pass while preserving each feed's internal
//! sequence, which lets callers encode cross-feed ordering constraints in
//! the predicate ("a message from feed A only after K messages from feed
//! B").

use super::selective::{spawn_lane_pump, FeedLane, LaneSweep};
use super::{BatchStream, Evaluate, FeedSource, ReadOptions, Record};
use crate::error::FeedStoreError;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a running ordered reader. Implements `Stream`.
pub struct OrderedStream {
    rx: ReceiverStream<Result<Record, FeedStoreError>>,
    cancel: CancellationToken,
}

impl Stream for OrderedStream {
    type Item = Result<Record, FeedStoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl OrderedStream {
    /// End the stream and detach from the store.
    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn already_closed() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(FeedStoreError::Closed));
        Self {
            rx: ReceiverStream::new(rx),
            cancel: CancellationToken::new(),
        }
    }
}

pub(crate) fn spawn(
    sources: Vec<FeedSource>,
    evaluate: Evaluate,
    opts: ReadOptions,
    attach_rx: mpsc::UnboundedReceiver<FeedSource>,
    cancel: CancellationToken,
) -> OrderedStream {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(sources, evaluate, opts, attach_rx, cancel.clone(), tx));
    OrderedStream {
        rx: ReceiverStream::new(rx),
        cancel,
    }
}

async fn run(
    sources: Vec<FeedSource>,
    evaluate: Evaluate,
    opts: ReadOptions,
    mut attach_rx: mpsc::UnboundedReceiver<FeedSource>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<Record, FeedStoreError>>,
) {
    let readable = Arc::new(Notify::new());
    // Attachment order is the iteration order for every pass.
    let mut lanes: Vec<FeedLane> = Vec::new();
    for source in sources {
        attach(&mut lanes, &opts, &readable, source);
    }

    let live = opts.live;
    let mut attach_open = true;
    loop {
        while let Ok(source) = attach_rx.try_recv() {
            attach(&mut lanes, &opts, &readable, source);
        }

        let mut admitted = false;
        for lane in lanes.iter_mut() {
            // A rejected head parks this feed until the next pass; the
            // lane never advances past it.
            match lane.sweep(&evaluate, &tx).await {
                LaneSweep::Admitted(_) => admitted = true,
                LaneSweep::Blocked => {}
                LaneSweep::Failed(err) => {
                    debug!(error = %err, "ordered reader destroyed");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }

        if admitted {
            tokio::task::yield_now().await;
            continue;
        }

        if !live && lanes.iter().all(|lane| lane.done) {
            return;
        }
        if !attach_open && lanes.iter().all(|lane| lane.done) {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = readable.notified() => {}
            source = attach_rx.recv(), if attach_open => match source {
                Some(source) => attach(&mut lanes, &opts, &readable, source),
                None => attach_open = false,
            },
        }
    }
}

fn attach(
    lanes: &mut Vec<FeedLane>,
    opts: &ReadOptions,
    readable: &Arc<Notify>,
    source: FeedSource,
) {
    if lanes
        .iter()
        .any(|lane| !lane.done && lane.descriptor.discovery_key() == source.descriptor.discovery_key())
    {
        return;
    }
    let stream = BatchStream::new(&source, opts.clone());
    let (lane, lane_tx) = FeedLane::new(source.descriptor);
    spawn_lane_pump(stream, lane_tx, readable.clone());
    lanes.push(lane);
}
