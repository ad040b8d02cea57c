//! Selective reader
//!
//! Per-message admission with live tailing. Each feed's batch stream is
//! drained into a bounded lane; the reader sweeps the lanes, asks the
//! predicate about each message in order, and pushes admitted messages to
//! the output. A rejected message goes back to the head of its lane and the
//! sweep moves on to other feeds. After a sweep with no admissions the
//! reader suspends until any lane becomes readable; after an admission it
//! re-runs the sweep immediately, since the admission may have unlocked a
//! previously rejected message.

use super::batch::BatchStream;
use super::{Evaluate, FeedSource, ReadOptions, Record};
use crate::descriptor::FeedDescriptor;
use crate::error::FeedStoreError;
use futures_core::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bound on undrained records per feed lane.
const LANE_CAPACITY: usize = 256;

/// Handle to a running selective reader. Implements `Stream`.
pub struct SelectiveStream {
    rx: ReceiverStream<Result<Record, FeedStoreError>>,
    cancel: CancellationToken,
}

impl Stream for SelectiveStream {
    type Item = Result<Record, FeedStoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl SelectiveStream {
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

pub(crate) struct FeedLane {
    pub descriptor: Arc<FeedDescriptor>,
    pub rx: mpsc::Receiver<Result<Record, FeedStoreError>>,
    pub pending: VecDeque<Record>,
    pub done: bool,
}

/// What one sweep over a lane produced.
pub(crate) enum LaneSweep {
    /// Messages were admitted (count > 0) before the lane blocked or ran dry.
    Admitted(usize),
    /// The lane had nothing admissible right now.
    Blocked,
    /// The lane's pump reported an engine error; the reader must die.
    Failed(FeedStoreError),
}

impl FeedLane {
    pub(crate) fn new(descriptor: Arc<FeedDescriptor>) -> (Self, mpsc::Sender<Result<Record, FeedStoreError>>) {
        let (tx, rx) = mpsc::channel(LANE_CAPACITY);
        (
            Self {
                descriptor,
                rx,
                pending: VecDeque::new(),
                done: false,
            },
            tx,
        )
    }

    fn next_record(&mut self) -> Option<Result<Record, FeedStoreError>> {
        if let Some(record) = self.pending.pop_front() {
            return Some(Ok(record));
        }
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.done = true;
                None
            }
        }
    }

    /// Admit messages from the head of this lane until one is rejected or
    /// the lane runs dry.
    pub(crate) async fn sweep(
        &mut self,
        evaluate: &Evaluate,
        tx: &mpsc::Sender<Result<Record, FeedStoreError>>,
    ) -> LaneSweep {
        let mut admitted = 0usize;
        loop {
            let record = match self.next_record() {
                Some(Ok(record)) => record,
                Some(Err(err)) => return LaneSweep::Failed(err),
                None => break,
            };
            match evaluate(self.descriptor.clone(), record.clone()).await {
                Ok(true) => {
                    if tx.send(Ok(record)).await.is_err() {
                        // Consumer went away; treat as a dead lane so the
                        // reader loop can exit.
                        self.done = true;
                        break;
                    }
                    admitted += 1;
                }
                Ok(false) => {
                    self.pending.push_front(record);
                    break;
                }
                Err(message) => return LaneSweep::Failed(FeedStoreError::ReaderFailed(message)),
            }
        }
        if admitted > 0 {
            LaneSweep::Admitted(admitted)
        } else {
            LaneSweep::Blocked
        }
    }
}

/// Spawn the pump that drains one batch stream into its lane, waking the
/// reader whenever the lane becomes readable.
pub(crate) fn spawn_lane_pump(
    mut stream: BatchStream,
    tx: mpsc::Sender<Result<Record, FeedStoreError>>,
    readable: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            match stream.next_batch().await {
                Ok(Some(records)) => {
                    for record in records {
                        if tx.send(Ok(record)).await.is_err() {
                            readable.notify_one();
                            return;
                        }
                    }
                    readable.notify_one();
                }
                Ok(None) => {
                    readable.notify_one();
                    return;
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    readable.notify_one();
                    return;
                }
            }
        }
    });
}

pub(crate) fn spawn(
    sources: Vec<FeedSource>,
    evaluate: Evaluate,
    opts: ReadOptions,
    attach_rx: mpsc::UnboundedReceiver<FeedSource>,
    cancel: CancellationToken,
) -> SelectiveStream {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(sources, evaluate, opts, attach_rx, cancel.clone(), tx));
    SelectiveStream {
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
    let mut lanes: Vec<FeedLane> = Vec::new();
    for source in sources {
        attach(&mut lanes, &opts, &readable, source);
    }

    let live = opts.live;
    let mut attach_open = true;
    let mut pass = 0usize;
    loop {
        // Pick up hot-attached feeds before each sweep.
        while let Ok(source) = attach_rx.try_recv() {
            attach(&mut lanes, &opts, &readable, source);
        }

        let mut admitted = false;
        let count = lanes.len();
        // Rotate the sweep start so no feed is systematically favored;
        // cross-feed ordering is unspecified for this reader.
        let offset = if count > 0 { pass % count } else { 0 };
        for i in 0..count {
            let lane = &mut lanes[(i + offset) % count];
            match lane.sweep(&evaluate, &tx).await {
                LaneSweep::Admitted(_) => admitted = true,
                LaneSweep::Blocked => {}
                LaneSweep::Failed(err) => {
                    debug!(error = %err, "selective reader destroyed");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
        pass += 1;

        if admitted {
            // An admission may have flipped the predicate for a message we
            // pushed back this sweep; go around again.
            tokio::task::yield_now().await;
            continue;
        }

        if !live && lanes.iter().all(|lane| lane.done) {
            // Nothing upstream can wake us; any rejected remainder is
            // undeliverable.
            return;
        }
        if !attach_open && lanes.iter().all(|lane| lane.done) {
            // The store is gone and no lane can produce again; this sweep
            // admitted nothing, so nothing buffered can ever be unlocked.
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
