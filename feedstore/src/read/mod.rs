//! Reader family
//!
//! Three composable read strategies over the store's feeds, all supporting
//! live tailing and hot-attach of newly opened feeds:
//! - **bulk**: merge every matching feed, unordered, with a per-cohort
//!   `synced` watermark
//! - **selective**: per-message admission through an async predicate
//! - **ordered**: admission that never advances a feed past a rejected head

pub mod batch;
pub mod bulk;
pub mod ordered;
pub mod selective;

use crate::descriptor::FeedDescriptor;
use futures_core::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use batch::BatchStream;
pub use bulk::BulkStream;
pub use ordered::OrderedStream;
pub use selective::SelectiveStream;

/// One message delivered by a reader.
#[derive(Debug, Clone)]
pub struct Record {
    /// Decoded block value.
    pub data: feedstore_model::BlockValue,
    /// Sequence number within the owning feed.
    pub seq: u64,
    /// Set on the element that crosses the feed's head as observed when the
    /// batch stream was created.
    pub sync: bool,
    /// Public key of the owning feed.
    pub key: feedstore_model::FeedKey,
    /// Logical path of the owning feed; populated with `feed_store_info`.
    pub path: Option<String>,
    /// Descriptor metadata; populated with `feed_store_info`.
    pub metadata: Option<serde_json::Value>,
}

/// Per-feed read configuration.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// First sequence number to emit.
    pub start: u64,
    /// One past the last sequence number to emit; `None` reads to the head.
    pub end: Option<u64>,
    /// Keep the stream open past the current head.
    pub live: bool,
    /// Fix the end of a non-live read at the length observed on creation.
    pub snapshot: bool,
    /// Start at the current head instead of `start`.
    pub tail: bool,
    /// Blocks fetched per engine round-trip.
    pub batch_size: usize,
    /// Enrich records with path and metadata.
    pub feed_store_info: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            live: false,
            snapshot: true,
            tail: false,
            batch_size: 100,
            feed_store_info: false,
        }
    }
}

impl ReadOptions {
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    pub fn end(mut self, end: u64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn tail(mut self, tail: bool) -> Self {
        self.tail = tail;
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn feed_store_info(mut self, on: bool) -> Self {
        self.feed_store_info = on;
        self
    }
}

/// A bulk filter's verdict for one descriptor.
pub enum FeedDecision {
    /// Leave the feed out of the stream.
    Skip,
    /// Include the feed with the stream's default options.
    Include,
    /// Include the feed with its own options.
    IncludeWith(ReadOptions),
}

/// Maps a descriptor to a `FeedDecision` when a bulk stream attaches feeds.
pub type BulkFilter = Arc<dyn Fn(&FeedDescriptor) -> FeedDecision + Send + Sync>;

/// Async admission predicate for the selective and ordered readers.
///
/// An `Err` destroys the owning reader; other readers and the store are
/// unaffected.
pub type Evaluate = Arc<
    dyn Fn(Arc<FeedDescriptor>, Record) -> BoxFuture<'static, Result<bool, String>> + Send + Sync,
>;

/// An opened feed handed to a reader, either at creation or hot-attached on
/// a later `feed` event.
#[derive(Clone)]
pub(crate) struct FeedSource {
    pub descriptor: Arc<FeedDescriptor>,
    pub log: Arc<dyn feedstore_model::Log>,
}

/// The store's side of a live reader: where to send hot-attached feeds and
/// how to tear the reader down on store close.
pub(crate) struct ReaderPort {
    pub attach: mpsc::UnboundedSender<FeedSource>,
    pub cancel: CancellationToken,
}
