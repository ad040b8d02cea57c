//! Per-feed batch stream
//!
//! Pulls contiguous block batches from one engine instance. The head length
//! observed at creation is the sync snapshot: the element that crosses it
//! carries `sync == true` exactly once. Live streams wake on append events
//! and end when the feed closes.

use super::{FeedSource, ReadOptions, Record};
use crate::descriptor::FeedDescriptor;
use crate::error::FeedStoreError;
use feedstore_model::{BlockCodec, Log, LogEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct BatchStream {
    descriptor: Arc<FeedDescriptor>,
    log: Arc<dyn Log>,
    codec: Arc<dyn BlockCodec>,
    opts: ReadOptions,
    cursor: u64,
    /// Fixed upper bound, from `end` or the snapshot length.
    fixed_end: Option<u64>,
    /// Seq of the last block present at creation, when any lies ahead of
    /// the cursor.
    sync_target: Option<u64>,
    sync_done: bool,
    events: broadcast::Receiver<LogEvent>,
}

impl BatchStream {
    pub(crate) fn new(source: &FeedSource, opts: ReadOptions) -> Self {
        // Subscribe before sampling the length so no append slips between.
        let events = source.log.subscribe();
        let len = source.log.len();
        let cursor = if opts.tail { len } else { opts.start };
        let sync_target = if len > 0 && cursor < len {
            Some(len - 1)
        } else {
            None
        };
        let fixed_end = opts.end.or(if opts.snapshot && !opts.live {
            Some(len)
        } else {
            None
        });

        Self {
            descriptor: source.descriptor.clone(),
            codec: source.descriptor.codec(),
            log: source.log.clone(),
            opts,
            cursor,
            fixed_end,
            sync_target,
            sync_done: false,
            events,
        }
    }

    pub(crate) fn descriptor(&self) -> &Arc<FeedDescriptor> {
        &self.descriptor
    }

    /// True while this stream still owes a `sync` marker.
    pub(crate) fn sync_pending(&self) -> bool {
        self.sync_target.is_some() && !self.sync_done
    }

    /// Next contiguous batch, or `None` when the range is exhausted or the
    /// feed closed. Suspends on live streams until more blocks land.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Record>>, FeedStoreError> {
        loop {
            if self.log.is_closed() {
                return Ok(None);
            }

            let len = self.log.len();
            let upper = self.fixed_end.map_or(len, |end| end.min(len));
            if self.cursor < upper {
                let to = (self.cursor + self.opts.batch_size as u64).min(upper);
                let blocks = self.log.get_batch(self.cursor, to).await?;
                if blocks.is_empty() {
                    // The feed shrank our window between len() and the read.
                    continue;
                }

                let mut records = Vec::with_capacity(blocks.len());
                for (i, bytes) in blocks.iter().enumerate() {
                    records.push(self.record(self.cursor + i as u64, bytes)?);
                }

                if !self.sync_done {
                    if let Some(target) = self.sync_target {
                        let last_seq = self.cursor + records.len() as u64 - 1;
                        if last_seq >= target {
                            self.sync_done = true;
                            if let Some(last) = records.last_mut() {
                                last.sync = true;
                            }
                        }
                    }
                }

                self.cursor += records.len() as u64;
                return Ok(Some(records));
            }

            if self.fixed_end.is_some_and(|end| self.cursor >= end) {
                return Ok(None);
            }
            if !self.opts.live {
                return Ok(None);
            }

            match self.events.recv().await {
                Ok(LogEvent::Append { .. }) | Ok(LogEvent::Download { .. }) => continue,
                Ok(LogEvent::Close) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    fn record(&self, seq: u64, bytes: &[u8]) -> Result<Record, FeedStoreError> {
        let data = self.codec.decode(bytes)?;
        let (path, metadata) = if self.opts.feed_store_info {
            (
                Some(self.descriptor.path().to_string()),
                self.descriptor.metadata(),
            )
        } else {
            (None, None)
        };
        Ok(Record {
            data,
            seq,
            sync: false,
            key: *self.descriptor.key(),
            path,
            metadata,
        })
    }
}
