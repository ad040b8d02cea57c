//! Store-level event fanout

use crate::descriptor::FeedDescriptor;
use crate::handle::FeedHandle;
use std::sync::Arc;

/// Events emitted by the store over its broadcast channel.
///
/// `Feed` fires once per open-to-close interval, strictly before any reader
/// observes a record from that feed. `Append`/`Download` are forwarded from
/// the engine, tagged with the owning descriptor.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The store finished initializing.
    Ready,
    /// The store fully closed.
    Closed,
    /// A feed was opened.
    Feed {
        handle: FeedHandle,
        descriptor: Arc<FeedDescriptor>,
    },
    /// A descriptor was deleted from the index and unregistered.
    DescriptorRemove { descriptor: Arc<FeedDescriptor> },
    /// A block was appended to an open feed.
    Append {
        handle: FeedHandle,
        descriptor: Arc<FeedDescriptor>,
    },
    /// A block became available on an open feed.
    Download {
        seq: u64,
        handle: FeedHandle,
        descriptor: Arc<FeedDescriptor>,
    },
}
