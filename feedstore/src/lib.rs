//! Feedstore
//!
//! A collection of append-only, cryptographically keyed feeds over a
//! pluggable storage backend, with:
//! - **FeedStore**: atomic open/close/delete of feeds under concurrent
//!   callers, with store-level event fanout
//! - **FeedDescriptor**: per-feed metadata and state machine, persisted in
//!   a durable path index and reloaded across restarts
//! - **Readers**: bulk merge with sync detection, selective per-message
//!   admission, and strict cross-feed ordered admission, all live-tailing
//!   and hot-attaching newly opened feeds
//!
//! ```ignore
//! let storage = Arc::new(DiskStorage::new(dir)?);
//! let store = FeedStore::create(storage, FeedStoreOptions::new()
//!     .value_encoding("utf-8")).await?;
//! let books = store.open_feed("/books", OpenFeedOptions::new()).await?;
//! books.append("Foundation and Empire").await?;
//! ```

pub mod buffer_json;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod handle;
pub mod index_db;
pub mod mutex;
pub mod read;
pub mod store;

pub use descriptor::{DescriptorEvent, DescriptorState, FeedDescriptor, DEFAULT_TIMEOUT};
pub use error::FeedStoreError;
pub use events::StoreEvent;
pub use handle::FeedHandle;
pub use index_db::{FeedRecord, IndexDb, RECORD_PREFIX};
pub use mutex::{Mutex, Releaser};
pub use read::{
    BatchStream, BulkFilter, BulkStream, Evaluate, FeedDecision, OrderedStream, ReadOptions,
    Record, SelectiveStream,
};
pub use store::{FeedStore, FeedStoreOptions, OpenFeedOptions, StoreState};

// The model and default backends, re-exported for callers.
pub use feedstore_log::{BlockLog, BlockLogFactory};
pub use feedstore_model::{
    discovery_key, BlockCodec, BlockValue, CodecRegistry, DiscoveryKey, FeedKey, Keypair,
    KvIndex, Log, LogError, LogEvent, LogFactory, LogOptions, RandomAccess, RootedStorage,
    SecretKey, Storage, StorageError,
};
pub use feedstore_storage::{DiskStorage, FileKv, MemoryStorage};
