//! Feedstore Model
//!
//! Pure data types and traits for the feedstore system, decoupled from
//! storage backends, log engines and the store orchestrator:
//! - **Types**: strong byte-array types for feed key material
//! - **Keys**: Ed25519 keypairs and discovery-key derivation
//! - **Codec**: named value codecs (`binary`, `utf-8`, `json`)
//! - **Storage**: named random-access byte containers
//! - **Kv**: durable string-keyed map with prefix listing
//! - **Log**: the append-only log engine contract

pub mod codec;
pub mod keys;
pub mod kv;
pub mod log;
pub mod storage;
pub mod types;

pub use codec::{BinaryCodec, BlockCodec, BlockValue, CodecError, CodecRegistry, JsonCodec, Utf8Codec};
pub use keys::{discovery_key, public_from_secret, verify_pair, KeyError, Keypair};
pub use kv::{KvError, KvIndex};
pub use log::{Log, LogError, LogEvent, LogFactory, LogOptions};
pub use storage::{rooted, RandomAccess, RootedStorage, Storage, StorageError};
pub use types::{DiscoveryKey, FeedKey, KeyParseError, SecretKey};
