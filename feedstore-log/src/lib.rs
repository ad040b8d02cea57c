//! Feedstore Log
//!
//! The default append-only log engine:
//! - **BlockLog**: length-indexed block records over two storage containers,
//!   blake3 content hashes, Ed25519 append signatures when writable
//! - **BlockLogFactory**: the `LogFactory` the store uses unless a caller
//!   injects a different engine

pub mod block_log;
pub mod factory;

pub use block_log::{BlockLog, MAX_BLOCK_SIZE};
pub use factory::BlockLogFactory;
