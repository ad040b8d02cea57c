//! Block log I/O for append-only feed storage
//!
//! Each feed owns two containers on the injected storage:
//! - `data`: raw block payloads, back to back
//! - `index`: one fixed-width entry per block:
//!   `offset u64 | len u32 | blake3 hash [32] | ed25519 sig [64]`
//!
//! The index is loaded into memory on ready; reads verify the stored hash.
//! Appends sign the block hash when the log is writable.

use feedstore_model::{
    keys, DiscoveryKey, FeedKey, Log, LogError, LogEvent, RandomAccess, SecretKey,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Size of one index entry on disk.
const INDEX_ENTRY_SIZE: u64 = 8 + 4 + 32 + 64;

/// Maximum size of a single block (16 MB)
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// In-memory view of one index entry. The signature stays on disk.
#[derive(Clone, Copy)]
struct IndexEntry {
    offset: u64,
    len: u32,
    hash: [u8; 32],
}

struct LogState {
    entries: Vec<IndexEntry>,
    data_len: u64,
    loaded: bool,
}

/// Append-only block log over two random-access containers.
pub struct BlockLog {
    key: FeedKey,
    discovery_key: DiscoveryKey,
    secret: Option<SecretKey>,
    data: Arc<dyn RandomAccess>,
    index: Arc<dyn RandomAccess>,
    state: Mutex<LogState>,
    length: AtomicU64,
    opened: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<LogEvent>,
}

impl BlockLog {
    /// Build a log over `data` and `index` containers. The instance is not
    /// usable until `ready()` has loaded the index.
    pub fn new(
        key: FeedKey,
        secret: Option<SecretKey>,
        data: Arc<dyn RandomAccess>,
        index: Arc<dyn RandomAccess>,
    ) -> Result<Self, LogError> {
        if let Some(secret) = &secret {
            keys::verify_pair(&key, secret).map_err(|_| LogError::SecretKeyMismatch)?;
        }
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            discovery_key: keys::discovery_key(&key),
            key,
            secret,
            data,
            index,
            state: Mutex::new(LogState {
                entries: Vec::new(),
                data_len: 0,
                loaded: false,
            }),
            length: AtomicU64::new(0),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events,
        })
    }

    fn guard_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        if !self.opened.load(Ordering::Acquire) {
            return Err(LogError::Engine("log not ready".into()));
        }
        Ok(())
    }

    async fn load(&self, state: &mut LogState) -> Result<(), LogError> {
        let index_len = self.index.len().await?;
        if index_len % INDEX_ENTRY_SIZE != 0 {
            return Err(LogError::Corrupt(format!(
                "index length {index_len} not a multiple of {INDEX_ENTRY_SIZE}"
            )));
        }

        let count = index_len / INDEX_ENTRY_SIZE;
        let mut entries = Vec::with_capacity(count as usize);
        let mut data_len = 0u64;
        if count > 0 {
            let bytes = self.index.read(0, index_len).await?;
            for seq in 0..count {
                let at = (seq * INDEX_ENTRY_SIZE) as usize;
                let offset = u64::from_le_bytes(bytes[at..at + 8].try_into().expect("8 bytes"));
                let len = u32::from_le_bytes(bytes[at + 8..at + 12].try_into().expect("4 bytes"));
                let hash: [u8; 32] = bytes[at + 12..at + 44].try_into().expect("32 bytes");
                if offset != data_len {
                    return Err(LogError::Corrupt(format!(
                        "index entry {seq} offset {offset}, expected {data_len}"
                    )));
                }
                data_len += len as u64;
                entries.push(IndexEntry { offset, len, hash });
            }
        }

        debug!(key = %self.key, blocks = entries.len(), "block log ready");
        self.length.store(entries.len() as u64, Ordering::Release);
        state.entries = entries;
        state.data_len = data_len;
        state.loaded = true;
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    async fn read_block(&self, seq: u64, entry: IndexEntry) -> Result<Vec<u8>, LogError> {
        let block = self.data.read(entry.offset, entry.len as u64).await?;
        let hash: [u8; 32] = blake3::hash(&block).into();
        if hash != entry.hash {
            return Err(LogError::HashMismatch(seq));
        }
        Ok(block)
    }

    fn entry(&self, state: &LogState, seq: u64) -> Result<IndexEntry, LogError> {
        state
            .entries
            .get(seq as usize)
            .copied()
            .ok_or(LogError::OutOfRange {
                seq,
                length: state.entries.len() as u64,
            })
    }
}

#[async_trait::async_trait]
impl Log for BlockLog {
    async fn ready(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        let mut state = self.state.lock().await;
        if state.loaded {
            return Ok(());
        }
        self.load(&mut state).await
    }

    async fn append(&self, block: &[u8]) -> Result<u64, LogError> {
        self.guard_open()?;
        let Some(secret) = &self.secret else {
            return Err(LogError::NotWritable);
        };
        if block.len() > MAX_BLOCK_SIZE {
            return Err(LogError::Engine(format!(
                "block too large: {} bytes",
                block.len()
            )));
        }

        let mut state = self.state.lock().await;
        let seq = state.entries.len() as u64;
        let offset = state.data_len;
        let hash: [u8; 32] = blake3::hash(block).into();
        let sig = keys::sign(secret, &hash);

        self.data.write(offset, block).await?;

        let mut entry_bytes = [0u8; INDEX_ENTRY_SIZE as usize];
        entry_bytes[0..8].copy_from_slice(&offset.to_le_bytes());
        entry_bytes[8..12].copy_from_slice(&(block.len() as u32).to_le_bytes());
        entry_bytes[12..44].copy_from_slice(&hash);
        entry_bytes[44..108].copy_from_slice(&sig);
        self.index
            .write(seq * INDEX_ENTRY_SIZE, &entry_bytes)
            .await?;

        state.entries.push(IndexEntry {
            offset,
            len: block.len() as u32,
            hash,
        });
        state.data_len += block.len() as u64;
        let new_len = state.entries.len() as u64;
        self.length.store(new_len, Ordering::Release);
        drop(state);

        let _ = self.events.send(LogEvent::Append { length: new_len });
        Ok(seq)
    }

    async fn get(&self, seq: u64) -> Result<Vec<u8>, LogError> {
        self.guard_open()?;
        let entry = {
            let state = self.state.lock().await;
            self.entry(&state, seq)?
        };
        self.read_block(seq, entry).await
    }

    async fn get_batch(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, LogError> {
        self.guard_open()?;
        let entries: Vec<(u64, IndexEntry)> = {
            let state = self.state.lock().await;
            let end = end.min(state.entries.len() as u64);
            (start..end)
                .map(|seq| self.entry(&state, seq).map(|e| (seq, e)))
                .collect::<Result<_, _>>()?
        };

        let mut blocks = Vec::with_capacity(entries.len());
        for (seq, entry) in entries {
            blocks.push(self.read_block(seq, entry).await?);
        }
        Ok(blocks)
    }

    async fn head(&self) -> Result<Option<Vec<u8>>, LogError> {
        self.guard_open()?;
        let length = self.len();
        if length == 0 {
            return Ok(None);
        }
        self.get(length - 1).await.map(Some)
    }

    async fn download(&self, start: u64, end: u64) -> Result<(), LogError> {
        self.guard_open()?;
        // Local engine: every indexed block is already present.
        let end = end.min(self.len());
        for seq in start..end {
            let _ = self.events.send(LogEvent::Download { seq });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.events.send(LogEvent::Close);
        self.data.close().await?;
        self.index.close().await?;
        debug!(key = %self.key, "block log closed");
        Ok(())
    }

    fn len(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    fn key(&self) -> &FeedKey {
        &self.key
    }

    fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    fn writable(&self) -> bool {
        self.secret.is_some()
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire) && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedstore_model::{Keypair, Storage};
    use feedstore_storage::MemoryStorage;

    fn open_log(storage: &MemoryStorage, pair: &Keypair) -> BlockLog {
        let root = pair.public.to_hex();
        BlockLog::new(
            pair.public,
            Some(pair.secret),
            storage.open(&format!("{root}/data")).unwrap(),
            storage.open(&format!("{root}/index")).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();

        assert_eq!(log.append(b"one").await.unwrap(), 0);
        assert_eq!(log.append(b"two").await.unwrap(), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).await.unwrap(), b"one");
        assert_eq!(log.get(1).await.unwrap(), b"two");
        assert_eq!(log.head().await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_get_out_of_range() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();
        log.append(b"only").await.unwrap();

        assert!(matches!(
            log.get(1).await,
            Err(LogError::OutOfRange { seq: 1, length: 1 })
        ));
    }

    #[tokio::test]
    async fn test_get_batch_clamps_to_length() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();
        for i in 0..5u8 {
            log.append(&[i]).await.unwrap();
        }

        let batch = log.get_batch(2, 100).await.unwrap();
        assert_eq!(batch, vec![vec![2u8], vec![3], vec![4]]);
        assert!(log.get_batch(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_preserves_blocks() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        {
            let log = open_log(&storage, &pair);
            log.ready().await.unwrap();
            log.append(b"Foundation and Empire").await.unwrap();
            log.close().await.unwrap();
        }

        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.head().await.unwrap(),
            Some(b"Foundation and Empire".to_vec())
        );
    }

    #[tokio::test]
    async fn test_read_only_log_rejects_append() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        {
            let log = open_log(&storage, &pair);
            log.ready().await.unwrap();
            log.append(b"from writer").await.unwrap();
            log.close().await.unwrap();
        }

        let root = pair.public.to_hex();
        let log = BlockLog::new(
            pair.public,
            None,
            storage.open(&format!("{root}/data")).unwrap(),
            storage.open(&format!("{root}/index")).unwrap(),
        )
        .unwrap();
        log.ready().await.unwrap();

        assert!(!log.writable());
        assert_eq!(log.get(0).await.unwrap(), b"from writer");
        assert!(matches!(log.append(b"nope").await, Err(LogError::NotWritable)));
    }

    #[tokio::test]
    async fn test_mismatched_secret_rejected() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let other = Keypair::generate();
        let result = BlockLog::new(
            pair.public,
            Some(other.secret),
            storage.open("a/data").unwrap(),
            storage.open("a/index").unwrap(),
        );
        assert!(matches!(result, Err(LogError::SecretKeyMismatch)));
    }

    #[tokio::test]
    async fn test_corrupted_block_detected() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let root = pair.public.to_hex();
        {
            let log = open_log(&storage, &pair);
            log.ready().await.unwrap();
            log.append(b"original").await.unwrap();
            log.close().await.unwrap();
        }

        // Flip a byte in the payload.
        let data = storage.open(&format!("{root}/data")).unwrap();
        data.write(0, b"X").await.unwrap();

        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();
        assert!(matches!(log.get(0).await, Err(LogError::HashMismatch(0))));
    }

    #[tokio::test]
    async fn test_truncated_index_detected() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let root = pair.public.to_hex();
        {
            let log = open_log(&storage, &pair);
            log.ready().await.unwrap();
            log.append(b"block").await.unwrap();
            log.close().await.unwrap();
        }

        let index = storage.open(&format!("{root}/index")).unwrap();
        let len = index.len().await.unwrap();
        index.truncate(len - 1).await.unwrap();

        let log = open_log(&storage, &pair);
        assert!(matches!(log.ready().await, Err(LogError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_append_event_emitted() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();

        let mut events = log.subscribe();
        log.append(b"x").await.unwrap();

        match events.recv().await.unwrap() {
            LogEvent::Append { length } => assert_eq!(length, 1),
            other => panic!("expected append event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let storage = MemoryStorage::new();
        let pair = Keypair::generate();
        let log = open_log(&storage, &pair);
        log.ready().await.unwrap();
        log.close().await.unwrap();
        log.close().await.unwrap();

        assert!(log.is_closed());
        assert!(matches!(log.get(0).await, Err(LogError::Closed)));
        assert!(matches!(log.ready().await, Err(LogError::Closed)));
    }
}
