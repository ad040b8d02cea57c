//! Persistent feed index
//!
//! A thin typed wrapper over the injected key/value backend. One record per
//! feed under `"@feedstore/<hex(key)>"`, serialized as binary-preserving
//! JSON. Writes are elided when the encoded record matches what is already
//! stored, so reopening a feed does not rewrite the index.

use crate::buffer_json;
use crate::error::FeedStoreError;
use feedstore_model::{FeedKey, KvError, KvIndex, SecretKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Namespace prefix for feed records.
pub const RECORD_PREFIX: &str = "@feedstore/";

/// The persisted descriptor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub path: String,
    pub key: FeedKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<SecretKey>,
    pub value_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl FeedRecord {
    /// The index key this record is stored under.
    pub fn storage_key(key: &FeedKey) -> String {
        format!("{RECORD_PREFIX}{}", key.to_hex())
    }

    fn encode(&self) -> Result<Vec<u8>, FeedStoreError> {
        let value = serde_json::to_value(self).map_err(corrupt)?;
        buffer_json::encode(&value).map_err(corrupt)
    }

    fn decode(bytes: &[u8]) -> Result<Self, FeedStoreError> {
        let value = buffer_json::decode(bytes).map_err(corrupt)?;
        serde_json::from_value(value).map_err(corrupt)
    }
}

fn corrupt(err: serde_json::Error) -> FeedStoreError {
    FeedStoreError::Index(KvError::Corrupt(err.to_string()))
}

/// Typed view over the key/value backend.
#[derive(Clone)]
pub struct IndexDb {
    kv: Arc<dyn KvIndex>,
}

impl IndexDb {
    pub fn new(kv: Arc<dyn KvIndex>) -> Self {
        Self { kv }
    }

    pub async fn ready(&self) -> Result<(), FeedStoreError> {
        self.kv.ready().await?;
        Ok(())
    }

    /// All persisted feed records, in key order.
    pub async fn list(&self) -> Result<Vec<FeedRecord>, FeedStoreError> {
        let entries = self.kv.list(RECORD_PREFIX).await?;
        entries
            .iter()
            .map(|(_, bytes)| FeedRecord::decode(bytes))
            .collect()
    }

    pub async fn get(&self, key: &FeedKey) -> Result<Option<FeedRecord>, FeedStoreError> {
        match self.kv.get(&FeedRecord::storage_key(key)).await? {
            Some(bytes) => Ok(Some(FeedRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist `record`, skipping the write when the stored bytes already
    /// match. Returns whether a write happened.
    pub async fn put(&self, record: &FeedRecord) -> Result<bool, FeedStoreError> {
        let storage_key = FeedRecord::storage_key(&record.key);
        let encoded = record.encode()?;
        if let Some(stored) = self.kv.get(&storage_key).await? {
            if stored == encoded {
                return Ok(false);
            }
        }
        debug!(path = %record.path, "persisting feed record");
        self.kv.put(&storage_key, &encoded).await?;
        Ok(true)
    }

    pub async fn del(&self, key: &FeedKey) -> Result<(), FeedStoreError> {
        self.kv.del(&FeedRecord::storage_key(key)).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), FeedStoreError> {
        self.kv.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_json::bytes_value;
    use feedstore_model::{Keypair, Storage};
    use feedstore_storage::{FileKv, MemoryStorage};
    use serde_json::json;

    fn mem_index(storage: &MemoryStorage) -> IndexDb {
        IndexDb::new(Arc::new(FileKv::new(storage.open("index").unwrap())))
    }

    fn record(pair: &Keypair, path: &str) -> FeedRecord {
        FeedRecord {
            path: path.to_string(),
            key: pair.public,
            secret_key: Some(pair.secret),
            value_encoding: "utf-8".to_string(),
            metadata: Some(json!({"topic": "books"})),
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let storage = MemoryStorage::new();
        let index = mem_index(&storage);
        let pair = Keypair::generate();
        let rec = record(&pair, "/books");

        assert!(index.put(&rec).await.unwrap());
        let loaded = index.get(&pair.public).await.unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn test_put_elided_when_unchanged() {
        let storage = MemoryStorage::new();
        let index = mem_index(&storage);
        let rec = record(&Keypair::generate(), "/books");

        assert!(index.put(&rec).await.unwrap());
        assert!(!index.put(&rec).await.unwrap(), "second put should be elided");

        let mut changed = rec.clone();
        changed.metadata = Some(json!({"topic": "films"}));
        assert!(index.put(&changed).await.unwrap());
    }

    #[tokio::test]
    async fn test_binary_metadata_round_trip() {
        let storage = MemoryStorage::new();
        let index = mem_index(&storage);
        let pair = Keypair::generate();
        let mut rec = record(&pair, "/tokens");
        rec.metadata = Some(json!({"token": bytes_value(&[0u8, 255, 127])}));

        index.put(&rec).await.unwrap();
        let loaded = index.get(&pair.public).await.unwrap().unwrap();
        let token = &loaded.metadata.unwrap()["token"];
        assert_eq!(crate::buffer_json::as_bytes(token), Some(vec![0u8, 255, 127]));
    }

    #[tokio::test]
    async fn test_list_and_del() {
        let storage = MemoryStorage::new();
        let index = mem_index(&storage);
        let a = Keypair::generate();
        let b = Keypair::generate();
        index.put(&record(&a, "/a")).await.unwrap();
        index.put(&record(&b, "/b")).await.unwrap();

        assert_eq!(index.list().await.unwrap().len(), 2);

        index.del(&a.public).await.unwrap();
        let remaining = index.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, b.public);
        assert_eq!(index.get(&a.public).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_without_secret_or_metadata() {
        let storage = MemoryStorage::new();
        let index = mem_index(&storage);
        let pair = Keypair::generate();
        let rec = FeedRecord {
            path: "/readonly".into(),
            key: pair.public,
            secret_key: None,
            value_encoding: "binary".into(),
            metadata: None,
        };

        index.put(&rec).await.unwrap();
        assert_eq!(index.get(&pair.public).await.unwrap().unwrap(), rec);
    }
}
