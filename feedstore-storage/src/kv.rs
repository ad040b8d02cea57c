//! Storage-rooted key/value index
//!
//! A durable `BTreeMap<String, Vec<u8>>` over a single random-access
//! container. The whole map is rewritten on each mutation; the feed index
//! holds one small record per feed, so snapshots stay tiny.
//!
//! On-disk layout:
//! `magic "FKV1" | count u32 | (klen u32 | key | vlen u32 | value)*`
//! all integers little-endian.

use feedstore_model::{KvError, KvIndex, RandomAccess};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const MAGIC: &[u8; 4] = b"FKV1";

/// Maximum size of a single key or value (16 MB)
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

struct Inner {
    entries: BTreeMap<String, Vec<u8>>,
    loaded: bool,
    closed: bool,
}

/// Persistent string-keyed map over one storage container.
pub struct FileKv {
    file: Arc<dyn RandomAccess>,
    inner: Mutex<Inner>,
}

impl FileKv {
    pub fn new(file: Arc<dyn RandomAccess>) -> Self {
        Self {
            file,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                loaded: false,
                closed: false,
            }),
        }
    }

    async fn load(&self, inner: &mut Inner) -> Result<(), KvError> {
        let len = self.file.len().await?;
        if len == 0 {
            inner.loaded = true;
            return Ok(());
        }

        let bytes = self.file.read(0, len).await?;
        let mut entries = BTreeMap::new();
        let mut cursor = Cursor::new(&bytes);

        let magic = cursor.take(4)?;
        if magic != MAGIC.as_slice() {
            return Err(KvError::Corrupt("bad magic".into()));
        }
        let count = cursor.u32()?;
        for _ in 0..count {
            let klen = cursor.u32()? as usize;
            if klen > MAX_RECORD_SIZE {
                return Err(KvError::Corrupt(format!("key too large: {klen}")));
            }
            let key = String::from_utf8(cursor.take(klen)?.to_vec())
                .map_err(|e| KvError::Corrupt(format!("key not utf-8: {e}")))?;
            let vlen = cursor.u32()? as usize;
            if vlen > MAX_RECORD_SIZE {
                return Err(KvError::Corrupt(format!("value too large: {vlen}")));
            }
            entries.insert(key, cursor.take(vlen)?.to_vec());
        }

        debug!(entries = entries.len(), "loaded index snapshot");
        inner.entries = entries;
        inner.loaded = true;
        Ok(())
    }

    async fn flush(&self, inner: &Inner) -> Result<(), KvError> {
        let mut buf = Vec::with_capacity(64 + inner.entries.len() * 64);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(inner.entries.len() as u32).to_le_bytes());
        for (key, value) in &inner.entries {
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
        self.file.write(0, &buf).await?;
        self.file.truncate(buf.len() as u64).await?;
        Ok(())
    }

    async fn lock_ready(&self) -> Result<tokio::sync::MutexGuard<'_, Inner>, KvError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(KvError::Closed);
        }
        if !inner.loaded {
            self.load(&mut inner).await?;
        }
        Ok(inner)
    }
}

#[async_trait::async_trait]
impl KvIndex for FileKv {
    async fn ready(&self) -> Result<(), KvError> {
        self.lock_ready().await?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut inner = self.lock_ready().await?;
        inner.entries.insert(key.to_string(), value.to_vec());
        self.flush(&inner).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let inner = self.lock_ready().await?;
        Ok(inner.entries.get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut inner = self.lock_ready().await?;
        if inner.entries.remove(key).is_some() {
            self.flush(&inner).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        let inner = self.lock_ready().await?;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        self.file.close().await?;
        Ok(())
    }
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KvError> {
        if self.pos + n > self.bytes.len() {
            return Err(KvError::Corrupt("unexpected end of snapshot".into()));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, KvError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use feedstore_model::Storage;

    fn mem_kv(storage: &MemoryStorage) -> FileKv {
        FileKv::new(storage.open("index").unwrap())
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let storage = MemoryStorage::new();
        let kv = mem_kv(&storage);
        kv.ready().await.unwrap();

        kv.put("@feedstore/aa", b"one").await.unwrap();
        assert_eq!(kv.get("@feedstore/aa").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(kv.get("@feedstore/bb").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let storage = MemoryStorage::new();
        let kv = mem_kv(&storage);
        kv.put("k", b"v1").await.unwrap();
        kv.put("k", b"v2").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_del() {
        let storage = MemoryStorage::new();
        let kv = mem_kv(&storage);
        kv.put("k", b"v").await.unwrap();
        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
        // Deleting again is a no-op.
        kv.del("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix_sorted() {
        let storage = MemoryStorage::new();
        let kv = mem_kv(&storage);
        kv.put("@feedstore/bb", b"2").await.unwrap();
        kv.put("@feedstore/aa", b"1").await.unwrap();
        kv.put("@other/zz", b"3").await.unwrap();

        let listed = kv.list("@feedstore/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "@feedstore/aa");
        assert_eq!(listed[1].0, "@feedstore/bb");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let storage = MemoryStorage::new();
        {
            let kv = mem_kv(&storage);
            kv.put("k1", b"v1").await.unwrap();
            kv.put("k2", &[0u8, 255, 7]).await.unwrap();
            kv.close().await.unwrap();
        }

        let kv = mem_kv(&storage);
        kv.ready().await.unwrap();
        assert_eq!(kv.get("k1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(kv.get("k2").await.unwrap(), Some(vec![0u8, 255, 7]));
    }

    #[tokio::test]
    async fn test_corrupt_magic_detected() {
        let storage = MemoryStorage::new();
        let file = storage.open("index").unwrap();
        file.write(0, b"NOPE\x00\x00\x00\x00").await.unwrap();

        let kv = FileKv::new(storage.open("index").unwrap());
        assert!(matches!(kv.ready().await, Err(KvError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_closed_rejects_ops() {
        let storage = MemoryStorage::new();
        let kv = mem_kv(&storage);
        kv.close().await.unwrap();
        assert!(matches!(kv.get("k").await, Err(KvError::Closed)));
        assert!(matches!(kv.put("k", b"v").await, Err(KvError::Closed)));
    }
}
