//! Factory wiring for the block log engine

use crate::block_log::BlockLog;
use feedstore_model::{FeedKey, Log, LogError, LogFactory, LogOptions, RootedStorage};
use std::sync::Arc;

/// Creates `BlockLog` instances over a rooted storage.
///
/// The store roots each feed's storage at `<hex(key)>/`; the factory only
/// names the containers inside that root.
#[derive(Default)]
pub struct BlockLogFactory;

impl BlockLogFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LogFactory for BlockLogFactory {
    fn create(
        &self,
        storage: RootedStorage,
        key: FeedKey,
        opts: LogOptions,
    ) -> Result<Arc<dyn Log>, LogError> {
        let data = storage("data")?;
        let index = storage("index")?;
        let log = BlockLog::new(key, opts.secret_key, data, index)?;
        Ok(Arc::new(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedstore_model::{rooted, Keypair, Storage};
    use feedstore_storage::MemoryStorage;

    #[tokio::test]
    async fn test_factory_roots_containers() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let pair = Keypair::generate();
        let factory = BlockLogFactory::new();

        let log = factory
            .create(
                rooted(storage.clone(), pair.public.to_hex()),
                pair.public,
                LogOptions {
                    secret_key: Some(pair.secret),
                },
            )
            .unwrap();
        log.ready().await.unwrap();
        log.append(b"rooted").await.unwrap();

        // The block landed under the hex(key)/ prefix.
        let data = storage
            .open(&format!("{}/data", pair.public.to_hex()))
            .unwrap();
        assert_eq!(data.read(0, 6).await.unwrap(), b"rooted");
    }
}
