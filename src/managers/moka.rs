use crate::{CacheManager, Result, ThrottleRecord};

use std::{fmt, sync::Arc};

use moka::future::Cache;

/// Implements [`CacheManager`] with [`moka`](https://github.com/moka-rs/moka)
/// as the backend.
///
/// The cache is process-local, so this manager only coordinates throttling
/// between clients sharing one process. Use one of the external backends to
/// coordinate across processes.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-moka")))]
#[derive(Clone)]
pub struct MokaManager {
    /// The instance of `moka::future::Cache`
    pub cache: Arc<Cache<String, Arc<Vec<u8>>>>,
}

impl fmt::Debug for MokaManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MokaManager").finish_non_exhaustive()
    }
}

impl Default for MokaManager {
    fn default() -> Self {
        // One record per upstream API, a handful of keys at most
        Self::new(Cache::new(16))
    }
}

impl MokaManager {
    /// Create a new manager from a pre-configured Cache
    pub fn new(cache: Cache<String, Arc<Vec<u8>>>) -> Self {
        Self { cache: Arc::new(cache) }
    }
    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheManager for MokaManager {
    async fn get(&self, cache_key: &str) -> Result<Option<ThrottleRecord>> {
        let record: ThrottleRecord = match self.cache.get(cache_key).await {
            Some(d) => postcard::from_bytes(&d)?,
            None => return Ok(None),
        };
        Ok(Some(record))
    }

    async fn put(
        &self,
        cache_key: String,
        record: ThrottleRecord,
    ) -> Result<ThrottleRecord> {
        let bytes = postcard::to_allocvec(&record)?;
        self.cache.insert(cache_key, Arc::new(bytes)).await;
        self.cache.run_pending_tasks().await;
        Ok(record)
    }

    async fn delete(&self, cache_key: &str) -> Result<()> {
        self.cache.invalidate(cache_key).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}
