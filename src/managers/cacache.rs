use std::path::PathBuf;

use crate::{CacheManager, Result, ThrottleRecord};

/// Implements [`CacheManager`] with
/// [`cacache`](https://github.com/zkat/cacache-rs) as the backend.
///
/// The store lives on disk, so throttle state survives restarts and is shared
/// by every process pointed at the same directory.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-cacache")))]
#[derive(Debug, Clone)]
pub struct CACacheManager {
    /// Directory where the cache will be stored.
    pub path: PathBuf,
}

impl Default for CACacheManager {
    fn default() -> Self {
        Self { path: "./throttle-cacache".into() }
    }
}

impl CACacheManager {
    /// Create a new manager storing under the given directory
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        cacache::clear(&self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheManager for CACacheManager {
    async fn get(&self, cache_key: &str) -> Result<Option<ThrottleRecord>> {
        let record: ThrottleRecord =
            match cacache::read(&self.path, cache_key).await {
                Ok(d) => postcard::from_bytes(&d)?,
                Err(_e) => {
                    return Ok(None);
                }
            };
        Ok(Some(record))
    }

    async fn put(
        &self,
        cache_key: String,
        record: ThrottleRecord,
    ) -> Result<ThrottleRecord> {
        let bytes = postcard::to_allocvec(&record)?;
        cacache::write(&self.path, cache_key, bytes).await?;
        Ok(record)
    }

    async fn delete(&self, cache_key: &str) -> Result<()> {
        Ok(cacache::remove(&self.path, cache_key).await?)
    }
}
