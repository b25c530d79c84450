use crate::{CacheManager, Result, ThrottleRecord};

use std::fmt;

use redis::{aio::ConnectionManager, AsyncCommands};

/// Implements [`CacheManager`] with
/// [`redis`](https://github.com/redis-rs/redis-rs) as the backend.
///
/// This is the backend to use when several processes or hosts throttle
/// cooperatively against the same upstream API: every client reads and writes
/// the same record. An optional TTL can be set so stale throttle state ages
/// out on the server side.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-redis")))]
#[derive(Clone)]
pub struct RedisManager {
    conn: ConnectionManager,
    ttl_secs: Option<u64>,
}

impl fmt::Debug for RedisManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RedisManager")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl RedisManager {
    /// Create a new manager connected to the given Redis URL
    /// (e.g. `"redis://localhost:6379"`)
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl_secs: None })
    }

    /// Expire stored records after the given number of seconds
    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

#[async_trait::async_trait]
impl CacheManager for RedisManager {
    async fn get(&self, cache_key: &str) -> Result<Option<ThrottleRecord>> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(cache_key).await?;
        match bytes {
            Some(d) => Ok(Some(postcard::from_bytes(&d)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        cache_key: String,
        record: ThrottleRecord,
    ) -> Result<ThrottleRecord> {
        let mut conn = self.conn.clone();
        let bytes = postcard::to_allocvec(&record)?;
        match self.ttl_secs {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(cache_key, bytes, ttl).await?
            }
            None => conn.set::<_, _, ()>(cache_key, bytes).await?,
        }
        Ok(record)
    }

    async fn delete(&self, cache_key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(cache_key).await?;
        Ok(())
    }
}
