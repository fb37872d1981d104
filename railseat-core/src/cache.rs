use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Corrupt cache value at {key}: {value}")]
    Corrupt { key: String, value: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Shared key-value cache service with hash-structured keys.
///
/// Counters are `i64`. Every multi-step operation below must be atomic on the
/// server side; the in-process adapters emulate that with a single mutex.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<i64>>;

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, i64>>;

    /// Pipelined multi-key read, one result per `(key, field)` in order.
    async fn hget_many(&self, lookups: &[(String, String)]) -> CacheResult<Vec<Option<i64>>>;

    /// Pipelined bulk write of whole hashes, each given the same TTL.
    async fn hset_many(
        &self,
        entries: &[(String, Vec<(String, i64)>)],
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    /// Adds `delta` to the field only if the hash exists. The stored value may go
    /// negative so that a decrement and the matching increment cancel exactly;
    /// readers clamp at zero. Returns `None` on a miss so a cold key is never
    /// seeded with a partial value.
    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> CacheResult<Option<i64>>;

    /// Decrements every field by its amount if all of them hold enough, otherwise
    /// changes nothing. Returns the indexes of the fields that fell short.
    async fn hdecr_all_or_none(&self, key: &str, demands: &[(String, i64)])
        -> CacheResult<Vec<usize>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn del(&self, key: &str) -> CacheResult<()>;

    /// `SET key value NX EX ttl`. Returns whether the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;
}
