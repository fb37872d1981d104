use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use railseat_core::{CacheError, CacheResult, KvCache};

/// Redis-backed `KvCache`. Every key is namespaced with `key_prefix`.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    key_prefix: String,
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

fn parse_count(key: &str, value: String) -> CacheResult<i64> {
    value.parse().map_err(|_| CacheError::Corrupt {
        key: key.to_string(),
        value,
    })
}

impl RedisClient {
    pub async fn new(connection_string: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
        })
    }

    pub(crate) fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub(crate) async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn conn(&self) -> CacheResult<MultiplexedConnection> {
        self.connection().await.map_err(backend)
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KvCache for RedisClient {
    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.conn().await?;
        let key = self.key(key);
        let value: Option<String> = conn.hget(&key, field).await.map_err(backend)?;
        value.map(|v| parse_count(&key, v)).transpose()
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, i64>> {
        let mut conn = self.conn().await?;
        let key = self.key(key);
        let raw: HashMap<String, String> = conn.hgetall(&key).await.map_err(backend)?;
        raw.into_iter()
            .map(|(field, value)| Ok((field, parse_count(&key, value)?)))
            .collect()
    }

    async fn hget_many(&self, lookups: &[(String, String)]) -> CacheResult<Vec<Option<i64>>> {
        if lookups.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for (key, field) in lookups {
            pipe.hget(self.key(key), field);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await.map_err(backend)?;
        values
            .into_iter()
            .zip(lookups)
            .map(|(value, (key, _))| value.map(|v| parse_count(key, v)).transpose())
            .collect()
    }

    async fn hset_many(
        &self,
        entries: &[(String, Vec<(String, i64)>)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for (key, fields) in entries.iter().filter(|(_, fields)| !fields.is_empty()) {
            let key = self.key(key);
            pipe.hset_multiple(&key, fields).ignore();
            if let Some(ttl) = ttl {
                pipe.expire(&key, ttl.as_secs() as i64).ignore();
            }
        }
        pipe.query_async::<()>(&mut conn).await.map_err(backend)
    }

    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> CacheResult<Option<i64>> {
        let mut conn = self.conn().await?;
        // Never seed a cold key with a partial hash.
        let script = redis::Script::new(
            r#"
            if redis.call("EXISTS", KEYS[1]) == 0 then
                return false
            end
            return redis.call("HINCRBY", KEYS[1], ARGV[1], ARGV[2])
            "#,
        );
        script
            .key(self.key(key))
            .arg(field)
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)
    }

    async fn hdecr_all_or_none(
        &self,
        key: &str,
        demands: &[(String, i64)],
    ) -> CacheResult<Vec<usize>> {
        if demands.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let script = redis::Script::new(
            r#"
            local short = {}
            for i = 1, #ARGV, 2 do
                local have = tonumber(redis.call("HGET", KEYS[1], ARGV[i]) or "0")
                if have < tonumber(ARGV[i + 1]) then
                    table.insert(short, (i - 1) / 2)
                end
            end
            if #short > 0 then
                return short
            end
            for i = 1, #ARGV, 2 do
                redis.call("HINCRBY", KEYS[1], ARGV[i], -tonumber(ARGV[i + 1]))
            end
            return short
            "#,
        );
        let mut invocation = script.key(self.key(key));
        for (field, amount) in demands {
            invocation.arg(field).arg(*amount);
        }
        invocation.invoke_async(&mut conn).await.map_err(backend)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(self.key(key)).await.map_err(backend)
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.key(key)).await.map_err(backend)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(result.is_some())
    }
}
