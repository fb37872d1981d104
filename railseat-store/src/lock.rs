use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use railseat_core::{LockCoordinator, LockError, LockHandle};

use crate::redis_repo::RedisClient;

/// Grants the lock to the queue head when the lock key is free, otherwise
/// enqueues (or refreshes) the caller. Waiters that stopped polling are pruned
/// from the head. ARGV: token, lease ms, waiter ttl ms, enqueue flag.
const ACQUIRE_SCRIPT: &str = r#"
local t = redis.call("TIME")
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
while true do
    local head = redis.call("LINDEX", KEYS[2], 0)
    if not head or head == ARGV[1] then
        break
    end
    local deadline = redis.call("ZSCORE", KEYS[3], head)
    if deadline and tonumber(deadline) > now then
        break
    end
    redis.call("LPOP", KEYS[2])
    redis.call("ZREM", KEYS[3], head)
end
if redis.call("EXISTS", KEYS[1]) == 0 then
    local head = redis.call("LINDEX", KEYS[2], 0)
    if not head or head == ARGV[1] then
        if head then
            redis.call("LPOP", KEYS[2])
            redis.call("ZREM", KEYS[3], ARGV[1])
        end
        redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
        return 1
    end
end
if ARGV[4] == "1" then
    if not redis.call("ZSCORE", KEYS[3], ARGV[1]) then
        redis.call("RPUSH", KEYS[2], ARGV[1])
    end
    redis.call("ZADD", KEYS[3], now + tonumber(ARGV[3]), ARGV[1])
    redis.call("PEXPIRE", KEYS[2], tonumber(ARGV[2]) + tonumber(ARGV[3]))
    redis.call("PEXPIRE", KEYS[3], tonumber(ARGV[2]) + tonumber(ARGV[3]))
end
return 0
"#;

const ABANDON_SCRIPT: &str = r#"
redis.call("LREM", KEYS[1], 0, ARGV[1])
redis.call("ZREM", KEYS[2], ARGV[1])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const WAITER_TTL: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Fair (FIFO) cluster lock on top of Redis. The lock key holds the owner's
/// token with a lease; waiters queue in a list ordered by arrival.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    redis: RedisClient,
    lease: Duration,
}

fn backend(err: redis::RedisError) -> LockError {
    LockError::Backend(err.to_string())
}

impl RedisLockCoordinator {
    pub fn new(redis: RedisClient, lease: Duration) -> Self {
        Self { redis, lease }
    }

    fn keys(&self, name: &str) -> (String, String, String) {
        let key = self.redis.key(name);
        (key.clone(), format!("{}:queue", key), format!("{}:timeout", key))
    }

    async fn attempt(
        &self,
        conn: &mut MultiplexedConnection,
        name: &str,
        token: &str,
        enqueue: bool,
    ) -> Result<bool, LockError> {
        let (lock, queue, timeouts) = self.keys(name);
        let granted: i64 = redis::Script::new(ACQUIRE_SCRIPT)
            .key(lock)
            .key(queue)
            .key(timeouts)
            .arg(token)
            .arg(self.lease.as_millis() as u64)
            .arg(WAITER_TTL.as_millis() as u64)
            .arg(if enqueue { "1" } else { "0" })
            .invoke_async(conn)
            .await
            .map_err(backend)?;
        Ok(granted == 1)
    }

    async fn abandon(&self, conn: &mut MultiplexedConnection, name: &str, token: &str) {
        let (_, queue, timeouts) = self.keys(name);
        let result: Result<i64, _> = redis::Script::new(ABANDON_SCRIPT)
            .key(queue)
            .key(timeouts)
            .arg(token)
            .invoke_async(conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(lock = name, error = %e, "Failed to leave lock queue");
        }
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn lock_fair(&self, name: &str, wait: Duration) -> Result<LockHandle, LockError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        let mut backoff = Duration::from_millis(5);

        loop {
            if self.attempt(&mut conn, name, &token, true).await? {
                return Ok(LockHandle {
                    name: name.to_string(),
                    token,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                self.abandon(&mut conn, name, &token).await;
                tracing::warn!(lock = name, wait_ms = wait.as_millis() as u64, "Fair lock wait timed out");
                return Err(LockError::Timeout(name.to_string()));
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn try_lock(&self, name: &str) -> Result<Option<LockHandle>, LockError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let token = Uuid::new_v4().to_string();
        if self.attempt(&mut conn, name, &token, false).await? {
            Ok(Some(LockHandle {
                name: name.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    async fn unlock(&self, handle: &LockHandle) -> Result<(), LockError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.redis.key(&handle.name))
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        if released == 0 {
            tracing::debug!(lock = %handle.name, "Lock lease already expired at release");
        }
        Ok(())
    }
}
