//! Redis-backed [`KeyValueStore`] for idempotency keys.
//!
//! - **Claim**: `SET key value NX EX ttl`, a single atomic command
//! - **Finalize**: `SETEX`, overwriting the claim
//! - **Release**: compare-and-delete in a Lua script, so a finalized key is
//!   never removed by a late release
//!
//! # Example
//!
//! ```no_run
//! use booking::stores::RedisKeyValueStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisKeyValueStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use booking_core::StoreError;
use booking_core::store::{KeyValueStore, StoreFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis key-value store with connection pooling via `ConnectionManager`.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn_manager: ConnectionManager,
    compare_and_delete: Script,
}

impl RedisKeyValueStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyValue`] if the URL is invalid or Redis is
    /// unreachable.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::KeyValue(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::KeyValue(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self {
            conn_manager,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        })
    }

    fn ttl_seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

impl std::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyValueStore").finish_non_exhaustive()
    }
}

fn kv_error(op: &str, e: &redis::RedisError) -> StoreError {
    StoreError::KeyValue(format!("Redis {op} failed: {e}"))
}

impl KeyValueStore for RedisKeyValueStore {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            // Nil reply means the key already existed
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(Self::ttl_seconds(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| kv_error("SET NX", &e))?;

            Ok(reply.is_some())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<String> = conn.get(key).await.map_err(|e| kv_error("GET", &e))?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set_ex(key, value, Self::ttl_seconds(ttl))
                .await
                .map_err(|e| kv_error("SETEX", &e))?;
            Ok(())
        })
    }

    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .compare_and_delete
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| kv_error("compare-and-delete", &e))?;
            Ok(deleted == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(RedisKeyValueStore::ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(RedisKeyValueStore::ttl_seconds(Duration::from_secs(30)), 30);
    }

    #[tokio::test]
    async fn invalid_url_is_key_value_error() {
        let result = RedisKeyValueStore::new("not a url").await;
        assert!(matches!(result, Err(StoreError::KeyValue(_))));
    }
}
