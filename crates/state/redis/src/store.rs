use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{AsyncCommands, Script};

use tollgate_state::batch::{StateOp, WriteBatch};
use tollgate_state::error::StateError;
use tollgate_state::key::StateKey;
use tollgate_state::store::StateStore;

use crate::config::RedisConfig;
use crate::key_render::render_key;
use crate::scripts;

/// Redis-backed implementation of [`StateStore`].
///
/// Uses a `deadpool-redis` connection pool. Values are plain Redis strings,
/// sets are native Redis sets, and batches run inside `MULTI`/`EXEC`.
pub struct RedisStateStore {
    pool: Pool,
    prefix: String,
}

impl RedisStateStore {
    /// Create a new `RedisStateStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, StateError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout()))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StateError::Connection(e.to_string()))?
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
        })
    }

    fn redis_key(&self, key: &StateKey) -> String {
        render_key(&self.prefix, key)
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, StateError> {
        self.pool
            .get()
            .await
            .map_err(|e| StateError::Connection(e.to_string()))
    }
}

fn ttl_millis(ttl: Option<Duration>) -> i64 {
    ttl.map_or(0i64, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn backend(e: &redis::RedisError) -> StateError {
    StateError::Backend(e.to_string())
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;
        conn.get(&redis_key).await.map_err(|e| backend(&e))
    }

    async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<Option<String>>, StateError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rendered: Vec<String> = keys.iter().map(|k| self.redis_key(k)).collect();
        let mut conn = self.conn().await?;

        // MGET always replies with an array, even for a single key.
        redis::cmd("MGET")
            .arg(&rendered)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend(&e))
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;

        match ttl {
            Some(d) => {
                let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex(&redis_key, value, ms)
                    .await
                    .map_err(|e| backend(&e))
            }
            None => conn.set(&redis_key, value).await.map_err(|e| backend(&e)),
        }
    }

    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;

        let script = Script::new(scripts::CHECK_AND_SET);
        let result: i64 = script
            .key(&redis_key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend(&e))?;

        Ok(result == 1)
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;

        let deleted: i64 = conn.del(&redis_key).await.map_err(|e| backend(&e))?;
        Ok(deleted > 0)
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;

        let script = Script::new(scripts::INCREMENT);
        script
            .key(&redis_key)
            .arg(delta)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend(&e))
    }

    async fn set_contains(&self, set: &StateKey, member: &str) -> Result<bool, StateError> {
        let redis_key = self.redis_key(set);
        let mut conn = self.conn().await?;
        conn.sismember(&redis_key, member)
            .await
            .map_err(|e| backend(&e))
    }

    async fn execute(&self, batch: WriteBatch) -> Result<(), StateError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                StateOp::Set { key, value, ttl } => {
                    let redis_key = self.redis_key(&key);
                    match ttl {
                        Some(d) => {
                            let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1);
                            pipe.pset_ex(redis_key, value, ms).ignore();
                        }
                        None => {
                            pipe.set(redis_key, value).ignore();
                        }
                    }
                }
                StateOp::Delete { key } => {
                    pipe.del(self.redis_key(&key)).ignore();
                }
                StateOp::Increment { key, delta } => {
                    pipe.incr(self.redis_key(&key), delta).ignore();
                }
                StateOp::SetAdd { set, member } => {
                    pipe.sadd(self.redis_key(&set), member).ignore();
                }
                StateOp::SetRemove { set, member } => {
                    pipe.srem(self.redis_key(&set), member).ignore();
                }
            }
        }

        let mut conn = self.conn().await?;
        pipe.exec_async(&mut conn).await.map_err(|e| backend(&e))
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;
    use crate::config::RedisConfig;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("tollgate-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let config = test_config();
        let store = RedisStateStore::new(&config).expect("pool creation should succeed");
        tollgate_state::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }
}
