//! Redis-backed replay-protection store for multi-node deployments.
//!
//! Keys are written with `SET NX EX` so the insert-if-absent check and the
//! expiry are a single atomic command; Redis drops expired keys by itself.

use crate::errors::StorageError;
use crate::storage::traits::{ReplayStore, Result};
use async_trait::async_trait;
use chrono::Duration;
use deadpool_redis::{Config, Pool, Runtime};

pub struct RedisReplayStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisReplayStore {
    /// Create a new store from a `redis://` URL
    pub async fn new(redis_url: &str) -> Result<Self> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                StorageError::ConnectionFailed(format!("Failed to create Redis pool: {}", e))
            })?;

        // Verify Redis is responsive
        let mut conn = pool.get().await.map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
        })?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("Redis ping failed: {}", e)))?;

        Ok(Self {
            pool,
            key_prefix: "tokenwright:replay:".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("Redis pool error: {}", e)))
    }
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn seen(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async::<bool>(&mut conn)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("Redis EXISTS failed: {}", e)))
    }

    async fn mark(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl_secs = ttl.num_seconds().max(1);
        let mut conn = self.connection().await?;
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("Redis SET NX failed: {}", e)))?;

        if stored.is_none() {
            tracing::warn!(key = %key, "replay detected by redis store");
        }
        Ok(stored.is_some())
    }

    async fn sweep(&self) -> Result<usize> {
        tracing::trace!("Redis TTL handles expiry of replay keys");
        Ok(0)
    }
}
