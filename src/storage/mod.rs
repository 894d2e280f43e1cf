//! Trait-based storage abstractions with an in-memory backend and an optional
//! Redis-backed replay store.

pub mod inmemory;
pub mod traits;

// Feature-gated storage implementations
#[cfg(feature = "redis")]
pub mod redis;

// Re-export commonly used types and traits
pub use inmemory::{MemoryOAuthStorage, MemoryReplayStore, MemorySeed};
pub use traits::*;

#[cfg(feature = "redis")]
pub use self::redis::RedisReplayStore;

use crate::errors::StorageError;
use std::sync::Arc;

/// Replay store backend configuration and factory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "redis")]
    Redis(String), // Connection URL
}

/// Create the replay-protection store for the configured backend
pub async fn create_replay_store(
    backend: StorageBackend,
) -> std::result::Result<Arc<dyn ReplayStore>, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryReplayStore::new())),
        #[cfg(feature = "redis")]
        StorageBackend::Redis(redis_url) => {
            let store = RedisReplayStore::new(&redis_url).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    redis_url: Option<&str>,
) -> std::result::Result<StorageBackend, StorageError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "redis")]
        "redis" => {
            let url = redis_url.ok_or_else(|| {
                StorageError::InvalidData("REDIS_URL required for redis backend".to_string())
            })?;
            Ok(StorageBackend::Redis(url.to_string()))
        }
        _ => {
            let _ = redis_url;
            Err(StorageError::InvalidData(format!(
                "Unknown storage backend: {}",
                backend_name
            )))
        }
    }
}
