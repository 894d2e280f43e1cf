//! In-memory replay-protection store
//!
//! Remembers DPoP proof and client assertion identifiers until their expiry.
//! Insertion goes through the map's entry API so concurrent proofs carrying the
//! same `jti` cannot both succeed.

use crate::storage::traits::{ReplayStore, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// In-memory replay store (single node)
#[derive(Default)]
pub struct MemoryReplayStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn seen(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|expiry| *expiry > now))
    }

    async fn mark(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // An expired entry the sweep has not reached yet no longer counts.
                if *occupied.get() > now {
                    return Ok(false);
                }
                occupied.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let initial_count = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        Ok(initial_count.saturating_sub(self.entries.len()))
    }
}
