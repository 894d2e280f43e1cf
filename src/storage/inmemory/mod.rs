//! In-memory storage implementations
//!
//! This module provides in-memory implementations of all storage traits.
//! These implementations are suitable for development and testing.

mod directory;
mod oauth;
mod replay;

pub use oauth::{MemoryOAuthStorage, MemorySeed};
pub use replay::MemoryReplayStore;
