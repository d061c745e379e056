//! Cache Module
//!
//! The TTL object cache every storage service puts in front of its backend,
//! and an optional background sweeper for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ObjectCache<K, V>                       │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...16    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │  cleanup_expired()
//!              ┌─────────────┴─────────────┐
//!              │       CacheSweeper        │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```

pub mod object_cache;
pub mod sweeper;

pub use object_cache::{CacheStats, ObjectCache};
pub use sweeper::{CacheSweeper, SweepConfig};

use std::time::Duration;

/// Cache settings for a storage service.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Entry lifetime; zero keeps entries until they are removed.
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn eternal() -> Self {
        Self { ttl: Duration::ZERO }
    }

    pub fn expiring(ttl: Duration) -> Self {
        Self { ttl }
    }
}
