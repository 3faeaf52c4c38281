//! Ephemeral Key Store access layer
//!
//! A TTL-keyed hash-record store shared by every bot and the server. The layer
//! is domain-agnostic: records are flat string maps, and an absent key is a
//! first-class answer (never an error). Unreachability is always reported as
//! `SyncError::StoreUnavailable` so callers can degrade instead of crashing.

pub mod keys;
pub mod memory;
pub mod redis;

pub use crate::domain::Fields;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Merge `fields` into the record at `key` and (re)set its TTL in one step
    async fn put(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<()>;

    /// Whole record, or `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Fields>>;

    /// Single field, or `None` if the record or the field is absent
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Atomically increment an integer field (absent counts as 0), refresh the
    /// TTL, and return the new value
    async fn incr_field(&self, key: &str, field: &str, ttl: Duration) -> Result<u64>;

    /// Remaining TTL, or `None` if the key is absent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Live keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
