//! In-process ephemeral store
//!
//! Expiry runs on the tokio clock, so tests can `tokio::time::pause()` and
//! advance past a TTL. Outages can be simulated with `set_available(false)`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{EphemeralStore, Fields};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
struct Entry {
    fields: Fields,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        debug!("Memory store available: {}", available);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SyncError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }

    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn put(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let now = Instant::now();

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: Fields::new(),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.fields.clear();
        }
        entry
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>> {
        self.check_available()?;
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.fields.clone()));
            }
        }
        self.evict_if_expired(key, now);
        Ok(None)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|mut fields| fields.remove(field)))
    }

    async fn incr_field(&self, key: &str, field: &str, ttl: Duration) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();

        // The entry guard holds the shard lock, so concurrent increments serialize
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: Fields::new(),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.fields.clear();
        }

        let current = match entry.fields.get(field) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                SyncError::Validation(format!("{}.{} is not an integer: {:?}", key, field, raw))
            })?,
            None => 0,
        };
        let next = current + 1;
        entry.fields.insert(field.to_string(), next.to_string());
        entry.expires_at = now + ttl;
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check_available()?;
        let now = Instant::now();

        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();

        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
