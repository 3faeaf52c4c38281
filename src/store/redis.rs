//! Redis-backed ephemeral store
//!
//! Records are Redis hashes. Writes that must be atomic with their TTL refresh
//! (`put`, `incr_field`) go through a MULTI/EXEC pipeline; every call is
//! bounded by the configured operation timeout.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::{EphemeralStore, Fields};
use crate::error::{Result, SyncError};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                SyncError::StoreUnavailable(format!(
                    "connect timed out after {}ms",
                    op_timeout.as_millis()
                ))
            })??;

        info!("Redis connection established");
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!("Redis {} failed: {}", op, e);
                Err(SyncError::StoreUnavailable(format!("{}: {}", op, e)))
            }
            Err(_) => Err(SyncError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                op,
                self.op_timeout.as_millis()
            ))),
        }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn put(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<()> {
        if fields.is_empty() {
            let mut conn = self.conn.clone();
            let _: bool = self
                .bounded("expire", conn.expire(key, ttl_secs(ttl)))
                .await?;
            return Ok(());
        }

        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(key, &pairs[..])
            .ignore()
            .expire(key, ttl_secs(ttl))
            .ignore();

        self.bounded("put", pipe.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = self.bounded("hgetall", conn.hgetall(key)).await?;

        // HGETALL on a missing key returns an empty map
        if raw.is_empty() {
            Ok(None)
        } else {
            Ok(Some(raw.into_iter().collect()))
        }
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded("hget", conn.hget(key, field)).await
    }

    async fn incr_field(&self, key: &str, field: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hincr(key, field, 1i64)
            .expire(key, ttl_secs(ttl))
            .ignore();

        let (value,): (i64,) = self
            .bounded("hincrby", pipe.query_async(&mut conn))
            .await?;
        u64::try_from(value)
            .map_err(|_| SyncError::Validation(format!("{}.{} went negative: {}", key, field, value)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let secs: i64 = self.bounded("ttl", conn.ttl(key)).await?;

        // -2: no such key, -1: no expiry
        Ok(match secs {
            -2 => None,
            s if s < 0 => Some(Duration::MAX),
            s => Some(Duration::from_secs(s as u64)),
        })
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut keys: Vec<String> = self.bounded("keys", conn.keys(pattern)).await?;
        keys.sort();
        Ok(keys)
    }
}
