// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis implementation of the configuration cache.
//!
//! The monitoring core publishes each object type as two hashes:
//!
//! ```text
//! HSET icinga:host           <hex id> <json document>
//! HSET icinga:checksum:host  <hex id> {"checksum":"<hex>"}   (checksum types only)
//! HSET icinga:environment    id <hex environment id>
//! ```
//!
//! Checksum values are accepted either as the JSON wrapper above or as a bare
//! hex string.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client};
use serde::Deserialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use super::traits::CacheClient;
use crate::error::SyncError;
use crate::notify::Notification;
use crate::resilience::retry::{retry, RetryConfig};

/// Fields per HMGET round trip.
const MGET_CHUNK: usize = 500;

pub struct RedisCache {
    connection: ConnectionManager,
    /// Namespace for every key (e.g., "icinga:" → "icinga:host")
    prefix: String,
    /// Bounds concurrent in-flight commands
    permits: Arc<Semaphore>,
    stream_maxlen: usize,
}

impl RedisCache {
    /// Connect, retrying with the startup preset.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mirror_sync::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), mirror_sync::SyncError> {
    /// // Keys will be prefixed: "icinga:host", "icinga:checksum:host"
    /// let cache = RedisCache::connect("redis://localhost", "icinga:", 4).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(connection_string: &str, prefix: &str, max_connections: usize) -> Result<Self, SyncError> {
        let client = Client::open(connection_string)
            .map_err(|e| SyncError::Config(format!("invalid redis url: {}", e)))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| SyncError::FatalIo(format!("redis connect failed: {}", e)))?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            stream_maxlen: 100_000,
        })
    }

    /// Approximate length cap for notification streams.
    #[must_use]
    pub fn with_stream_maxlen(mut self, maxlen: usize) -> Self {
        self.stream_maxlen = maxlen;
        self
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    #[inline]
    fn checksum_key(&self, key: &str) -> String {
        format!("{}checksum:{}", self.prefix, key)
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, SyncError> {
        self.permits.acquire().await.map_err(|_| SyncError::Cancelled)
    }
}

#[derive(Deserialize)]
struct ChecksumValue {
    checksum: String,
}

/// Checksum hash values are either `{"checksum":"<hex>"}` or bare hex.
fn parse_checksum(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        serde_json::from_str::<ChecksumValue>(trimmed).ok().map(|v| v.checksum)
    } else if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn scan_page(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>), SyncError> {
        let _permit = self.permit().await?;
        let conn = self.connection.clone();
        let hash = self.prefixed_key(key);

        let (next, flat): (u64, Vec<Vec<u8>>) = retry("redis_hscan", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let hash = hash.clone();
            async move {
                cmd("HSCAN")
                    .arg(&hash)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
        .map_err(SyncError::from)?;

        // HSCAN replies field, value, field, value, ...
        let ids = flat
            .into_iter()
            .step_by(2)
            .map(|field| String::from_utf8_lossy(&field).into_owned())
            .collect();
        Ok((next, ids))
    }

    async fn get_checksums(&self, key: &str) -> Result<HashMap<String, String>, SyncError> {
        let _permit = self.permit().await?;
        let conn = self.connection.clone();
        let hash = self.checksum_key(key);

        let raw: HashMap<String, String> = retry("redis_hgetall", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let hash = hash.clone();
            async move { cmd("HGETALL").arg(&hash).query_async(&mut conn).await }
        })
        .await
        .map_err(SyncError::from)?;

        let mut checksums = HashMap::with_capacity(raw.len());
        for (id, value) in raw {
            match parse_checksum(&value) {
                Some(checksum) => {
                    checksums.insert(id, checksum);
                }
                None => warn!(key = %key, id = %id, "Unparseable checksum value, treating as missing"),
            }
        }
        Ok(checksums)
    }

    async fn mget(&self, key: &str, ids: &[String]) -> Result<HashMap<String, Vec<u8>>, SyncError> {
        let mut found = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(found);
        }

        let hash = self.prefixed_key(key);
        for chunk in ids.chunks(MGET_CHUNK) {
            let _permit = self.permit().await?;
            let conn = self.connection.clone();
            let values: Vec<Option<Vec<u8>>> = retry("redis_hmget", &RetryConfig::query(), || {
                let mut conn = conn.clone();
                let hash = hash.clone();
                async move { cmd("HMGET").arg(&hash).arg(chunk).query_async(&mut conn).await }
            })
            .await
            .map_err(SyncError::from)?;

            for (id, value) in chunk.iter().zip(values) {
                if let Some(raw) = value {
                    found.insert(id.clone(), raw);
                }
            }
        }
        debug!(key = %key, requested = ids.len(), found = found.len(), "HMGET complete");
        Ok(found)
    }

    async fn environment_id(&self) -> Result<Option<String>, SyncError> {
        let _permit = self.permit().await?;
        let conn = self.connection.clone();
        let hash = self.prefixed_key("environment");

        retry("redis_environment", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let hash = hash.clone();
            async move { cmd("HGET").arg(&hash).arg("id").query_async(&mut conn).await }
        })
        .await
        .map_err(SyncError::from)
    }

    async fn publish_notifications(&self, stream: &str, events: &[Notification]) -> Result<(), SyncError> {
        if events.is_empty() {
            return Ok(());
        }
        let _permit = self.permit().await?;
        let conn = self.connection.clone();
        let stream_key = self.prefixed_key(stream);
        let maxlen = self.stream_maxlen;

        retry("redis_xadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let stream_key = stream_key.clone();
            async move {
                let mut pipeline = pipe();
                for event in events {
                    let xadd = pipeline
                        .cmd("XADD")
                        .arg(&stream_key)
                        .arg("MAXLEN")
                        .arg("~")
                        .arg(maxlen)
                        .arg("*");
                    for (field, value) in event.to_redis_fields() {
                        xadd.arg(field).arg(value);
                    }
                    xadd.ignore();
                }
                pipeline.query_async::<()>(&mut conn).await
            }
        })
        .await
        .map_err(SyncError::from)
    }

    async fn ping(&self) -> Result<u64, SyncError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let _: String = cmd("PING").query_async(&mut conn).await?;
        Ok(start.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checksum_forms() {
        assert_eq!(parse_checksum(r#"{"checksum":"abcd"}"#), Some("abcd".into()));
        assert_eq!(parse_checksum("abcd"), Some("abcd".into()));
        assert_eq!(parse_checksum("  "), None);
        assert_eq!(parse_checksum(r#"{"nope":1}"#), None);
    }
}
