// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contracts for the two external stores the engine talks to.
//!
//! - [`CacheClient`]: the key/value cache the monitoring core publishes into
//!   (source of truth, read-only for us).
//! - [`MirrorStore`]: the relational mirror we converge.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::id::Id;
use crate::notify::Notification;
use crate::registry::statement::{BulkStatement, Dialect};
use crate::registry::TypeDescriptor;

/// A single bind parameter for a bulk statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL in a binary (id) column.
    Null,
    /// NULL in a text column.
    TextNull,
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::TextNull)
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Approximate wire size, used for the bytes metrics.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Null | Self::TextNull => 0,
            Self::Bytes(b) => b.len(),
            Self::Text(s) => s.len(),
            Self::Int(_) | Self::Float(_) => 8,
            Self::Bool(_) => 1,
        }
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<&Option<String>> for SqlValue {
    fn from(v: &Option<String>) -> Self {
        match v {
            Some(s) => SqlValue::Text(s.clone()),
            None => SqlValue::TextNull,
        }
    }
}

impl From<&i64> for SqlValue {
    fn from(v: &i64) -> Self {
        SqlValue::Int(*v)
    }
}

impl From<&Option<i64>> for SqlValue {
    fn from(v: &Option<i64>) -> Self {
        match v {
            Some(i) => SqlValue::Int(*i),
            None => SqlValue::TextNull,
        }
    }
}

impl From<&f64> for SqlValue {
    fn from(v: &f64) -> Self {
        SqlValue::Float(*v)
    }
}

impl From<&bool> for SqlValue {
    fn from(v: &bool) -> Self {
        SqlValue::Bool(*v)
    }
}

/// One bulk statement's parameters: one tuple per row.
pub type Tuple = Vec<SqlValue>;

/// Outcome of executing one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Rows the database reported as affected
    pub rows_affected: u64,
    /// Inserts that hit an existing row and were turned into updates
    pub conflicts: u64,
}

/// Read side of the configuration cache.
///
/// `key` is a descriptor's cache key prefix (e.g. `host`,
/// `checkcommand:customvar`); implementations add their own namespace.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// One page of ids for a type. A returned cursor of 0 ends the scan.
    async fn scan_page(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>), SyncError>;

    /// id → checksum hex. Only called for checksum-bearing types.
    async fn get_checksums(&self, key: &str) -> Result<HashMap<String, String>, SyncError>;

    /// id → raw JSON. Ids missing from the cache are absent from the result.
    async fn mget(&self, key: &str, ids: &[String]) -> Result<HashMap<String, Vec<u8>>, SyncError>;

    /// Hex environment id published by the monitoring core, if any.
    async fn environment_id(&self) -> Result<Option<String>, SyncError> {
        Ok(None)
    }

    /// Append notification events to a stream. No-op unless overridden.
    async fn publish_notifications(&self, _stream: &str, _events: &[Notification]) -> Result<(), SyncError> {
        Ok(())
    }

    /// Liveness check; returns round trip in milliseconds.
    async fn ping(&self) -> Result<u64, SyncError> {
        Ok(0)
    }

    /// Enumerate every id currently published for a type.
    async fn scan(&self, key: &str) -> Result<Vec<String>, SyncError> {
        let mut ids = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, page) = self.scan_page(key, cursor, 1000).await?;
            ids.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(ids)
    }
}

/// Write side: the relational mirror.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Keys currently stored for a type in one environment.
    ///
    /// Keys are the primary ids, or the delta column for join/delta tables.
    async fn select_ids(&self, descriptor: &TypeDescriptor, environment_id: &Id) -> Result<Vec<Id>, SyncError>;

    /// key → stored content checksum. Rows with a NULL checksum map to an
    /// empty [`Id`].
    async fn select_id_checksum(
        &self,
        descriptor: &TypeDescriptor,
        environment_id: &Id,
    ) -> Result<HashMap<Id, Id>, SyncError>;

    /// Execute one chunk of tuples against a bulk statement, atomically.
    async fn execute_bulk(&self, statement: &BulkStatement, tuples: &[Tuple]) -> Result<BulkOutcome, SyncError>;

    /// Newest schema version recorded in the mirror.
    async fn schema_version(&self) -> Result<Option<String>, SyncError>;

    /// Liveness check; returns round trip in milliseconds.
    async fn ping(&self) -> Result<u64, SyncError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_conversions() {
        assert_eq!(SqlValue::from(&None::<String>), SqlValue::TextNull);
        assert_eq!(SqlValue::from(&Some("x".to_string())), SqlValue::Text("x".into()));
        assert!(SqlValue::from(&None::<i64>).is_null());
        assert_eq!(SqlValue::from(&true), SqlValue::Bool(true));
    }

    #[test]
    fn test_size_bytes() {
        assert_eq!(SqlValue::Bytes(vec![1, 2, 3]).size_bytes(), 3);
        assert_eq!(SqlValue::Null.size_bytes(), 0);
        assert_eq!(SqlValue::Text("abcd".into()).size_bytes(), 4);
    }
}
