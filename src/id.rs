// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identifier codec.
//!
//! The cache keys every object by the lowercase hex form of its content hash;
//! the mirror stores the same hash as raw bytes. [`Id`] is the internal form,
//! and every key crossing the cache/mirror boundary goes through
//! [`encode_id`] / [`decode_id`].
//!
//! ```
//! use mirror_sync::id::{encode_id, decode_id};
//!
//! let id = encode_id("AbCd").unwrap();
//! assert_eq!(id.as_bytes(), &[0xab, 0xcd]);
//! assert_eq!(decode_id(&id), "abcd");
//! ```

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Serialize, Serializer};

use crate::error::SyncError;
use crate::storage::traits::SqlValue;

/// Internal (binary) form of an object identifier or checksum.
///
/// Ordering is plain byte order, which is the tie-break order for every delta
/// set the engine produces.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Vec<u8>);

impl Id {
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// An empty id means "not set"; it is never a valid object identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        decode_id(self)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl From<&Id> for SqlValue {
    fn from(id: &Id) -> Self {
        SqlValue::Bytes(id.0.clone())
    }
}

impl From<&Option<Id>> for SqlValue {
    fn from(id: &Option<Id>) -> Self {
        match id {
            Some(id) if !id.is_empty() => SqlValue::Bytes(id.0.clone()),
            _ => SqlValue::Null,
        }
    }
}

/// Parse the external hex form into an [`Id`].
///
/// Accepts upper- and lowercase digits. Fails on empty input, odd length, or
/// any non-hex character.
pub fn encode_id(hex_id: &str) -> Result<Id, SyncError> {
    if hex_id.is_empty() {
        return Err(SyncError::InvalidIdentifier {
            value: String::new(),
            reason: "empty identifier".to_string(),
        });
    }
    hex::decode(hex_id)
        .map(Id)
        .map_err(|e| SyncError::InvalidIdentifier {
            value: hex_id.to_string(),
            reason: e.to_string(),
        })
}

/// Render an [`Id`] in the external (lowercase hex) form.
#[must_use]
pub fn decode_id(id: &Id) -> String {
    hex::encode(&id.0)
}

/// Map an optional hex id to either its binary form or the database NULL.
///
/// Nullable foreign keys (zone, command endpoint, icon image, ...) go through
/// here so that an absent reference is stored as NULL, never as an empty blob.
pub fn encode_id_or_null(hex_id: Option<&str>) -> Result<SqlValue, SyncError> {
    match hex_id {
        None | Some("") => Ok(SqlValue::Null),
        Some(h) => encode_id(h).map(|id| SqlValue::from(&id)),
    }
}

/// Canonical external form: lowercase.
#[must_use]
pub fn normalize_hex(hex_id: &str) -> String {
    hex_id.to_ascii_lowercase()
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&decode_id(self))
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hex encoded identifier")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
        encode_id(v).map_err(E::custom)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(IdVisitor)
    }
}
