// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Set difference between the cache and the mirror.
//!
//! ```text
//! to_insert = cache \ mirror
//! to_delete = mirror \ cache
//! to_update = cache ∩ mirror where the checksums differ (checksum types only)
//! ```
//!
//! Every set is sorted by internal id byte order so chunks are deterministic.

use std::collections::HashMap;

use tracing::warn;

use crate::error::SyncError;
use crate::id::{encode_id, Id};

/// key → content checksum; `None` when unknown.
pub type ChecksumMap = HashMap<Id, Option<Id>>;

/// What one tick has to do for one type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_insert: Vec<Id>,
    pub to_update: Vec<Id>,
    pub to_delete: Vec<Id>,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Ids whose documents have to be fetched: inserts then updates.
    #[must_use]
    pub fn to_fetch(&self) -> Vec<Id> {
        self.to_insert.iter().chain(&self.to_update).cloned().collect()
    }
}

/// Diff a cache snapshot against the mirror.
///
/// A cache entry without a checksum is an update when the mirror already
/// holds the key. A mirror row without a checksum always differs.
#[must_use]
pub fn compute_delta(has_checksum: bool, cache: &ChecksumMap, mirror: &ChecksumMap) -> Delta {
    let mut delta = Delta::default();

    for (id, cache_sum) in cache {
        match mirror.get(id) {
            None => delta.to_insert.push(id.clone()),
            Some(mirror_sum) if has_checksum => {
                let same = matches!((cache_sum, mirror_sum), (Some(c), Some(m)) if c == m);
                if !same {
                    delta.to_update.push(id.clone());
                }
            }
            Some(_) => {}
        }
    }
    delta.to_delete = mirror.keys().filter(|id| !cache.contains_key(*id)).cloned().collect();

    delta.to_insert.sort_unstable();
    delta.to_update.sort_unstable();
    delta.to_delete.sort_unstable();
    delta
}

/// The cache side of a diff, with the original hex keys kept for fetching.
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    pub entries: ChecksumMap,
    /// Internal id → key exactly as published
    pub keys: HashMap<Id, String>,
    /// Keys that are not valid hex; skipped for this tick
    pub invalid: Vec<SyncError>,
}

impl CacheSnapshot {
    /// Decode scanned keys and pair them with their advertised checksums.
    #[must_use]
    pub fn build(ids: Vec<String>, checksums: &HashMap<String, String>) -> Self {
        let mut snapshot = Self::default();
        snapshot.entries.reserve(ids.len());

        for key in ids {
            let id = match encode_id(&key) {
                Ok(id) => id,
                Err(e) => {
                    snapshot.invalid.push(e);
                    continue;
                }
            };
            let checksum = checksums.get(&key).and_then(|hex| match encode_id(hex) {
                Ok(sum) => Some(sum),
                Err(e) => {
                    warn!(id = %key, error = %e, "Ignoring malformed cache checksum");
                    None
                }
            });
            snapshot.entries.insert(id.clone(), checksum);
            snapshot.keys.insert(id, key);
        }
        snapshot
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mirror side from `select_id_checksum`: NULL checksums become `None`.
#[must_use]
pub fn mirror_checksums(stored: HashMap<Id, Id>) -> ChecksumMap {
    stored
        .into_iter()
        .map(|(id, sum)| (id, Some(sum).filter(|s| !s.is_empty())))
        .collect()
}

/// Mirror side from `select_ids`.
#[must_use]
pub fn mirror_ids(ids: Vec<Id>) -> ChecksumMap {
    ids.into_iter().map(|id| (id, None)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> Id {
        Id::from_bytes(vec![b])
    }

    fn map(entries: &[(u8, Option<u8>)]) -> ChecksumMap {
        entries.iter().map(|(k, v)| (id(*k), v.map(id))).collect()
    }

    #[test]
    fn test_basic_sets() {
        let cache = map(&[(1, Some(0x10)), (2, Some(0x20)), (4, Some(0x40))]);
        let mirror = map(&[(2, Some(0x21)), (3, Some(0x30)), (4, Some(0x40))]);

        let delta = compute_delta(true, &cache, &mirror);
        assert_eq!(delta.to_insert, vec![id(1)]);
        assert_eq!(delta.to_update, vec![id(2)]);
        assert_eq!(delta.to_delete, vec![id(3)]);
    }

    #[test]
    fn test_no_updates_without_checksum() {
        let cache = map(&[(1, None), (2, None)]);
        let mirror = map(&[(2, None)]);
        let delta = compute_delta(false, &cache, &mirror);
        assert_eq!(delta.to_insert, vec![id(1)]);
        assert!(delta.to_update.is_empty());
        assert!(delta.to_delete.is_empty());
    }

    #[test]
    fn test_missing_cache_checksum_is_pessimistic() {
        let cache = map(&[(1, None), (2, None)]);
        let mirror = map(&[(2, Some(0x20))]);
        let delta = compute_delta(true, &cache, &mirror);
        assert_eq!(delta.to_insert, vec![id(1)]);
        assert_eq!(delta.to_update, vec![id(2)]);
    }

    #[test]
    fn test_empty_cache_deletes_everything() {
        let mirror = map(&[(3, None), (1, None), (2, None)]);
        let delta = compute_delta(true, &ChecksumMap::new(), &mirror);
        assert_eq!(delta.to_delete, vec![id(1), id(2), id(3)]);
        assert!(delta.to_insert.is_empty() && delta.to_update.is_empty());
    }

    #[test]
    fn test_sets_are_byte_ordered() {
        let cache: ChecksumMap = [vec![2u8], vec![1, 0], vec![1]]
            .into_iter()
            .map(|b| (Id::from_bytes(b), None))
            .collect();
        let delta = compute_delta(false, &cache, &ChecksumMap::new());
        let bytes: Vec<&[u8]> = delta.to_insert.iter().map(Id::as_bytes).collect();
        assert_eq!(bytes, vec![&[1u8][..], &[1, 0][..], &[2][..]]);
    }

    #[test]
    fn test_snapshot_keeps_original_keys() {
        let checksums: HashMap<String, String> = [("AA".to_string(), "11".to_string())].into();
        let snapshot = CacheSnapshot::build(vec!["AA".into(), "bb".into(), "xyz".into()], &checksums);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.invalid.len(), 1);
        assert_eq!(snapshot.keys[&id(0xaa)], "AA");
        assert_eq!(snapshot.entries[&id(0xaa)], Some(id(0x11)));
        assert_eq!(snapshot.entries[&id(0xbb)], None);
    }

    #[test]
    fn test_null_mirror_checksum_forces_update() {
        let stored: HashMap<Id, Id> = [(id(1), Id::default())].into();
        let mirror = mirror_checksums(stored);
        let cache = map(&[(1, Some(0x10))]);
        assert_eq!(compute_delta(true, &cache, &mirror).to_update, vec![id(1)]);
    }
}
