//! Property-based tests (fuzzing) for mirror sync resilience.
//!
//! Uses proptest to generate random/malformed inputs and verify the codec,
//! the decoder and the delta engine never panic and keep their invariants.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use serde_json::Value;

use mirror_sync::id::{decode_id, encode_id, normalize_hex, Id};
use mirror_sync::pipeline::decode::{decode_item, DecodeItem};
use mirror_sync::pipeline::delta::{compute_delta, CacheSnapshot, ChecksumMap};
use mirror_sync::registry::Registry;
use mirror_sync::row::Row;
use mirror_sync::SyncError;

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Even-length hex strings in mixed case
fn hex_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), 1..32).prop_flat_map(|bytes| {
        let lower = hex::encode(&bytes);
        prop::collection::vec(any::<bool>(), lower.len()).prop_map(move |upper| {
            lower
                .chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
                .collect()
        })
    })
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
        hex_strategy().prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("id".to_string()),
                        Just("name".to_string()),
                        Just("environment_id".to_string()),
                        Just("properties_checksum".to_string()),
                        Just("ranges".to_string()),
                        ".*",
                    ],
                    inner,
                    0..10
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Small id space so cache and mirror overlap often
fn checksum_map_strategy() -> impl Strategy<Value = ChecksumMap> {
    prop::collection::hash_map(
        (0u8..32).prop_map(|b| Id::from_bytes(vec![b])),
        prop::option::of((0u8..4).prop_map(|b| Id::from_bytes(vec![b]))),
        0..24,
    )
}

fn item(raw: Vec<u8>) -> DecodeItem {
    DecodeItem {
        id: Id::from_bytes(vec![0xaa]),
        raw,
        checksum: Some(Id::from_bytes(vec![0x01])),
    }
}

// =============================================================================
// Identifier codec
// =============================================================================

proptest! {
    /// Valid hex survives encode/decode in canonical (lowercase) form
    #[test]
    fn prop_codec_normalizes(hex in hex_strategy()) {
        let id = encode_id(&hex).unwrap();
        prop_assert_eq!(decode_id(&id), normalize_hex(&hex));
    }

    /// Arbitrary strings either parse or fail with InvalidIdentifier
    #[test]
    fn fuzz_encode_id_never_panics(s in ".*") {
        match encode_id(&s) {
            Ok(id) => prop_assert_eq!(id.as_bytes().len() * 2, s.len()),
            Err(e) => {
                let invalid_identifier = matches!(e, SyncError::InvalidIdentifier { .. });
                prop_assert!(invalid_identifier, "unexpected error: {:?}", e);
            }
        }
    }
}

// =============================================================================
// Decode Fuzz Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every builtin type rejects random bytes cleanly
    #[test]
    fn fuzz_decode_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let registry = Registry::builtin().unwrap();
        let env = Id::from_bytes(vec![0xee]);
        for descriptor in registry.sync_order() {
            if let Err(e) = decode_item(descriptor, &env, &item(bytes.clone())) {
                prop_assert!(e.is_row_level());
            }
        }
    }

    /// Structured but wrong JSON never panics; successes carry the env
    #[test]
    fn fuzz_decode_arbitrary_json(value in arbitrary_json_strategy()) {
        let registry = Registry::builtin().unwrap();
        let env = Id::from_bytes(vec![0xee]);
        let raw = serde_json::to_vec(&value).unwrap();
        for descriptor in registry.sync_order() {
            match decode_item(descriptor, &env, &item(raw.clone())) {
                Ok(rows) => {
                    for row in rows {
                        prop_assert!(!row.environment_id().is_empty());
                        prop_assert_eq!(row.insert_tuple().len(), descriptor.ordered_columns.len());
                    }
                }
                Err(e) => prop_assert!(e.is_row_level()),
            }
        }
    }
}

// =============================================================================
// Delta engine
// =============================================================================

proptest! {
    /// The three sets partition the work exactly
    #[test]
    fn prop_delta_partitions(
        has_checksum in any::<bool>(),
        cache in checksum_map_strategy(),
        mirror in checksum_map_strategy(),
    ) {
        let delta = compute_delta(has_checksum, &cache, &mirror);

        let inserts: HashSet<_> = delta.to_insert.iter().collect();
        let updates: HashSet<_> = delta.to_update.iter().collect();
        let deletes: HashSet<_> = delta.to_delete.iter().collect();

        prop_assert!(inserts.is_disjoint(&updates));
        prop_assert!(inserts.is_disjoint(&deletes));
        prop_assert!(updates.is_disjoint(&deletes));

        for id in &delta.to_insert {
            prop_assert!(cache.contains_key(id) && !mirror.contains_key(id));
        }
        for id in &delta.to_delete {
            prop_assert!(mirror.contains_key(id) && !cache.contains_key(id));
        }
        for id in &delta.to_update {
            prop_assert!(has_checksum);
            prop_assert!(cache.contains_key(id) && mirror.contains_key(id));
        }
        prop_assert_eq!(
            delta.to_delete.len(),
            mirror.keys().filter(|id| !cache.contains_key(*id)).count()
        );
    }

    /// Applying a delta makes the next delta empty
    #[test]
    fn prop_delta_converges(cache in checksum_map_strategy(), mirror in checksum_map_strategy()) {
        let delta = compute_delta(true, &cache, &mirror);
        let mut applied = mirror.clone();
        for id in &delta.to_delete {
            applied.remove(id);
        }
        for id in delta.to_insert.iter().chain(&delta.to_update) {
            applied.insert(id.clone(), cache[id].clone());
        }
        let again = compute_delta(true, &cache, &applied);
        // Ids the cache advertises without a checksum are always refreshed.
        let unknown = cache.values().filter(|sum| sum.is_none()).count();
        prop_assert!(again.to_insert.is_empty());
        prop_assert!(again.to_delete.is_empty());
        prop_assert_eq!(again.to_update.len(), unknown);
    }

    /// Random cache keys never panic; each is either an entry or an error
    #[test]
    fn fuzz_cache_snapshot_keys(keys in prop::collection::hash_set("[0-9a-fA-Fxz]{0,8}", 0..32)) {
        let snapshot = CacheSnapshot::build(keys.iter().cloned().collect(), &HashMap::new());
        let valid = keys.iter().filter(|k| encode_id(k).is_ok()).count();
        prop_assert_eq!(snapshot.invalid.len(), keys.len() - valid);
        prop_assert!(snapshot.len() <= valid);
    }
}

// =============================================================================
// Statement sizing
// =============================================================================

proptest! {
    /// Chunk size respects both the row and the placeholder cap
    #[test]
    fn prop_chunk_size_within_placeholder_cap(bulk_size in 1usize..5000, max_placeholders in 1usize..70000) {
        let registry = Registry::builtin().unwrap();
        for descriptor in registry.sync_order() {
            let statement = &descriptor.bulk_insert_stmt;
            let rows = statement.max_rows(bulk_size, max_placeholders);
            prop_assert!(rows >= 1);
            prop_assert!(rows <= bulk_size);
            if max_placeholders >= statement.columns.len() {
                prop_assert!(rows * statement.columns.len() <= max_placeholders);
            }
        }
    }
}
