// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Timeperiods and their ranges.
//!
//! The cache publishes one range document per timeperiod, keyed by the
//! timeperiod id, holding every `day => range` entry. The mirror stores one
//! row per entry, grouped by `timeperiod_id`. [`TimeperiodRanges::expand`]
//! does that split; child ids are derived from the parent id and the range
//! key so repeated expansions produce identical rows.

use std::collections::BTreeMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{name_ci, opt_id, row_basics, row_checksum, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const TIMEPERIOD_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "display_name",
    "prefer_includes",
    "zone_id",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timeperiod {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    #[serde(default, deserialize_with = "opt_id")]
    pub name_checksum: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub properties_checksum: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub name_ci: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub prefer_includes: bool,
    #[serde(default, deserialize_with = "opt_id")]
    pub zone_id: Option<Id>,
}

impl Timeperiod {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Timeperiod {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.name_checksum),
            SqlValue::from(&self.properties_checksum),
            SqlValue::from(&self.name),
            name_ci(&self.name, &self.name_ci),
            SqlValue::from(&self.display_name),
            SqlValue::from(&self.prefer_includes),
            SqlValue::from(&self.zone_id),
        ]
    }
}

pub const TIMEPERIOD_RANGE_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "timeperiod_id",
    "range_key",
    "range_value",
    "properties_checksum",
];

/// Length of a derived range id, matching the producer's SHA-1 sized ids.
const RANGE_ID_LEN: usize = 20;

/// Id of the mirror row for `range_key` inside timeperiod `parent`.
#[must_use]
pub fn range_id(parent: &Id, range_key: &str) -> Id {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update([0u8]);
    hasher.update(range_key.as_bytes());
    let digest = hasher.finalize();
    Id::from_bytes(&digest[..RANGE_ID_LEN])
}

/// One mirror row of `timeperiod_range`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeperiodRange {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    pub timeperiod_id: Id,
    pub range_key: String,
    pub range_value: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub properties_checksum: Option<Id>,
}

impl Row for TimeperiodRange {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.timeperiod_id),
            SqlValue::from(&self.range_key),
            SqlValue::from(&self.range_value),
            SqlValue::from(&self.properties_checksum),
        ]
    }
}

/// The cache document: every range of one timeperiod.
///
/// Its own tuples describe the parent with empty range columns; only the
/// expanded children are ever written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeperiodRanges {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    #[serde(default, deserialize_with = "opt_id")]
    pub properties_checksum: Option<Id>,
    #[serde(default)]
    pub ranges: BTreeMap<String, String>,
}

impl TimeperiodRanges {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for TimeperiodRanges {
    row_checksum!();

    fn id(&self) -> &Id {
        &self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn environment_id(&self) -> &Id {
        &self.environment_id
    }

    fn set_environment_id(&mut self, id: Id) {
        self.environment_id = id;
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(raw)?;
        Ok(())
    }

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.id),
            SqlValue::Text(String::new()),
            SqlValue::Text(String::new()),
            SqlValue::from(&self.properties_checksum),
        ]
    }

    fn expand(self: Box<Self>) -> Vec<Box<dyn Row>> {
        let this = *self;
        this.ranges
            .into_iter()
            .map(|(range_key, range_value)| {
                Box::new(TimeperiodRange {
                    id: range_id(&this.id, &range_key),
                    environment_id: this.environment_id.clone(),
                    timeperiod_id: this.id.clone(),
                    range_key,
                    range_value,
                    properties_checksum: this.properties_checksum.clone(),
                }) as Box<dyn Row>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &[u8] = br#"{
        "id": "ab",
        "environment_id": "ee",
        "properties_checksum": "77",
        "ranges": {"monday": "00:00-24:00", "tuesday": "09:00-17:00"}
    }"#;

    #[test]
    fn test_expand_fans_out_per_range() {
        let mut doc = TimeperiodRanges::factory();
        doc.decode(DOC).unwrap();
        let rows = doc.expand();
        assert_eq!(rows.len(), 2);

        for row in &rows {
            let tuple = row.insert_tuple();
            assert_eq!(tuple.len(), TIMEPERIOD_RANGE_COLUMNS.len());
            assert_eq!(tuple[1], SqlValue::Bytes(vec![0xee]));
            assert_eq!(tuple[2], SqlValue::Bytes(vec![0xab]));
            assert_eq!(row.checksum().unwrap().as_bytes(), &[0x77]);
        }
        assert_ne!(rows[0].id(), rows[1].id());
    }

    #[test]
    fn test_expand_is_deterministic() {
        let ids = || {
            let mut doc = TimeperiodRanges::factory();
            doc.decode(DOC).unwrap();
            doc.expand().iter().map(|r| r.id().clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(), ids());
        assert_eq!(ids()[0].as_bytes().len(), RANGE_ID_LEN);
    }

    #[test]
    fn test_empty_document_expands_to_nothing() {
        let mut doc = TimeperiodRanges::factory();
        doc.decode(br#"{"id":"ab"}"#).unwrap();
        assert!(doc.expand().is_empty());
    }

    #[test]
    fn test_range_id_separates_key_from_parent() {
        let a = range_id(&Id::from_bytes(vec![1]), "2x");
        let b = range_id(&Id::from_bytes(vec![1, 0x32]), "x");
        assert_ne!(a, b);
    }
}
