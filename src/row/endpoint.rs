// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster topology: zones and the endpoints inside them.

use serde::Deserialize;

use super::{name_ci, opt_id, row_basics, row_checksum, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const ZONE_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "is_global",
    "parent_id",
    "depth",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Zone {
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
    pub is_global: bool,
    #[serde(default, deserialize_with = "opt_id")]
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub depth: i64,
}

impl Zone {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Zone {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.name_checksum),
            SqlValue::from(&self.properties_checksum),
            SqlValue::from(&self.name),
            name_ci(&self.name, &self.name_ci),
            SqlValue::from(&self.is_global),
            SqlValue::from(&self.parent_id),
            SqlValue::from(&self.depth),
        ]
    }
}

pub const ENDPOINT_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "zone_id",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoint {
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
    #[serde(default, deserialize_with = "opt_id")]
    pub zone_id: Option<Id>,
}

impl Endpoint {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Endpoint {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.name_checksum),
            SqlValue::from(&self.properties_checksum),
            SqlValue::from(&self.name),
            name_ci(&self.name, &self.name_ci),
            SqlValue::from(&self.zone_id),
        ]
    }
}
