// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Check commands and their environment variables.

use serde::Deserialize;

use super::{name_ci, opt_id, row_basics, row_checksum, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const CHECKCOMMAND_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "zone_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "command",
    "timeout",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Checkcommand {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    #[serde(default, deserialize_with = "opt_id")]
    pub zone_id: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub name_checksum: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub properties_checksum: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub name_ci: Option<String>,
    /// Command line, JSON-encoded by the producer
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub timeout: i64,
}

impl Checkcommand {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Checkcommand {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.zone_id),
            SqlValue::from(&self.name_checksum),
            SqlValue::from(&self.properties_checksum),
            SqlValue::from(&self.name),
            name_ci(&self.name, &self.name_ci),
            SqlValue::from(&self.command),
            SqlValue::from(&self.timeout),
        ]
    }
}

pub const CHECKCOMMAND_ENVVAR_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "command_id",
    "envvar_key",
    "properties_checksum",
    "envvar_value",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckcommandEnvvar {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    pub command_id: Id,
    pub envvar_key: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub properties_checksum: Option<Id>,
    #[serde(default)]
    pub envvar_value: String,
}

impl CheckcommandEnvvar {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for CheckcommandEnvvar {
    row_basics!();
    row_checksum!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.command_id),
            SqlValue::from(&self.envvar_key),
            SqlValue::from(&self.properties_checksum),
            SqlValue::from(&self.envvar_value),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envvar_decode() {
        let mut row = CheckcommandEnvvar::factory();
        row.decode(br#"{"command_id":"aa","envvar_key":"PATH","envvar_value":"\"/usr/bin\"","properties_checksum":"0f"}"#)
            .unwrap();
        let tuple = row.insert_tuple();
        assert_eq!(tuple.len(), CHECKCOMMAND_ENVVAR_COLUMNS.len());
        assert_eq!(tuple[2], SqlValue::Bytes(vec![0xaa]));
        assert_eq!(tuple[3], SqlValue::Text("PATH".into()));
        assert_eq!(row.checksum().unwrap().as_bytes(), &[0x0f]);
    }

    #[test]
    fn test_timeout_must_be_integer() {
        let mut row = Checkcommand::factory();
        assert!(row.decode(br#"{"name":"ping","timeout":"soon"}"#).is_err());
        row.decode(br#"{"name":"ping","timeout":60}"#).unwrap();
        assert_eq!(row.update_tuple()[7], SqlValue::Int(60));
    }
}
