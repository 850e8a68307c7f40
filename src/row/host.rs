// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::Deserialize;

use super::{name_ci, opt_id, row_basics, row_checksum, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const HOST_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "display_name",
    "address",
    "address6",
    "checkcommand_name",
    "checkcommand_id",
    "max_check_attempts",
    "check_timeperiod_id",
    "check_interval",
    "check_retry_interval",
    "active_checks_enabled",
    "passive_checks_enabled",
    "notifications_enabled",
    "notes",
    "notes_url_id",
    "action_url_id",
    "icon_image_id",
    "icon_image_alt",
    "zone_id",
    "command_endpoint_id",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Host {
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
    pub address: String,
    #[serde(default)]
    pub address6: String,
    #[serde(default)]
    pub checkcommand_name: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub checkcommand_id: Option<Id>,
    #[serde(default)]
    pub max_check_attempts: f64,
    #[serde(default, deserialize_with = "opt_id")]
    pub check_timeperiod_id: Option<Id>,
    #[serde(default)]
    pub check_interval: f64,
    #[serde(default)]
    pub check_retry_interval: f64,
    #[serde(default)]
    pub active_checks_enabled: bool,
    #[serde(default)]
    pub passive_checks_enabled: bool,
    #[serde(default)]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub notes_url_id: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub action_url_id: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub icon_image_id: Option<Id>,
    #[serde(default)]
    pub icon_image_alt: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub zone_id: Option<Id>,
    #[serde(default, deserialize_with = "opt_id")]
    pub command_endpoint_id: Option<Id>,
}

impl Host {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Host {
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
            SqlValue::from(&self.address),
            SqlValue::from(&self.address6),
            SqlValue::from(&self.checkcommand_name),
            SqlValue::from(&self.checkcommand_id),
            SqlValue::from(&self.max_check_attempts),
            SqlValue::from(&self.check_timeperiod_id),
            SqlValue::from(&self.check_interval),
            SqlValue::from(&self.check_retry_interval),
            SqlValue::from(&self.active_checks_enabled),
            SqlValue::from(&self.passive_checks_enabled),
            SqlValue::from(&self.notifications_enabled),
            SqlValue::from(&self.notes),
            SqlValue::from(&self.notes_url_id),
            SqlValue::from(&self.action_url_id),
            SqlValue::from(&self.icon_image_id),
            SqlValue::from(&self.icon_image_alt),
            SqlValue::from(&self.zone_id),
            SqlValue::from(&self.command_endpoint_id),
        ]
    }
}
