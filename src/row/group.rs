// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Host/service groups and their membership joins.

use serde::Deserialize;

use super::{name_ci, opt_id, row_basics, row_checksum, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const GROUP_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "name_checksum",
    "properties_checksum",
    "name",
    "name_ci",
    "display_name",
    "zone_id",
];

/// Hostgroups and servicegroups share a table layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Group {
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
    #[serde(default, deserialize_with = "opt_id")]
    pub zone_id: Option<Id>,
}

impl Group {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Group {
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
            SqlValue::from(&self.zone_id),
        ]
    }
}

pub const HOSTGROUP_MEMBER_COLUMNS: &[&str] = &["id", "environment_id", "host_id", "hostgroup_id"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostgroupMember {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    pub host_id: Id,
    pub hostgroup_id: Id,
}

impl HostgroupMember {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for HostgroupMember {
    row_basics!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.host_id),
            SqlValue::from(&self.hostgroup_id),
        ]
    }
}

pub const SERVICEGROUP_MEMBER_COLUMNS: &[&str] = &["id", "environment_id", "service_id", "servicegroup_id"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicegroupMember {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    pub service_id: Id,
    pub servicegroup_id: Id,
}

impl ServicegroupMember {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for ServicegroupMember {
    row_basics!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.service_id),
            SqlValue::from(&self.servicegroup_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_tuple() {
        let mut row = HostgroupMember::factory();
        row.decode(br#"{"id":"01","host_id":"02","hostgroup_id":"03"}"#).unwrap();
        assert_eq!(
            row.insert_tuple(),
            vec![
                SqlValue::Bytes(vec![1]),
                SqlValue::Bytes(vec![]),
                SqlValue::Bytes(vec![2]),
                SqlValue::Bytes(vec![3]),
            ]
        );
    }

    #[test]
    fn test_group_display_name_defaults_empty() {
        let mut row = Group::factory();
        row.decode(br#"{"name":"linux-servers"}"#).unwrap();
        let tuple = row.update_tuple();
        assert_eq!(tuple[5], SqlValue::Text(String::new()));
    }
}
