// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Custom variables and the join rows attaching them to objects.

use serde::Deserialize;

use super::{row_basics, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

pub const CUSTOMVAR_COLUMNS: &[&str] = &["id", "environment_id", "name_checksum", "name", "value"];

/// A flat `name = value` pair; `value` is the JSON-encoded variable value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customvar {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub environment_id: Id,
    #[serde(default, deserialize_with = "super::opt_id")]
    pub name_checksum: Option<Id>,
    pub name: String,
    pub value: String,
}

impl Customvar {
    pub fn factory() -> Box<dyn Row> {
        Box::<Self>::default()
    }
}

impl Row for Customvar {
    row_basics!();

    fn update_tuple(&self) -> Tuple {
        vec![
            SqlValue::from(&self.environment_id),
            SqlValue::from(&self.name_checksum),
            SqlValue::from(&self.name),
            SqlValue::from(&self.value),
        ]
    }
}

/// Join between an owning object and a customvar, keyed by the owner's
/// foreign key column (`host_id`, `service_id`, `command_id`).
macro_rules! customvar_join {
    ($name:ident, $columns:ident, $owner:ident, $owner_col:literal) => {
        pub const $columns: &[&str] = &["id", "environment_id", $owner_col, "customvar_id"];

        #[derive(Debug, Clone, Default, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub id: Id,
            #[serde(default)]
            pub environment_id: Id,
            pub $owner: Id,
            pub customvar_id: Id,
        }

        impl $name {
            pub fn factory() -> Box<dyn Row> {
                Box::<Self>::default()
            }
        }

        impl Row for $name {
            row_basics!();

            fn update_tuple(&self) -> Tuple {
                vec![
                    SqlValue::from(&self.environment_id),
                    SqlValue::from(&self.$owner),
                    SqlValue::from(&self.customvar_id),
                ]
            }
        }
    };
}

customvar_join!(HostCustomvar, HOST_CUSTOMVAR_COLUMNS, host_id, "host_id");
customvar_join!(ServiceCustomvar, SERVICE_CUSTOMVAR_COLUMNS, service_id, "service_id");
customvar_join!(CheckcommandCustomvar, CHECKCOMMAND_CUSTOMVAR_COLUMNS, command_id, "command_id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customvar_decode() {
        let mut row = Customvar::factory();
        row.decode(br#"{"environment_id":"EE","name_checksum":"01","name":"os","value":"\"linux\""}"#)
            .unwrap();
        let tuple = row.insert_tuple();
        assert_eq!(tuple.len(), CUSTOMVAR_COLUMNS.len());
        assert_eq!(tuple[1], SqlValue::Bytes(vec![0xee]));
        assert_eq!(tuple[2], SqlValue::Bytes(vec![0x01]));
        assert_eq!(tuple[4], SqlValue::Text("\"linux\"".into()));
    }

    #[test]
    fn test_customvar_requires_name() {
        let mut row = Customvar::factory();
        assert!(row.decode(br#"{"value":"1"}"#).is_err());
    }

    #[test]
    fn test_join_rejects_hex_garbage() {
        let mut row = HostCustomvar::factory();
        assert!(row.decode(br#"{"host_id":"zz","customvar_id":"01"}"#).is_err());

        row.decode(br#"{"host_id":"0a","customvar_id":"0b"}"#).unwrap();
        let tuple = row.update_tuple();
        assert_eq!(tuple[1], SqlValue::Bytes(vec![0x0a]));
        assert_eq!(tuple[2], SqlValue::Bytes(vec![0x0b]));
    }
}
