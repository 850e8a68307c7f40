// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed mirror rows.
//!
//! Every object type has a row struct that deserializes from the cache JSON
//! and renders itself as bind tuples for the descriptor's statements. Ids in
//! the JSON are hex; they are decoded into [`Id`] during deserialization, so a
//! row can only ever carry internal-form keys.
//!
//! Tuple shape is fixed for all types:
//!
//! ```text
//! insert_tuple = (id, update_tuple...)
//! update_tuple = every ordered column except the primary id
//! ```

pub mod command;
pub mod customvar;
pub mod endpoint;
pub mod group;
pub mod host;
pub mod service;
pub mod timeperiod;
pub mod value;

use std::fmt;

use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

/// Uniform operations over a typed row.
pub trait Row: Send + Sync + fmt::Debug {
    fn id(&self) -> &Id;
    fn set_id(&mut self, id: Id);

    fn environment_id(&self) -> &Id;
    fn set_environment_id(&mut self, id: Id);

    /// Content checksum, for checksum-bearing types.
    fn checksum(&self) -> Option<&Id> {
        None
    }

    fn set_checksum(&mut self, _checksum: Id) {}

    /// Replace this row's contents with the cache document.
    fn decode(&mut self, raw: &[u8]) -> Result<(), serde_json::Error>;

    /// Values for every ordered column except the primary id.
    fn update_tuple(&self) -> Tuple;

    fn insert_tuple(&self) -> Tuple {
        let update = self.update_tuple();
        let mut tuple = Vec::with_capacity(update.len() + 1);
        tuple.push(SqlValue::from(self.id()));
        tuple.extend(update);
        tuple
    }

    /// Final mirror rows for this document. Identity for all but fan-out types.
    fn expand(self: Box<Self>) -> Vec<Box<dyn Row>>;
}

/// Shared `Row` plumbing for structs with `id` and `environment_id` fields.
macro_rules! row_basics {
    () => {
        fn id(&self) -> &crate::id::Id {
            &self.id
        }

        fn set_id(&mut self, id: crate::id::Id) {
            self.id = id;
        }

        fn environment_id(&self) -> &crate::id::Id {
            &self.environment_id
        }

        fn set_environment_id(&mut self, id: crate::id::Id) {
            self.environment_id = id;
        }

        fn decode(&mut self, raw: &[u8]) -> Result<(), serde_json::Error> {
            *self = serde_json::from_slice(raw)?;
            Ok(())
        }

        fn expand(self: Box<Self>) -> Vec<Box<dyn crate::row::Row>> {
            vec![self]
        }
    };
}

/// `checksum`/`set_checksum` for structs with a `properties_checksum` field.
macro_rules! row_checksum {
    () => {
        fn checksum(&self) -> Option<&crate::id::Id> {
            self.properties_checksum.as_ref().filter(|c| !c.is_empty())
        }

        fn set_checksum(&mut self, checksum: crate::id::Id) {
            self.properties_checksum = Some(checksum);
        }
    };
}

pub(crate) use row_basics;
pub(crate) use row_checksum;

/// `name_ci` falls back to `name` when the document omits it.
pub(crate) fn name_ci(name: &str, name_ci: &Option<String>) -> SqlValue {
    SqlValue::Text(name_ci.clone().unwrap_or_else(|| name.to_string()))
}

/// Nullable foreign key: absent, `null` and `""` all mean "no reference".
pub(crate) fn opt_id<'de, D>(deserializer: D) -> Result<Option<Id>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match crate::id::encode_id_or_null(raw.as_deref()).map_err(serde::de::Error::custom)? {
        SqlValue::Bytes(bytes) => Ok(Some(Id::from_bytes(bytes))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::customvar::Customvar;

    #[test]
    fn test_insert_tuple_prepends_id() {
        let mut row = Customvar::factory();
        row.decode(br#"{"id":"aa","environment_id":"ee","name":"os","value":"\"linux\""}"#)
            .unwrap();

        let insert = row.insert_tuple();
        let update = row.update_tuple();
        assert_eq!(insert[0], SqlValue::Bytes(vec![0xaa]));
        assert_eq!(&insert[1..], update.as_slice());
    }

    #[test]
    fn test_set_id_and_environment() {
        let mut row = Customvar::factory();
        row.set_id(Id::from_bytes(vec![1]));
        row.set_environment_id(Id::from_bytes(vec![2]));
        assert_eq!(row.id().as_bytes(), &[1]);
        assert_eq!(row.environment_id().as_bytes(), &[2]);
        assert!(row.checksum().is_none());
    }

    #[derive(serde::Deserialize)]
    struct Ref {
        #[serde(default, deserialize_with = "opt_id")]
        zone_id: Option<Id>,
    }

    #[test]
    fn test_optional_reference() {
        let r: Ref = serde_json::from_str(r#"{"zone_id":""}"#).unwrap();
        assert!(r.zone_id.is_none());
        let r: Ref = serde_json::from_str(r#"{"zone_id":null}"#).unwrap();
        assert!(r.zone_id.is_none());
        let r: Ref = serde_json::from_str("{}").unwrap();
        assert!(r.zone_id.is_none());
        let r: Ref = serde_json::from_str(r#"{"zone_id":"0A"}"#).unwrap();
        assert_eq!(r.zone_id.unwrap().as_bytes(), &[0x0a]);
        assert!(serde_json::from_str::<Ref>(r#"{"zone_id":"0"}"#).is_err());
    }
}
