// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deduplicated string value tables (URLs and images) referenced by id.

use serde::Deserialize;

use super::{row_basics, Row};
use crate::id::Id;
use crate::storage::traits::{SqlValue, Tuple};

macro_rules! value_table {
    ($name:ident, $columns:ident, $field:ident, $column:literal) => {
        pub const $columns: &[&str] = &["id", "environment_id", $column];

        #[derive(Debug, Clone, Default, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub id: Id,
            #[serde(default)]
            pub environment_id: Id,
            pub $field: String,
        }

        impl $name {
            pub fn factory() -> Box<dyn Row> {
                Box::<Self>::default()
            }
        }

        impl Row for $name {
            row_basics!();

            fn update_tuple(&self) -> Tuple {
                vec![SqlValue::from(&self.environment_id), SqlValue::from(&self.$field)]
            }
        }
    };
}

value_table!(ActionUrl, ACTION_URL_COLUMNS, action_url, "action_url");
value_table!(NotesUrl, NOTES_URL_COLUMNS, notes_url, "notes_url");
value_table!(IconImage, ICON_IMAGE_COLUMNS, icon_image, "icon_image");
