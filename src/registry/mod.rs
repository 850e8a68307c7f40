// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Type descriptor registry.
//!
//! Every object type the engine mirrors is described by one immutable
//! [`TypeDescriptor`]: where it lives in the cache, which table and columns it
//! maps to, whether it carries a content checksum, and how to build an empty
//! row for it. The [`Registry`] holds them in sync order (leaves before their
//! dependents) and is read-only once built.
//!
//! # Example
//!
//! ```
//! use mirror_sync::registry::Registry;
//!
//! let registry = Registry::builtin().unwrap();
//! let host = registry.get("host").unwrap();
//! assert!(host.has_checksum);
//!
//! let order: Vec<_> = registry.sync_order().map(|d| d.object_type).collect();
//! let customvar = order.iter().position(|t| *t == "customvar").unwrap();
//! let host_customvar = order.iter().position(|t| *t == "host_customvar").unwrap();
//! assert!(customvar < host_customvar);
//! ```

pub mod builtin;
pub mod statement;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SyncError;
use crate::row::Row;
use statement::BulkStatement;

/// Column holding the environment id in every mirror table.
pub const ENVIRONMENT_COLUMN: &str = "environment_id";

/// Column holding the content checksum in checksum-bearing tables.
pub const CHECKSUM_COLUMN: &str = "properties_checksum";

/// Builds an empty row for a descriptor.
pub type RowFactory = fn() -> Box<dyn Row>;

/// Immutable description of one object type.
#[derive(Clone)]
pub struct TypeDescriptor {
    /// Unique type name (also the default table name)
    pub object_type: &'static str,
    /// Cache hash holding the documents, e.g. `checkcommand:customvar`
    pub cache_key_prefix: &'static str,
    pub table: &'static str,
    pub primary_column: &'static str,
    /// Grouping key for join/fan-out tables; deletes and diffs use it instead
    /// of the primary column.
    pub delta_column: Option<&'static str>,
    pub ordered_columns: &'static [&'static str],
    pub has_checksum: bool,
    pub row_factory: RowFactory,
    pub bulk_insert_stmt: BulkStatement,
    pub bulk_update_stmt: BulkStatement,
    pub bulk_delete_stmt: BulkStatement,
    pub notification_tag: Option<&'static str>,
    /// Types that must finish writing before this one starts.
    pub depends_on: &'static [&'static str],
}

impl TypeDescriptor {
    /// Start describing a type whose table and cache key share its name.
    #[must_use]
    pub fn builder(
        object_type: &'static str,
        ordered_columns: &'static [&'static str],
        row_factory: RowFactory,
    ) -> DescriptorBuilder {
        DescriptorBuilder {
            object_type,
            cache_key_prefix: object_type,
            table: object_type,
            primary_column: "id",
            delta_column: None,
            ordered_columns,
            has_checksum: false,
            row_factory,
            notification_tag: None,
            depends_on: &[],
        }
    }

    /// Column the diff and deletes are keyed on.
    #[must_use]
    pub fn key_column(&self) -> &'static str {
        self.delta_column.unwrap_or(self.primary_column)
    }

    #[must_use]
    pub fn new_row(&self) -> Box<dyn Row> {
        (self.row_factory)()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("object_type", &self.object_type)
            .field("cache_key_prefix", &self.cache_key_prefix)
            .field("table", &self.table)
            .field("key_column", &self.key_column())
            .field("has_checksum", &self.has_checksum)
            .finish()
    }
}

pub struct DescriptorBuilder {
    object_type: &'static str,
    cache_key_prefix: &'static str,
    table: &'static str,
    primary_column: &'static str,
    delta_column: Option<&'static str>,
    ordered_columns: &'static [&'static str],
    has_checksum: bool,
    row_factory: RowFactory,
    notification_tag: Option<&'static str>,
    depends_on: &'static [&'static str],
}

impl DescriptorBuilder {
    #[must_use]
    pub fn cache_key(mut self, prefix: &'static str) -> Self {
        self.cache_key_prefix = prefix;
        self
    }

    #[must_use]
    pub fn table(mut self, table: &'static str) -> Self {
        self.table = table;
        self
    }

    #[must_use]
    pub fn checksum(mut self) -> Self {
        self.has_checksum = true;
        self
    }

    #[must_use]
    pub fn delta_column(mut self, column: &'static str) -> Self {
        self.delta_column = Some(column);
        self
    }

    #[must_use]
    pub fn notify(mut self, tag: &'static str) -> Self {
        self.notification_tag = Some(tag);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, types: &'static [&'static str]) -> Self {
        self.depends_on = types;
        self
    }

    /// Validate the column layout and prebuild the statements.
    pub fn build(self) -> Result<TypeDescriptor, SyncError> {
        if self.ordered_columns.first() != Some(&self.primary_column) {
            return Err(SyncError::Config(format!(
                "{}: first column must be the primary column '{}'",
                self.object_type, self.primary_column
            )));
        }
        if !self.ordered_columns.contains(&ENVIRONMENT_COLUMN) {
            return Err(SyncError::Config(format!(
                "{}: missing {} column",
                self.object_type, ENVIRONMENT_COLUMN
            )));
        }
        if self.has_checksum && !self.ordered_columns.contains(&CHECKSUM_COLUMN) {
            return Err(SyncError::Config(format!(
                "{}: checksum-bearing type without {} column",
                self.object_type, CHECKSUM_COLUMN
            )));
        }
        if let Some(delta) = self.delta_column {
            if !self.ordered_columns.contains(&delta) {
                return Err(SyncError::Config(format!(
                    "{}: delta column '{}' is not a column",
                    self.object_type, delta
                )));
            }
        }

        let key_column = self.delta_column.unwrap_or(self.primary_column);
        Ok(TypeDescriptor {
            object_type: self.object_type,
            cache_key_prefix: self.cache_key_prefix,
            table: self.table,
            primary_column: self.primary_column,
            delta_column: self.delta_column,
            ordered_columns: self.ordered_columns,
            has_checksum: self.has_checksum,
            row_factory: self.row_factory,
            bulk_insert_stmt: BulkStatement::insert(
                self.table,
                self.primary_column,
                self.ordered_columns,
                self.has_checksum,
            ),
            bulk_update_stmt: BulkStatement::update(self.table, self.primary_column, self.ordered_columns),
            bulk_delete_stmt: BulkStatement::delete(self.table, key_column),
            notification_tag: self.notification_tag,
            depends_on: self.depends_on,
        })
    }
}

/// Append-only table of descriptors in sync order.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<Arc<TypeDescriptor>>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every builtin object type.
    pub fn builtin() -> Result<Self, SyncError> {
        let mut registry = Self::new();
        for descriptor in builtin::descriptors()? {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Append a descriptor.
    ///
    /// Its dependencies must already be registered, which makes registration
    /// order a valid sync order. Duplicates are rejected.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), SyncError> {
        if self.index.contains_key(descriptor.object_type) {
            return Err(SyncError::Config(format!(
                "duplicate registration of object type '{}'",
                descriptor.object_type
            )));
        }
        for dep in descriptor.depends_on {
            if !self.index.contains_key(dep) {
                return Err(SyncError::Config(format!(
                    "object type '{}' depends on unregistered type '{}'",
                    descriptor.object_type, dep
                )));
            }
        }
        self.index.insert(descriptor.object_type, self.descriptors.len());
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, object_type: &str) -> Option<&Arc<TypeDescriptor>> {
        self.index.get(object_type).map(|&i| &self.descriptors[i])
    }

    /// Descriptors, leaves first.
    pub fn sync_order(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Keep only the named types (plus their transitive dependencies).
    pub fn restrict_to(&self, object_types: &[String]) -> Result<Self, SyncError> {
        let mut wanted: Vec<&'static str> = Vec::new();
        let mut stack: Vec<&str> = object_types.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            let descriptor = self
                .get(name)
                .ok_or_else(|| SyncError::Config(format!("unknown object type '{}'", name)))?;
            if !wanted.contains(&descriptor.object_type) {
                wanted.push(descriptor.object_type);
                stack.extend(descriptor.depends_on.iter().copied());
            }
        }

        let mut restricted = Self::new();
        for descriptor in &self.descriptors {
            if wanted.contains(&descriptor.object_type) {
                restricted.register(TypeDescriptor::clone(descriptor))?;
            }
        }
        Ok(restricted)
    }
}
