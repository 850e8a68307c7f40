// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk statement templates.
//!
//! A [`BulkStatement`] is built once per descriptor and rendered per chunk,
//! because the number of `VALUES` groups (or `IN` placeholders) depends on the
//! chunk size:
//!
//! ```
//! use mirror_sync::registry::statement::{BulkStatement, Dialect};
//!
//! let insert = BulkStatement::insert("endpoint", "id", &["id", "environment_id", "name"], true);
//! assert_eq!(
//!     insert.render(2, Dialect::Mysql),
//!     "INSERT INTO endpoint (id, environment_id, name) VALUES (?, ?, ?), (?, ?, ?) \
//!      ON DUPLICATE KEY UPDATE environment_id = VALUES(environment_id), name = VALUES(name)"
//! );
//!
//! let delete = BulkStatement::delete("endpoint", "id");
//! assert_eq!(delete.render(3, Dialect::Postgres), "DELETE FROM endpoint WHERE id IN ($1, $2, $3)");
//! ```

use std::fmt;

/// SQL dialect of the mirror. Decides placeholders and the upsert clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Mysql,
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Derive the dialect from a connection string.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Some(Self::Mysql)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Some(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    /// Placeholder for the 1-based parameter `n`.
    fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${}", n),
            Self::Mysql | Self::Sqlite => "?".to_string(),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// What a statement does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// Multi-row insert; `upsert` adds the conflict clause.
    Insert { upsert: bool },
    /// Single-row `UPDATE ... WHERE pk = ?`, run once per tuple inside the
    /// chunk's transaction. Tuples are the non-key columns followed by the key.
    Update,
    /// `DELETE ... WHERE key IN (...)`, one key per tuple.
    Delete { key_column: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkStatement {
    pub kind: StatementKind,
    pub table: &'static str,
    pub primary_column: &'static str,
    /// Full ordered column list; the primary column comes first.
    pub columns: &'static [&'static str],
}

impl BulkStatement {
    #[must_use]
    pub fn insert(table: &'static str, primary_column: &'static str, columns: &'static [&'static str], upsert: bool) -> Self {
        Self {
            kind: StatementKind::Insert { upsert },
            table,
            primary_column,
            columns,
        }
    }

    #[must_use]
    pub fn update(table: &'static str, primary_column: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            kind: StatementKind::Update,
            table,
            primary_column,
            columns,
        }
    }

    #[must_use]
    pub fn delete(table: &'static str, key_column: &'static str) -> Self {
        Self {
            kind: StatementKind::Delete { key_column },
            table,
            primary_column: key_column,
            columns: &[],
        }
    }

    /// Columns other than the primary key, in order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        let pk = self.primary_column;
        self.columns.iter().copied().filter(move |c| *c != pk)
    }

    /// Bind parameters consumed by one tuple.
    #[must_use]
    pub fn params_per_row(&self) -> usize {
        match self.kind {
            StatementKind::Insert { .. } | StatementKind::Update => self.columns.len().max(1),
            StatementKind::Delete { .. } => 1,
        }
    }

    /// Largest chunk this statement may carry: `min(bulk_size, max_placeholders / params)`.
    ///
    /// Updates run row by row, so only `bulk_size` bounds them.
    #[must_use]
    pub fn max_rows(&self, bulk_size: usize, max_placeholders: usize) -> usize {
        let cap = match self.kind {
            StatementKind::Update => bulk_size,
            _ => bulk_size.min(max_placeholders / self.params_per_row()),
        };
        cap.max(1)
    }

    /// Render SQL for a chunk of `rows` tuples.
    ///
    /// For [`StatementKind::Update`] the result is the single-row statement
    /// regardless of `rows`.
    #[must_use]
    pub fn render(&self, rows: usize, dialect: Dialect) -> String {
        match &self.kind {
            StatementKind::Insert { upsert } => self.render_insert(rows, *upsert, dialect),
            StatementKind::Update => self.render_update(dialect),
            StatementKind::Delete { key_column } => {
                let placeholders: Vec<String> = (1..=rows).map(|n| dialect.placeholder(n)).collect();
                format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    self.table,
                    key_column,
                    placeholders.join(", ")
                )
            }
        }
    }

    fn render_insert(&self, rows: usize, upsert: bool, dialect: Dialect) -> String {
        let width = self.columns.len();
        let groups: Vec<String> = (0..rows)
            .map(|row| {
                let params: Vec<String> = (1..=width)
                    .map(|col| dialect.placeholder(row * width + col))
                    .collect();
                format!("({})", params.join(", "))
            })
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            groups.join(", ")
        );

        if upsert {
            let assignments: Vec<String> = match dialect {
                Dialect::Mysql => self
                    .non_key_columns()
                    .map(|c| format!("{c} = VALUES({c})"))
                    .collect(),
                Dialect::Postgres => self
                    .non_key_columns()
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect(),
                Dialect::Sqlite => self
                    .non_key_columns()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect(),
            };
            match dialect {
                Dialect::Mysql => {
                    sql.push_str(" ON DUPLICATE KEY UPDATE ");
                    sql.push_str(&assignments.join(", "));
                }
                Dialect::Postgres | Dialect::Sqlite => {
                    sql.push_str(&format!(" ON CONFLICT ({}) DO UPDATE SET ", self.primary_column));
                    sql.push_str(&assignments.join(", "));
                }
            }
        }
        sql
    }

    fn render_update(&self, dialect: Dialect) -> String {
        let mut n = 0;
        let assignments: Vec<String> = self
            .non_key_columns()
            .map(|c| {
                n += 1;
                format!("{} = {}", c, dialect.placeholder(n))
            })
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table,
            assignments.join(", "),
            self.primary_column,
            dialect.placeholder(n + 1)
        )
    }
}
