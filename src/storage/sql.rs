// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL implementation of the relational mirror.
//!
//! One `sqlx` `Any` pool serves MySQL/MariaDB, PostgreSQL and SQLite; the
//! [`Dialect`] derived from the URL decides placeholders and the upsert
//! clause. Every chunk runs in its own transaction:
//!
//! ```text
//! BEGIN
//!   INSERT INTO host (...) VALUES (...), (...) ON DUPLICATE KEY UPDATE ...
//! COMMIT
//! ```
//!
//! Updates are issued row by row inside the chunk's transaction, deletes as a
//! single `IN (...)` statement.
//!
//! ## sqlx Any Driver Quirks
//!
//! Binary id columns come back as `Vec<u8>`. Text columns on MySQL may be
//! reported as BLOB, so version strings are read as either.

use std::collections::HashMap;
use std::sync::Once;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};
use tracing::debug;

use super::traits::{BulkOutcome, MirrorStore, SqlValue, Tuple};
use crate::error::SyncError;
use crate::id::Id;
use crate::registry::statement::{BulkStatement, Dialect, StatementKind};
use crate::registry::{TypeDescriptor, CHECKSUM_COLUMN, ENVIRONMENT_COLUMN};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

pub struct SqlMirror {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlMirror {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, SyncError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string).ok_or_else(|| {
            SyncError::Config("sql_url must start with mysql:, postgres: or sqlite:".to_string())
        })?;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
        })
        .await
        .map_err(|e| SyncError::FatalIo(format!("sql connect failed: {}", e)))?;

        let mirror = Self { pool, dialect };
        if dialect == Dialect::Sqlite {
            mirror.enable_wal_mode().await?;
        }
        Ok(mirror)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// WAL mode lets the UI read while we write.
    async fn enable_wal_mode(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode = WAL").execute(&self.pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&self.pool).await?;
        Ok(())
    }

    fn select_sql(&self, descriptor: &TypeDescriptor, with_checksum: bool) -> String {
        let key = descriptor.key_column();
        let distinct = if descriptor.delta_column.is_some() { "DISTINCT " } else { "" };
        let columns = if with_checksum {
            format!("{}, {}", key, CHECKSUM_COLUMN)
        } else {
            key.to_string()
        };
        format!(
            "SELECT {}{} FROM {} WHERE {} = {}",
            distinct,
            columns,
            descriptor.table,
            ENVIRONMENT_COLUMN,
            if self.dialect == Dialect::Postgres { "$1" } else { "?" }
        )
    }
}

fn bind_value<'q>(query: AnyQuery<'q>, value: &SqlValue) -> AnyQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<Vec<u8>>),
        SqlValue::TextNull => query.bind(None::<String>),
        SqlValue::Bytes(b) => query.bind(b.clone()),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Bool(b) => query.bind(*b),
    }
}

fn text_column(row: &AnyRow, index: usize) -> Result<String, sqlx::Error> {
    row.try_get::<String, _>(index)
        .or_else(|_| row.try_get::<Vec<u8>, _>(index).map(|b| String::from_utf8_lossy(&b).into_owned()))
}

#[async_trait]
impl MirrorStore for SqlMirror {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn select_ids(&self, descriptor: &TypeDescriptor, environment_id: &Id) -> Result<Vec<Id>, SyncError> {
        let sql = self.select_sql(descriptor, false);
        let rows = sqlx::query(&sql)
            .bind(environment_id.as_bytes().to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(Id::from_bytes(row.try_get::<Vec<u8>, _>(0)?));
        }
        Ok(ids)
    }

    async fn select_id_checksum(
        &self,
        descriptor: &TypeDescriptor,
        environment_id: &Id,
    ) -> Result<HashMap<Id, Id>, SyncError> {
        let sql = self.select_sql(descriptor, true);
        let rows = sqlx::query(&sql)
            .bind(environment_id.as_bytes().to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut checksums = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Vec<u8> = row.try_get(0)?;
            let checksum: Option<Vec<u8>> = row.try_get(1)?;
            checksums.insert(Id::from_bytes(id), Id::from_bytes(checksum.unwrap_or_default()));
        }
        Ok(checksums)
    }

    async fn execute_bulk(&self, statement: &BulkStatement, tuples: &[Tuple]) -> Result<BulkOutcome, SyncError> {
        if tuples.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut outcome = BulkOutcome::default();
        // Dropping `tx` without commit (error or cancellation) rolls back.
        let mut tx = self.pool.begin().await?;

        match &statement.kind {
            StatementKind::Insert { upsert } => {
                let sql = statement.render(tuples.len(), self.dialect);
                let mut query = sqlx::query(&sql);
                for tuple in tuples {
                    for value in tuple {
                        query = bind_value(query, value);
                    }
                }
                let result = query.execute(&mut *tx).await?;
                outcome.rows_affected = result.rows_affected();
                // MySQL counts an upserted duplicate as two affected rows.
                if *upsert && self.dialect == Dialect::Mysql {
                    outcome.conflicts = outcome.rows_affected.saturating_sub(tuples.len() as u64);
                }
            }
            StatementKind::Update => {
                let sql = statement.render(1, self.dialect);
                for tuple in tuples {
                    let mut query = sqlx::query(&sql);
                    for value in tuple {
                        query = bind_value(query, value);
                    }
                    outcome.rows_affected += query.execute(&mut *tx).await?.rows_affected();
                }
            }
            StatementKind::Delete { .. } => {
                let sql = statement.render(tuples.len(), self.dialect);
                let mut query = sqlx::query(&sql);
                for tuple in tuples {
                    if let Some(key) = tuple.first() {
                        query = bind_value(query, key);
                    }
                }
                outcome.rows_affected = query.execute(&mut *tx).await?.rows_affected();
            }
        }

        tx.commit().await?;
        debug!(
            table = statement.table,
            rows = tuples.len(),
            affected = outcome.rows_affected,
            "Chunk committed"
        );
        Ok(outcome)
    }

    async fn schema_version(&self) -> Result<Option<String>, SyncError> {
        let row = sqlx::query("SELECT version FROM mirror_schema ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(text_column(&row, 0)?)),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<u64, SyncError> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed().as_millis() as u64)
    }
}
