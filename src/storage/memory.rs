// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory cache and mirror.
//!
//! [`MemoryCache`] holds documents the way the producer publishes them (hex
//! ids, raw JSON, a parallel checksum map). [`MemoryMirror`] interprets the
//! descriptors' [`BulkStatement`]s against plain tables, so every engine path
//! (chunking, upserts, delta-column deletes) runs unchanged without a database.
//! Both carry hooks for fault injection in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::traits::{BulkOutcome, CacheClient, MirrorStore, SqlValue, Tuple};
use crate::error::SyncError;
use crate::id::Id;
use crate::notify::Notification;
use crate::registry::statement::{BulkStatement, Dialect, StatementKind};
use crate::registry::{TypeDescriptor, CHECKSUM_COLUMN, ENVIRONMENT_COLUMN};
use crate::schema::SCHEMA_VERSION;

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

pub struct MemoryCache {
    /// key prefix → hex id → raw JSON
    objects: DashMap<String, BTreeMap<String, Vec<u8>>>,
    /// key prefix → hex id → checksum hex
    checksums: DashMap<String, HashMap<String, String>>,
    environment: RwLock<Option<String>>,
    published: Mutex<Vec<(String, Notification)>>,
    mget_calls: AtomicUsize,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            checksums: DashMap::new(),
            environment: RwLock::new(None),
            published: Mutex::new(Vec::new()),
            mget_calls: AtomicUsize::new(0),
        }
    }

    /// Publish a document.
    pub fn put(&self, key: &str, id: &str, json: impl AsRef<[u8]>) {
        self.objects
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string(), json.as_ref().to_vec());
    }

    /// Publish a document together with its advertised checksum.
    pub fn put_with_checksum(&self, key: &str, id: &str, checksum: &str, json: impl AsRef<[u8]>) {
        self.put(key, id, json);
        self.set_checksum(key, id, checksum);
    }

    pub fn set_checksum(&self, key: &str, id: &str, checksum: &str) {
        self.checksums
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string(), checksum.to_string());
    }

    pub fn remove(&self, key: &str, id: &str) {
        if let Some(mut docs) = self.objects.get_mut(key) {
            docs.remove(id);
        }
        if let Some(mut sums) = self.checksums.get_mut(key) {
            sums.remove(id);
        }
    }

    pub fn set_environment(&self, id: Option<&str>) {
        *self.environment.write() = id.map(str::to_string);
    }

    /// Notifications appended to streams, with the stream name.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Notification)> {
        self.published.lock().clone()
    }

    #[must_use]
    pub fn mget_calls(&self) -> usize {
        self.mget_calls.load(Ordering::SeqCst)
    }

    /// Documents under one key.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.objects.get(key).map(|d| d.len()).unwrap_or(0)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn scan_page(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>), SyncError> {
        let Some(docs) = self.objects.get(key) else {
            return Ok((0, Vec::new()));
        };
        let start = cursor as usize;
        let page: Vec<String> = docs.keys().skip(start).take(count.max(1)).cloned().collect();
        let end = start + page.len();
        let next = if end >= docs.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn get_checksums(&self, key: &str) -> Result<HashMap<String, String>, SyncError> {
        Ok(self.checksums.get(key).map(|c| c.clone()).unwrap_or_default())
    }

    async fn mget(&self, key: &str, ids: &[String]) -> Result<HashMap<String, Vec<u8>>, SyncError> {
        self.mget_calls.fetch_add(1, Ordering::SeqCst);
        let Some(docs) = self.objects.get(key) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|raw| (id.clone(), raw.clone())))
            .collect())
    }

    async fn environment_id(&self) -> Result<Option<String>, SyncError> {
        Ok(self.environment.read().clone())
    }

    async fn publish_notifications(&self, stream: &str, events: &[Notification]) -> Result<(), SyncError> {
        let mut published = self.published.lock();
        published.extend(events.iter().map(|e| (stream.to_string(), e.clone())));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MIRROR
// ═══════════════════════════════════════════════════════════════════════════

/// One stored row: column → value.
pub type MemoryRow = HashMap<&'static str, SqlValue>;

type Table = BTreeMap<Vec<u8>, MemoryRow>;

/// A chunk the mirror committed, for assertions on chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedChunk {
    pub table: &'static str,
    pub kind: &'static str,
    pub rows: usize,
}

type CommitHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct MemoryMirror {
    dialect: Dialect,
    tables: Mutex<HashMap<&'static str, Table>>,
    schema_version: RwLock<Option<String>>,
    failures: Mutex<VecDeque<SyncError>>,
    injected: Mutex<Vec<(&'static str, Tuple)>>,
    write_delay: RwLock<Duration>,
    on_commit: RwLock<Option<CommitHook>>,
    executed: Mutex<Vec<ExecutedChunk>>,
    attempts: AtomicUsize,
    healthy: AtomicBool,
}

impl MemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Mysql)
    }

    #[must_use]
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            tables: Mutex::new(HashMap::new()),
            schema_version: RwLock::new(Some(SCHEMA_VERSION.to_string())),
            failures: Mutex::new(VecDeque::new()),
            injected: Mutex::new(Vec::new()),
            write_delay: RwLock::new(Duration::ZERO),
            on_commit: RwLock::new(None),
            executed: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn set_schema_version(&self, version: Option<&str>) {
        *self.schema_version.write() = version.map(str::to_string);
    }

    /// Fail the next `n` bulk executions with `err` (nothing is applied).
    pub fn fail_next(&self, n: usize, err: SyncError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(err).take(n));
    }

    /// Insert `tuple` into `table` right before the next insert chunk for that
    /// table runs, as a concurrent writer would.
    pub fn inject_before_next_insert(&self, table: &'static str, tuple: Tuple) {
        self.injected.lock().push((table, tuple));
    }

    /// Every bulk execution sleeps this long before applying its chunk.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.write() = delay;
    }

    /// Called with the running count of committed chunks after each commit.
    pub fn on_commit(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_commit.write() = Some(Box::new(hook));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Seed a row directly using a descriptor's column order.
    pub fn seed(&self, descriptor: &TypeDescriptor, tuple: Tuple) {
        let row: MemoryRow = descriptor.ordered_columns.iter().copied().zip(tuple).collect();
        let pk = primary_key(&row, descriptor.primary_column);
        self.tables.lock().entry(descriptor.table).or_default().insert(pk, row);
    }

    /// All rows of a table, in primary-key order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn row(&self, table: &str, id: &[u8]) -> Option<MemoryRow> {
        self.tables.lock().get(table).and_then(|t| t.get(id).cloned())
    }

    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(BTreeMap::len).unwrap_or(0)
    }

    /// Committed chunks, in commit order.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedChunk> {
        self.executed.lock().clone()
    }

    pub fn clear_executed(&self) {
        self.executed.lock().clear();
    }

    /// Bulk executions started, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn apply(&self, statement: &BulkStatement, tuples: &[Tuple]) -> Result<BulkOutcome, SyncError> {
        let mut tables = self.tables.lock();

        if matches!(statement.kind, StatementKind::Insert { .. }) {
            let mut injected = self.injected.lock();
            let (now, later): (Vec<_>, Vec<_>) = injected.drain(..).partition(|(t, _)| *t == statement.table);
            *injected = later;
            let table = tables.entry(statement.table).or_default();
            for (_, tuple) in now {
                let row: MemoryRow = statement.columns.iter().copied().zip(tuple).collect();
                table.insert(primary_key(&row, statement.primary_column), row);
            }
        }

        // Work on a copy so a failing chunk leaves the table untouched.
        let mut table = tables.get(statement.table).cloned().unwrap_or_default();
        let mut outcome = BulkOutcome::default();

        match &statement.kind {
            StatementKind::Insert { upsert } => {
                for tuple in tuples {
                    let row: MemoryRow = statement.columns.iter().copied().zip(tuple.iter().cloned()).collect();
                    let pk = primary_key(&row, statement.primary_column);
                    if table.contains_key(&pk) {
                        if !*upsert {
                            return Err(SyncError::FatalIo(format!(
                                "duplicate entry '{}' for key '{}.{}'",
                                hex::encode(&pk),
                                statement.table,
                                statement.primary_column
                            )));
                        }
                        outcome.conflicts += 1;
                    }
                    table.insert(pk, row);
                    outcome.rows_affected += 1;
                }
            }
            StatementKind::Update => {
                for tuple in tuples {
                    let Some((key, values)) = tuple.split_last() else {
                        continue;
                    };
                    let pk = key.as_bytes().map(<[u8]>::to_vec).unwrap_or_default();
                    if let Some(row) = table.get_mut(&pk) {
                        for (column, value) in statement.non_key_columns().zip(values.iter().cloned()) {
                            row.insert(column, value);
                        }
                        outcome.rows_affected += 1;
                    }
                }
            }
            StatementKind::Delete { key_column } => {
                for tuple in tuples {
                    let Some(key) = tuple.first() else {
                        continue;
                    };
                    let before = table.len();
                    table.retain(|_, row| row.get(key_column) != Some(key));
                    outcome.rows_affected += (before - table.len()) as u64;
                }
            }
        }

        tables.insert(statement.table, table);
        Ok(outcome)
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn primary_key(row: &MemoryRow, column: &str) -> Vec<u8> {
    row.get(column)
        .and_then(SqlValue::as_bytes)
        .map(<[u8]>::to_vec)
        .unwrap_or_default()
}

fn statement_kind(kind: &StatementKind) -> &'static str {
    match kind {
        StatementKind::Insert { .. } => "insert",
        StatementKind::Update => "update",
        StatementKind::Delete { .. } => "delete",
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn select_ids(&self, descriptor: &TypeDescriptor, environment_id: &Id) -> Result<Vec<Id>, SyncError> {
        let env = SqlValue::from(environment_id);
        let key_column = descriptor.key_column();
        let tables = self.tables.lock();
        let ids: BTreeSet<Id> = tables
            .get(descriptor.table)
            .into_iter()
            .flat_map(|t| t.values())
            .filter(|row| row.get(ENVIRONMENT_COLUMN) == Some(&env))
            .filter_map(|row| row.get(key_column).and_then(SqlValue::as_bytes))
            .map(Id::from_bytes)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn select_id_checksum(
        &self,
        descriptor: &TypeDescriptor,
        environment_id: &Id,
    ) -> Result<HashMap<Id, Id>, SyncError> {
        let env = SqlValue::from(environment_id);
        let key_column = descriptor.key_column();
        let tables = self.tables.lock();
        Ok(tables
            .get(descriptor.table)
            .into_iter()
            .flat_map(|t| t.values())
            .filter(|row| row.get(ENVIRONMENT_COLUMN) == Some(&env))
            .filter_map(|row| {
                let key = row.get(key_column).and_then(SqlValue::as_bytes)?;
                let checksum = row
                    .get(CHECKSUM_COLUMN)
                    .and_then(SqlValue::as_bytes)
                    .map(Id::from_bytes)
                    .unwrap_or_default();
                Some((Id::from_bytes(key), checksum))
            })
            .collect())
    }

    async fn execute_bulk(&self, statement: &BulkStatement, tuples: &[Tuple]) -> Result<BulkOutcome, SyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.write_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let outcome = self.apply(statement, tuples)?;

        let committed = {
            let mut executed = self.executed.lock();
            executed.push(ExecutedChunk {
                table: statement.table,
                kind: statement_kind(&statement.kind),
                rows: tuples.len(),
            });
            executed.len()
        };
        if let Some(hook) = self.on_commit.read().as_ref() {
            hook(committed);
        }
        Ok(outcome)
    }

    async fn schema_version(&self) -> Result<Option<String>, SyncError> {
        Ok(self.schema_version.read().clone())
    }

    async fn ping(&self) -> Result<u64, SyncError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(0)
        } else {
            Err(SyncError::TransientIo("memory mirror marked unhealthy".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn bytes(b: &[u8]) -> SqlValue {
        SqlValue::Bytes(b.to_vec())
    }

    #[tokio::test]
    async fn test_cache_scan_pages() {
        let cache = MemoryCache::new();
        for i in 0..5u8 {
            cache.put("host", &format!("{:02x}", i), "{}");
        }

        let (next, page) = cache.scan_page("host", 0, 2).await.unwrap();
        assert_eq!(page, vec!["00", "01"]);
        assert_eq!(next, 2);

        let all = cache.scan("host").await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(cache.scan("service").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_mget_skips_missing() {
        let cache = MemoryCache::new();
        cache.put("zone", "aa", r#"{"name":"a"}"#);
        let got = cache.mget("zone", &["aa".into(), "bb".into()]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got.contains_key("aa"));
    }

    #[tokio::test]
    async fn test_mirror_upsert_counts_conflicts() {
        let registry = Registry::builtin().unwrap();
        let endpoint = registry.get("endpoint").unwrap();
        let mirror = MemoryMirror::new();

        let mut tuple = vec![bytes(&[0xaa]), bytes(&[0xee]), SqlValue::Null, bytes(&[0x11])];
        tuple.extend([SqlValue::from("a"), SqlValue::from("a"), SqlValue::Null]);
        mirror.seed(endpoint, tuple.clone());

        tuple[3] = bytes(&[0x22]);
        let outcome = mirror.execute_bulk(&endpoint.bulk_insert_stmt, &[tuple]).await.unwrap();
        assert_eq!(outcome.conflicts, 1);

        let checksums = mirror
            .select_id_checksum(endpoint, &Id::from_bytes(vec![0xee]))
            .await
            .unwrap();
        assert_eq!(checksums[&Id::from_bytes(vec![0xaa])], Id::from_bytes(vec![0x22]));
    }

    #[tokio::test]
    async fn test_mirror_plain_insert_rejects_duplicates() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let mirror = MemoryMirror::new();
        let tuple = vec![bytes(&[1]), bytes(&[0xee]), SqlValue::Null, SqlValue::from("n"), SqlValue::from("v")];

        mirror.execute_bulk(&customvar.bulk_insert_stmt, &[tuple.clone()]).await.unwrap();
        let err = mirror.execute_bulk(&customvar.bulk_insert_stmt, &[tuple]).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(mirror.count("customvar"), 1);
    }

    #[tokio::test]
    async fn test_mirror_failed_chunk_is_not_applied() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let mirror = MemoryMirror::new();
        mirror.fail_next(1, SyncError::TransientIo("deadlock".into()));

        let tuple = vec![bytes(&[1]), bytes(&[0xee]), SqlValue::Null, SqlValue::from("n"), SqlValue::from("v")];
        assert!(mirror.execute_bulk(&customvar.bulk_insert_stmt, &[tuple.clone()]).await.is_err());
        assert_eq!(mirror.count("customvar"), 0);
        mirror.execute_bulk(&customvar.bulk_insert_stmt, &[tuple]).await.unwrap();
        assert_eq!(mirror.count("customvar"), 1);
        assert_eq!(mirror.attempts(), 2);
        assert_eq!(mirror.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_mirror_delete_by_delta_column() {
        let registry = Registry::builtin().unwrap();
        let ranges = registry.get("timeperiod_range").unwrap();
        let mirror = MemoryMirror::new();
        for (id, parent) in [(1u8, 0xabu8), (2, 0xab), (3, 0xcd)] {
            mirror.seed(
                ranges,
                vec![bytes(&[id]), bytes(&[0xee]), bytes(&[parent]), SqlValue::from("k"), SqlValue::from("v"), SqlValue::Null],
            );
        }

        let env = Id::from_bytes(vec![0xee]);
        let keys = mirror.select_ids(ranges, &env).await.unwrap();
        assert_eq!(keys, vec![Id::from_bytes(vec![0xab]), Id::from_bytes(vec![0xcd])]);

        let outcome = mirror
            .execute_bulk(&ranges.bulk_delete_stmt, &[vec![bytes(&[0xab])]])
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(mirror.count("timeperiod_range"), 1);
    }

    #[tokio::test]
    async fn test_select_filters_environment() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let mirror = MemoryMirror::new();
        mirror.seed(customvar, vec![bytes(&[1]), bytes(&[0xee]), SqlValue::Null, SqlValue::from("n"), SqlValue::from("v")]);
        mirror.seed(customvar, vec![bytes(&[2]), bytes(&[0xff]), SqlValue::Null, SqlValue::from("n"), SqlValue::from("v")]);

        let ids = mirror.select_ids(customvar, &Id::from_bytes(vec![0xee])).await.unwrap();
        assert_eq!(ids, vec![Id::from_bytes(vec![1])]);
    }
}
