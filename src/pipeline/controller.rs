// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-type controller: one tick of scan → diff → hydrate → write → notify.
//!
//! # State machine
//!
//! ```text
//!          ┌──────────────────────── tick ─────────────────────────┐
//!          ▼                                                       │
//!   Idle ──▶ Scanning ──▶ Diffing ──▶ Hydrating ──▶ Writing ──▶ Notifying ──▶ Idle
//!              │            │            │             │
//!              └────────────┴────────────┴─────────────┴──▶ Failed ──(backoff)──▶ Scanning
//! ```
//!
//! # Dependency gates
//!
//! Every tick gives each type a gate. A controller opens its own gate after a
//! clean tick and waits for the gates of its dependencies before `Writing`.
//! A dependency that fails or skips closes its gate, and dependents skip the
//! tick without writing. A type with nothing to write still waits on its
//! dependencies, so a closed gate propagates to every transitive dependent.
//! Scanning and hydration still run in parallel.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decode::{DecodeItem, DecodePackage};
use super::delta::{compute_delta, mirror_checksums, mirror_ids, CacheSnapshot, ChecksumMap, Delta};
use super::writer::{BulkWriter, WriteOp, WriteReport, WriterConfig};
use crate::error::SyncError;
use crate::id::Id;
use crate::metrics::{self, PhaseTimer};
use crate::notify::build_notifications;
use crate::registry::TypeDescriptor;
use crate::resilience::retry::{Backoff, RetryConfig};
use crate::row::Row;
use crate::storage::traits::{SqlValue, Tuple};
use crate::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Scanning,
    Diffing,
    Hydrating,
    Writing,
    Notifying,
    Failed,
}

impl ControllerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Diffing => "diffing",
            Self::Hydrating => "hydrating",
            Self::Writing => "writing",
            Self::Notifying => "notifying",
            Self::Failed => "failed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Gates
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Pending,
    Open,
    Closed,
}

/// One gate per type for a single tick.
#[derive(Debug, Default)]
pub struct TickGates {
    gates: HashMap<&'static str, watch::Sender<Gate>>,
}

impl TickGates {
    #[must_use]
    pub fn new(object_types: impl IntoIterator<Item = &'static str>) -> Self {
        let gates = object_types
            .into_iter()
            .map(|name| (name, watch::channel(Gate::Pending).0))
            .collect();
        Self { gates }
    }

    /// Gate state right now (`None` for an unknown type).
    #[must_use]
    pub fn state(&self, object_type: &str) -> Option<Gate> {
        self.gates.get(object_type).map(|tx| *tx.borrow())
    }

    fn guard(&self, object_type: &str) -> GateGuard<'_> {
        GateGuard {
            tx: self.gates.get(object_type),
            opened: false,
        }
    }

    /// Wait until `object_type`'s gate settles; `true` when it opened.
    /// Types without a gate count as open.
    async fn wait_open(&self, object_type: &str, cancel: &CancellationToken) -> Result<bool, SyncError> {
        let Some(tx) = self.gates.get(object_type) else {
            return Ok(true);
        };
        let mut rx = tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            settled = rx.wait_for(|gate| *gate != Gate::Pending) => {
                Ok(matches!(settled.as_deref(), Ok(Gate::Open)))
            }
        }
    }
}

/// Closes the gate unless it was explicitly opened, on every exit path.
struct GateGuard<'a> {
    tx: Option<&'a watch::Sender<Gate>>,
    opened: bool,
}

impl GateGuard<'_> {
    fn open(mut self) {
        if let Some(tx) = self.tx {
            tx.send_replace(Gate::Open);
        }
        self.opened = true;
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if !self.opened {
            if let Some(tx) = self.tx {
                tx.send_replace(Gate::Closed);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Still inside the failure backoff window
    BackingOff,
    /// The previous tick for this type is still running
    ScanInProgress,
    /// A dependency did not finish cleanly this tick
    Dependency(&'static str),
}

/// What one tick did for one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub object_type: &'static str,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub bad_rows: usize,
    pub notifications: usize,
    pub write: WriteReport,
    pub skipped: Option<SkipReason>,
}

impl TickReport {
    fn new(object_type: &'static str) -> Self {
        Self {
            object_type,
            inserted: 0,
            updated: 0,
            deleted: 0,
            bad_rows: 0,
            notifications: 0,
            write: WriteReport::default(),
            skipped: None,
        }
    }

    fn skipped(object_type: &'static str, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(object_type)
        }
    }

    /// Rows changed in the mirror.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Decoded rows for one tick.
#[derive(Debug, Default)]
struct Hydrated {
    insert_rows: Vec<Box<dyn Row>>,
    update_rows: Vec<Box<dyn Row>>,
    inserted_ids: Vec<Id>,
    updated_ids: Vec<Id>,
    bad_rows: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════════════════

struct Inner {
    state: ControllerState,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

pub struct Controller {
    descriptor: Arc<TypeDescriptor>,
    ctx: Arc<Supervisor>,
    writer: BulkWriter,
    /// Held for the whole tick; never two scans for one type
    scan_lock: tokio::sync::Mutex<()>,
    inner: Mutex<Inner>,
}

impl Controller {
    #[must_use]
    pub fn new(descriptor: Arc<TypeDescriptor>, ctx: Arc<Supervisor>) -> Self {
        let writer = BulkWriter::new(
            Arc::clone(&ctx.mirror),
            WriterConfig::from_config(&ctx.config),
            ctx.cancel.clone(),
        );
        Self {
            descriptor,
            ctx,
            writer,
            scan_lock: tokio::sync::Mutex::new(()),
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                backoff: Backoff::new(RetryConfig::daemon()),
                retry_at: None,
            }),
        }
    }

    /// Replace the failure backoff schedule.
    #[must_use]
    pub fn with_backoff(self, config: RetryConfig) -> Self {
        self.inner.lock().backoff = Backoff::new(config);
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    /// Time left in the failure backoff, if any.
    #[must_use]
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let retry_at = self.inner.lock().retry_at?;
        retry_at.checked_duration_since(Instant::now())
    }

    /// Run one tick. Always settles this type's gate before returning.
    #[tracing::instrument(skip(self, gates), fields(object_type = self.descriptor.object_type))]
    pub async fn tick(&self, gates: &TickGates) -> Result<TickReport, SyncError> {
        let object_type = self.descriptor.object_type;
        let gate = gates.guard(object_type);

        if let Some(remaining) = self.backoff_remaining() {
            debug!(object_type, retry_in = ?remaining, "Backing off, skipping tick");
            metrics::record_tick(object_type, "skipped");
            return Ok(TickReport::skipped(object_type, SkipReason::BackingOff));
        }
        let Ok(_scan) = self.scan_lock.try_lock() else {
            debug!(object_type, "Previous tick still running, skipping");
            metrics::record_tick(object_type, "skipped");
            return Ok(TickReport::skipped(object_type, SkipReason::ScanInProgress));
        };

        let started = Instant::now();
        match self.run(gates).await {
            Ok(report) => {
                if report.skipped.is_none() {
                    gate.open();
                }
                self.succeed(&report, started.elapsed());
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                self.set_state(ControllerState::Idle);
                metrics::record_tick(object_type, "cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                self.fail(&e);
                if e.is_fatal() {
                    self.ctx.report_fatal(e.clone());
                }
                Err(e)
            }
        }
    }

    async fn run(&self, gates: &TickGates) -> Result<TickReport, SyncError> {
        let descriptor = &self.descriptor;
        let object_type = descriptor.object_type;
        let config = &self.ctx.config;
        let env = self.ctx.env_id();
        let mut report = TickReport::new(object_type);

        // Scanning
        self.set_state(ControllerState::Scanning);
        let (snapshot, mirror) = {
            let _timer = PhaseTimer::new(object_type, "scan");
            self.bounded("scan", config.scan_timeout(), self.scan(&env)).await?
        };
        for err in &snapshot.invalid {
            self.drop_row(err);
            report.bad_rows += 1;
        }

        // Diffing
        self.set_state(ControllerState::Diffing);
        let CacheSnapshot { entries, keys, .. } = snapshot;
        let (delta, cache_checksums) = {
            let _timer = PhaseTimer::new(object_type, "diff");
            let has_checksum = descriptor.has_checksum;
            let diff = tokio::task::spawn_blocking(move || {
                let delta = compute_delta(has_checksum, &entries, &mirror);
                (delta, entries)
            });
            self.bounded("diff", config.diff_timeout(), async {
                diff.await.map_err(|e| {
                    if e.is_panic() {
                        std::panic::resume_unwind(e.into_panic());
                    }
                    SyncError::Cancelled
                })
            })
            .await?
        };
        metrics::record_delta(object_type, "insert", delta.to_insert.len());
        metrics::record_delta(object_type, "update", delta.to_update.len());
        metrics::record_delta(object_type, "delete", delta.to_delete.len());
        debug!(
            object_type,
            to_insert = delta.to_insert.len(),
            to_update = delta.to_update.len(),
            to_delete = delta.to_delete.len(),
            "Delta computed"
        );

        if delta.is_empty() {
            // Nothing to write, but the gate still must not open past a
            // dependency that failed, or closure would stop one level down.
            if let Some(dependency) = self.blocked_by(gates).await? {
                self.set_state(ControllerState::Idle);
                return Ok(TickReport::skipped(object_type, SkipReason::Dependency(dependency)));
            }
            self.set_state(ControllerState::Idle);
            return Ok(report);
        }

        // Hydrating
        self.set_state(ControllerState::Hydrating);
        let hydrated = {
            let _timer = PhaseTimer::new(object_type, "hydrate");
            self.cancellable(self.hydrate(&delta, &keys, &cache_checksums, &env)).await?
        };
        report.bad_rows += hydrated.bad_rows;

        if let Some(dependency) = self.blocked_by(gates).await? {
            info!(object_type, dependency, "Dependency did not sync this tick, deferring writes");
            self.set_state(ControllerState::Idle);
            return Ok(TickReport::skipped(object_type, SkipReason::Dependency(dependency)));
        }

        // Writing
        self.set_state(ControllerState::Writing);
        report.deleted = delta.to_delete.len();
        report.inserted = hydrated.inserted_ids.len();
        report.updated = hydrated.updated_ids.len();
        let (deletes, inserts, updates) = self.plan(&delta, &hydrated);
        {
            let _timer = PhaseTimer::new(object_type, "write");
            report.write.merge(self.writer.write(descriptor, WriteOp::Delete, deletes).await?);
            report.write.merge(self.writer.write(descriptor, WriteOp::Insert, inserts).await?);
            report.write.merge(self.writer.write(descriptor, WriteOp::Update, updates).await?);
        }

        // Notifying
        self.set_state(ControllerState::Notifying);
        if let Some(tag) = descriptor.notification_tag {
            let events = build_notifications(
                tag,
                &env,
                &hydrated.inserted_ids,
                &hydrated.updated_ids,
                &delta.to_delete,
            );
            if !events.is_empty() {
                self.ctx.broadcast(&events);
                if let Some(stream) = &config.notification_stream {
                    if let Err(e) = self.ctx.cache.publish_notifications(stream, &events).await {
                        metrics::record_error(object_type, "notify");
                        warn!(object_type, stream = %stream, error = %e, "Failed to forward notifications");
                    }
                }
                metrics::record_notifications(tag, events.len());
                report.notifications = events.len();
            }
        }

        self.set_state(ControllerState::Idle);
        Ok(report)
    }

    /// First dependency whose gate closed this tick, waiting for each to settle.
    async fn blocked_by(&self, gates: &TickGates) -> Result<Option<&'static str>, SyncError> {
        for dependency in self.descriptor.depends_on {
            if !gates.wait_open(dependency, &self.ctx.cancel).await? {
                return Ok(Some(dependency));
            }
        }
        Ok(None)
    }

    /// Cache ids+checksums and mirror keys(+checksums), concurrently.
    async fn scan(&self, env: &Id) -> Result<(CacheSnapshot, ChecksumMap), SyncError> {
        let descriptor = &*self.descriptor;
        let cache = async {
            let ids = self.ctx.cache.scan(descriptor.cache_key_prefix).await?;
            let checksums = if descriptor.has_checksum {
                self.ctx.cache.get_checksums(descriptor.cache_key_prefix).await?
            } else {
                HashMap::new()
            };
            Ok::<_, SyncError>(CacheSnapshot::build(ids, &checksums))
        };
        let mirror = async {
            if descriptor.has_checksum {
                Ok::<_, SyncError>(mirror_checksums(
                    self.ctx.mirror.select_id_checksum(descriptor, env).await?,
                ))
            } else {
                Ok(mirror_ids(self.ctx.mirror.select_ids(descriptor, env).await?))
            }
        };
        tokio::try_join!(cache, mirror)
    }

    /// Fetch documents for inserts and updates and run them through the
    /// shared decode pool.
    async fn hydrate(
        &self,
        delta: &Delta,
        keys: &HashMap<Id, String>,
        checksums: &ChecksumMap,
        env: &Id,
    ) -> Result<Hydrated, SyncError> {
        let descriptor = &self.descriptor;
        let object_type = descriptor.object_type;
        let fetch = delta.to_fetch();
        let batch_size = self.ctx.config.decode_batch_size.max(1);
        let scan_timeout = self.ctx.config.scan_timeout();
        let updating: HashSet<&Id> = delta.to_update.iter().collect();
        let (reply_tx, mut reply_rx) = mpsc::channel(batch_size);

        let fetch = &fetch;
        let produce = async move {
            for ids in fetch.chunks(batch_size) {
                let wanted: Vec<String> = ids
                    .iter()
                    .map(|id| keys.get(id).cloned().unwrap_or_else(|| id.to_hex()))
                    .collect();
                let mut docs = self
                    .bounded(
                        "hydrate",
                        scan_timeout,
                        self.ctx.cache.mget(descriptor.cache_key_prefix, &wanted),
                    )
                    .await?;

                let mut bytes = 0;
                let items: Vec<DecodeItem> = ids
                    .iter()
                    .zip(&wanted)
                    .filter_map(|(id, key)| {
                        let raw = docs.remove(key)?;
                        bytes += raw.len();
                        Some(DecodeItem {
                            id: id.clone(),
                            raw,
                            checksum: checksums.get(id).cloned().flatten(),
                        })
                    })
                    .collect();
                metrics::record_bytes_read(object_type, bytes);
                if items.len() < ids.len() {
                    debug!(
                        object_type,
                        missing = ids.len() - items.len(),
                        "Documents vanished between scan and fetch"
                    );
                }
                if items.is_empty() {
                    continue;
                }

                let package = DecodePackage {
                    descriptor: Arc::clone(descriptor),
                    environment_id: env.clone(),
                    items,
                    reply: reply_tx.clone(),
                };
                self.ctx
                    .decode_sender()
                    .send(package)
                    .await
                    .map_err(|_| SyncError::Cancelled)?;
            }
            Ok::<_, SyncError>(())
        };

        let consume = async {
            let mut hydrated = Hydrated::default();
            while let Some(decoded) = reply_rx.recv().await {
                match decoded.result {
                    Ok(rows) if updating.contains(&decoded.id) => {
                        hydrated.updated_ids.push(decoded.id);
                        hydrated.update_rows.extend(rows);
                    }
                    Ok(rows) if rows.is_empty() => {
                        debug!(object_type, id = %decoded.id, "Document expands to no rows");
                    }
                    Ok(rows) => {
                        hydrated.inserted_ids.push(decoded.id);
                        hydrated.insert_rows.extend(rows);
                    }
                    Err(e) => {
                        self.drop_row(&e);
                        hydrated.bad_rows += 1;
                    }
                }
            }
            hydrated
        };

        let (produced, mut hydrated) = tokio::join!(produce, consume);
        produced?;

        // Workers finish out of order.
        hydrated.inserted_ids.sort_unstable();
        hydrated.updated_ids.sort_unstable();
        hydrated.insert_rows.sort_by(|a, b| a.id().cmp(b.id()));
        hydrated.update_rows.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(hydrated)
    }

    /// Turn the delta and decoded rows into delete, insert and update tuples.
    ///
    /// Delta-column types have no row-level update: their changed documents
    /// are deleted by key and re-inserted in full.
    fn plan(&self, delta: &Delta, hydrated: &Hydrated) -> (Vec<Tuple>, Vec<Tuple>, Vec<Tuple>) {
        let key = |id: &Id| vec![SqlValue::from(id)];

        let mut deletes: Vec<Tuple> = delta.to_delete.iter().map(key).collect();
        let mut inserts: Vec<Tuple> = hydrated.insert_rows.iter().map(|r| r.insert_tuple()).collect();
        let mut updates = Vec::new();

        if self.descriptor.delta_column.is_some() {
            let mut replaced: Vec<&Id> = hydrated.updated_ids.iter().collect();
            replaced.extend(&delta.to_delete);
            replaced.sort_unstable();
            deletes = replaced.into_iter().map(key).collect();
            inserts.extend(hydrated.update_rows.iter().map(|r| r.insert_tuple()));
        } else {
            updates = hydrated
                .update_rows
                .iter()
                .map(|row| {
                    let mut tuple = row.update_tuple();
                    tuple.push(SqlValue::from(row.id()));
                    tuple
                })
                .collect();
        }
        (deletes, inserts, updates)
    }

    /// Apply a deadline and the cancellation token to one phase.
    async fn bounded<T>(
        &self,
        phase: &'static str,
        limit: Duration,
        fut: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(SyncError::TransientIo(format!(
                    "{} {} deadline of {:?} exceeded",
                    self.descriptor.object_type, phase, limit
                ))),
            },
        }
    }

    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T, SyncError>>) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(SyncError::Cancelled),
            result = fut => result,
        }
    }

    fn drop_row(&self, err: &SyncError) {
        let object_type = self.descriptor.object_type;
        metrics::record_bad_row(object_type, err.kind());
        warn!(object_type, error = %err, "Dropping row for this tick");
    }

    fn set_state(&self, state: ControllerState) {
        self.inner.lock().state = state;
        self.ctx
            .update_stats(self.descriptor.object_type, |stats| stats.state = state.as_str());
    }

    fn succeed(&self, report: &TickReport, elapsed: Duration) {
        let object_type = self.descriptor.object_type;
        {
            let mut inner = self.inner.lock();
            inner.state = ControllerState::Idle;
            inner.backoff.reset();
            inner.retry_at = None;
        }
        self.ctx.update_stats(object_type, |stats| {
            stats.state = ControllerState::Idle.as_str();
            stats.ticks += 1;
            stats.inserted += report.inserted as u64;
            stats.updated += report.updated as u64;
            stats.deleted += report.deleted as u64;
            stats.bad_rows += report.bad_rows as u64;
            stats.conflicts += report.write.conflicts;
            stats.chunks += report.write.chunks;
            stats.retries += report.write.retries;
            stats.consecutive_failures = 0;
            stats.last_duration_ms = elapsed.as_millis() as u64;
        });

        let status = if report.skipped.is_some() { "skipped" } else { "ok" };
        metrics::record_tick(object_type, status);
        if report.changed() > 0 {
            info!(
                object_type,
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                bad_rows = report.bad_rows,
                conflicts = report.write.conflicts,
                chunks = report.write.chunks,
                elapsed_ms = elapsed.as_millis() as u64,
                "Type synced"
            );
        }
    }

    fn fail(&self, err: &SyncError) {
        let object_type = self.descriptor.object_type;
        let delay = {
            let mut inner = self.inner.lock();
            inner.state = ControllerState::Failed;
            let delay = inner.backoff.next_delay();
            inner.retry_at = Some(Instant::now() + delay);
            delay
        };
        self.ctx.update_stats(object_type, |stats| {
            stats.state = ControllerState::Failed.as_str();
            stats.ticks += 1;
            stats.consecutive_failures += 1;
            stats.last_error = Some(err.to_string());
        });
        metrics::record_error(object_type, err.kind());
        metrics::record_tick(object_type, "failed");
        warn!(object_type, error = %err, retry_in = ?delay, "Type sync failed, backing off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorSyncConfig;
    use crate::pipeline::decode::DecodePool;
    use crate::registry::Registry;
    use crate::storage::memory::{MemoryCache, MemoryMirror};

    struct Fixture {
        cache: Arc<MemoryCache>,
        mirror: Arc<MemoryMirror>,
        registry: Registry,
        ctx: Arc<Supervisor>,
        _pool: DecodePool,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let mirror = Arc::new(MemoryMirror::new());
        let cancel = CancellationToken::new();
        let pool = DecodePool::spawn(2, cancel.clone());
        let config = MirrorSyncConfig {
            environment_id: Some("ee".into()),
            ..MirrorSyncConfig::default()
        };
        let ctx = Supervisor::new(cache.clone(), mirror.clone(), Arc::new(config), pool.sender(), cancel).unwrap();
        Fixture {
            cache,
            mirror,
            registry: Registry::builtin().unwrap(),
            ctx: Arc::new(ctx),
            _pool: pool,
        }
    }

    fn controller(f: &Fixture, object_type: &str) -> Controller {
        Controller::new(Arc::clone(f.registry.get(object_type).unwrap()), Arc::clone(&f.ctx))
    }

    #[tokio::test]
    async fn test_tick_inserts_and_opens_gate() {
        let f = fixture();
        f.cache.put("customvar", "aa", r#"{"name":"os","value":"\"linux\""}"#);
        let ctl = controller(&f, "customvar");
        let gates = TickGates::new(["customvar"]);

        let report = ctl.tick(&gates).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(gates.state("customvar"), Some(Gate::Open));
        assert_eq!(ctl.state(), ControllerState::Idle);
        assert_eq!(f.mirror.count("customvar"), 1);
    }

    #[tokio::test]
    async fn test_failure_closes_gate_and_backs_off() {
        let f = fixture();
        f.cache.put("customvar", "aa", r#"{"name":"os","value":"1"}"#);
        f.mirror.fail_next(1, SyncError::FatalIo("access denied".into()));
        let ctl = controller(&f, "customvar").with_backoff(RetryConfig {
            initial_delay: Duration::from_secs(60),
            ..RetryConfig::daemon()
        });
        let gates = TickGates::new(["customvar"]);

        assert!(ctl.tick(&gates).await.unwrap_err().is_fatal());
        assert_eq!(gates.state("customvar"), Some(Gate::Closed));
        assert_eq!(ctl.state(), ControllerState::Failed);
        assert!(ctl.backoff_remaining().is_some());
        assert!(f.ctx.take_fatal().is_some());
        assert_eq!(
            f.ctx.stats("customvar").unwrap().last_error.as_deref(),
            Some("fatal I/O error: access denied")
        );

        let report = ctl.tick(&TickGates::new(["customvar"])).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::BackingOff));
    }

    #[tokio::test]
    async fn test_closed_dependency_defers_writes() {
        let f = fixture();
        f.cache.put("host:customvar", "01", r#"{"host_id":"aa","customvar_id":"bb"}"#);
        let ctl = controller(&f, "host_customvar");
        let gates = TickGates::new(["host", "customvar", "host_customvar"]);
        gates.guard("host").open();
        drop(gates.guard("customvar"));

        let report = ctl.tick(&gates).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Dependency("customvar")));
        assert_eq!(f.mirror.count("host_customvar"), 0);
        assert_eq!(gates.state("host_customvar"), Some(Gate::Closed));
    }

    #[tokio::test]
    async fn test_empty_delta_still_honours_closed_dependency() {
        let f = fixture();
        let ctl = controller(&f, "host_customvar");
        let gates = TickGates::new(["host", "customvar", "host_customvar"]);
        gates.guard("host").open();
        drop(gates.guard("customvar"));

        let report = ctl.tick(&gates).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Dependency("customvar")));
        assert_eq!(gates.state("host_customvar"), Some(Gate::Closed));
    }

    #[tokio::test]
    async fn test_unchanged_cache_writes_nothing() {
        let f = fixture();
        f.cache.put("customvar", "aa", r#"{"name":"os","value":"1"}"#);
        let ctl = controller(&f, "customvar");
        ctl.tick(&TickGates::default()).await.unwrap();
        f.mirror.clear_executed();

        let report = ctl.tick(&TickGates::default()).await.unwrap();
        assert_eq!(report.changed(), 0);
        assert_eq!(report.write.chunks, 0);
        assert!(f.mirror.executed().is_empty());
    }
}
