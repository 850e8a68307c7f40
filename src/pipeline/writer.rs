// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk writer: tuples → chunked, retried, bounded-parallel statements.
//!
//! # Chunking
//!
//! A chunk carries at most `min(bulk_size, max_placeholders / params_per_row)`
//! tuples. Chunks are submitted in order; up to `concurrency` run at once.
//!
//! # Failure handling
//!
//! | Error | Action |
//! |-------|--------|
//! | Transient (deadlock, lock wait, reset, deadline) | Retry the chunk with jittered backoff |
//! | Anything else | Stop submitting, drain in-flight chunks, return the error |
//! | Cancellation | Stop submitting; the running chunk's transaction is dropped |

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::MirrorSyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::registry::statement::BulkStatement;
use crate::registry::TypeDescriptor;
use crate::resilience::retry::{retry_transient, RetryConfig};
use crate::storage::traits::{BulkOutcome, MirrorStore, SqlValue, Tuple};

/// Which prebuilt statement a batch of tuples goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Delete,
    Insert,
    Update,
}

impl WriteOp {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOp::Delete => "delete",
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
        }
    }

    fn statement(self, descriptor: &TypeDescriptor) -> &BulkStatement {
        match self {
            WriteOp::Delete => &descriptor.bulk_delete_stmt,
            WriteOp::Insert => &descriptor.bulk_insert_stmt,
            WriteOp::Update => &descriptor.bulk_update_stmt,
        }
    }

    /// The key value of a tuple (update tuples carry it last).
    fn key_of(self, tuple: &Tuple) -> Option<&SqlValue> {
        match self {
            WriteOp::Update => tuple.last(),
            WriteOp::Delete | WriteOp::Insert => tuple.first(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub bulk_size: usize,
    pub max_placeholders: usize,
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub chunk_timeout: Duration,
}

impl WriterConfig {
    #[must_use]
    pub fn from_config(config: &MirrorSyncConfig) -> Self {
        Self {
            bulk_size: config.bulk_size,
            max_placeholders: config.max_placeholders,
            concurrency: config.write_concurrency,
            retry: RetryConfig::chunk_write(config.retry_attempts),
            chunk_timeout: config.chunk_write_timeout(),
        }
    }
}

/// Totals for one `write` call (or a whole tick, via [`WriteReport::merge`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub rows: u64,
    pub chunks: u64,
    pub retries: u64,
    pub conflicts: u64,
}

impl WriteReport {
    pub fn merge(&mut self, other: WriteReport) {
        self.rows += other.rows;
        self.chunks += other.chunks;
        self.retries += other.retries;
        self.conflicts += other.conflicts;
    }
}

struct ChunkResult {
    rows: usize,
    outcome: BulkOutcome,
    retries: u64,
}

#[derive(Clone)]
pub struct BulkWriter {
    mirror: Arc<dyn MirrorStore>,
    config: Arc<WriterConfig>,
    cancel: CancellationToken,
}

impl BulkWriter {
    #[must_use]
    pub fn new(mirror: Arc<dyn MirrorStore>, config: WriterConfig, cancel: CancellationToken) -> Self {
        Self {
            mirror,
            config: Arc::new(config),
            cancel,
        }
    }

    /// Write every tuple for one operation; returns once all chunks settled.
    #[tracing::instrument(skip(self, descriptor, tuples), fields(object_type = descriptor.object_type, op = op.as_str(), rows = tuples.len()))]
    pub async fn write(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        op: WriteOp,
        tuples: Vec<Tuple>,
    ) -> Result<WriteReport, SyncError> {
        let mut report = WriteReport::default();
        if tuples.is_empty() {
            return Ok(report);
        }

        let max_rows = op
            .statement(descriptor)
            .max_rows(self.config.bulk_size, self.config.max_placeholders);
        let concurrency = self.config.concurrency.max(1);
        let mut pending = tuples.into_iter().peekable();
        let mut in_flight = JoinSet::new();
        let mut first_error: Option<SyncError> = None;
        let mut index = 0usize;

        loop {
            while in_flight.len() < concurrency
                && first_error.is_none()
                && !self.cancel.is_cancelled()
                && pending.peek().is_some()
            {
                let chunk: Vec<Tuple> = pending.by_ref().take(max_rows).collect();
                index += 1;
                in_flight.spawn(write_chunk(
                    Arc::clone(&self.mirror),
                    Arc::clone(descriptor),
                    op,
                    chunk,
                    index,
                    Arc::clone(&self.config),
                    self.cancel.clone(),
                ));
            }

            match in_flight.join_next().await {
                None => break,
                Some(Ok(Ok(chunk))) => {
                    report.rows += chunk.rows as u64;
                    report.chunks += 1;
                    report.retries += chunk.retries;
                    report.conflicts += chunk.outcome.conflicts;
                }
                Some(Ok(Err(e))) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Some(Err(join_error)) => {
                    if join_error.is_panic() {
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                    first_error.get_or_insert(SyncError::Cancelled);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if self.cancel.is_cancelled() && pending.peek().is_some() {
            return Err(SyncError::Cancelled);
        }

        metrics::record_conflicts(descriptor.object_type, report.conflicts);
        Ok(report)
    }
}

fn hex_key(value: Option<&SqlValue>) -> String {
    value
        .and_then(SqlValue::as_bytes)
        .map(hex::encode)
        .unwrap_or_default()
}

async fn write_chunk(
    mirror: Arc<dyn MirrorStore>,
    descriptor: Arc<TypeDescriptor>,
    op: WriteOp,
    chunk: Vec<Tuple>,
    index: usize,
    config: Arc<WriterConfig>,
    cancel: CancellationToken,
) -> Result<ChunkResult, SyncError> {
    let object_type = descriptor.object_type;
    let first_id = hex_key(chunk.first().and_then(|t| op.key_of(t)));
    let last_id = hex_key(chunk.last().and_then(|t| op.key_of(t)));
    let statement = op.statement(&descriptor);
    let mirror = &*mirror;
    let rows = &chunk;
    let cancel_ref = &cancel;
    let deadline = config.chunk_timeout;
    let mut retries = 0u64;

    let result = retry_transient(
        object_type,
        &config.retry,
        &cancel,
        |err| {
            retries += 1;
            metrics::record_retry(object_type, op.as_str());
            warn!(
                object_type,
                op = op.as_str(),
                chunk = index,
                first_id = %first_id,
                last_id = %last_id,
                error = %err,
                "Chunk write failed, retrying"
            );
        },
        move || async move {
            tokio::select! {
                biased;
                _ = cancel_ref.cancelled() => Err(SyncError::Cancelled),
                result = tokio::time::timeout(deadline, mirror.execute_bulk(statement, rows)) => match result {
                    Ok(outcome) => outcome,
                    Err(elapsed) => Err(elapsed.into()),
                },
            }
        },
    )
    .await;

    match result {
        Ok(outcome) => {
            metrics::record_chunk_written(object_type, op.as_str(), chunk.len());
            debug!(
                object_type,
                op = op.as_str(),
                chunk = index,
                rows = chunk.len(),
                first_id = %first_id,
                last_id = %last_id,
                "Chunk committed"
            );
            Ok(ChunkResult {
                rows: chunk.len(),
                outcome,
                retries,
            })
        }
        Err(SyncError::Cancelled) => {
            debug!(object_type, op = op.as_str(), chunk = index, "Chunk abandoned on cancellation");
            Err(SyncError::Cancelled)
        }
        Err(e) => {
            metrics::record_error(object_type, e.kind());
            error!(
                object_type,
                op = op.as_str(),
                chunk = index,
                first_id = %first_id,
                last_id = %last_id,
                error = %e,
                "Chunk write failed"
            );
            Err(e)
        }
    }
}
