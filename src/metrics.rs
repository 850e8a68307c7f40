// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for mirror-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `object_type`: descriptor name (host, service, ...)
//! - `op`: insert, update, delete
//! - `phase`: scan, diff, hydrate, write

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// DELTA - what each tick decided to do
// ═══════════════════════════════════════════════════════════════════════════

/// Record the size of one delta set
pub fn record_delta(object_type: &str, op: &str, count: usize) {
    counter!(
        "mirror_sync_delta_rows_total",
        "object_type" => object_type.to_string(),
        "op" => op.to_string()
    )
    .increment(count as u64);
}

/// Record payload bytes hydrated from the cache
pub fn record_bytes_read(object_type: &str, bytes: usize) {
    counter!(
        "mirror_sync_bytes_read_total",
        "object_type" => object_type.to_string()
    )
    .increment(bytes as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITES
// ═══════════════════════════════════════════════════════════════════════════

/// Record a committed chunk and the rows it carried
pub fn record_chunk_written(object_type: &str, op: &str, rows: usize) {
    counter!(
        "mirror_sync_chunks_written_total",
        "object_type" => object_type.to_string(),
        "op" => op.to_string()
    )
    .increment(1);
    counter!(
        "mirror_sync_rows_written_total",
        "object_type" => object_type.to_string(),
        "op" => op.to_string()
    )
    .increment(rows as u64);
}

/// Record a chunk retry after a transient failure
pub fn record_retry(object_type: &str, op: &str) {
    counter!(
        "mirror_sync_retries_total",
        "object_type" => object_type.to_string(),
        "op" => op.to_string()
    )
    .increment(1);
}

/// Record upserts that hit an existing row
pub fn record_conflicts(object_type: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        "mirror_sync_conflicts_total",
        "object_type" => object_type.to_string()
    )
    .increment(count);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING
// ═══════════════════════════════════════════════════════════════════════════

/// Record a row dropped from a tick (decode failure, id mismatch, bad id)
pub fn record_bad_row(object_type: &str, kind: &str) {
    counter!(
        "mirror_sync_bad_rows_total",
        "object_type" => object_type.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a failed tick with its error category
pub fn record_error(object_type: &str, error_type: &str) {
    counter!(
        "mirror_sync_errors_total",
        "object_type" => object_type.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE / HEALTH
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "mirror_sync_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Count engine state transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "mirror_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record the outcome of one controller tick
pub fn record_tick(object_type: &str, status: &str) {
    counter!(
        "mirror_sync_ticks_total",
        "object_type" => object_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record notification events published
pub fn record_notifications(tag: &str, count: usize) {
    counter!(
        "mirror_sync_notifications_total",
        "tag" => tag.to_string()
    )
    .increment(count as u64);
}

/// Record how long a phase took
pub fn record_phase(object_type: &str, phase: &str, duration: Duration) {
    histogram!(
        "mirror_sync_phase_seconds",
        "object_type" => object_type.to_string(),
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records a phase duration on drop
pub struct PhaseTimer {
    object_type: &'static str,
    phase: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn new(object_type: &'static str, phase: &'static str) -> Self {
        Self {
            object_type,
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        record_phase(self.object_type, self.phase, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder installed: these only check the calls don't panic.
    // tests/metrics.rs asserts values with a DebuggingRecorder.

    #[test]
    fn test_write_metrics() {
        record_delta("host", "insert", 10);
        record_chunk_written("host", "insert", 10);
        record_retry("host", "insert");
        record_conflicts("host", 0);
        record_conflicts("host", 2);
    }

    #[test]
    fn test_error_metrics() {
        record_bad_row("service", "checksum_mismatch");
        record_error("service", "transient_io");
        set_backend_healthy("redis", false);
    }

    #[test]
    fn test_phase_timer() {
        {
            let _timer = PhaseTimer::new("zone", "scan");
            std::thread::sleep(Duration::from_micros(10));
        }
        record_phase("zone", "write", Duration::from_millis(3));
    }
}
