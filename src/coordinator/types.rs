// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

use serde::Serialize;

use crate::error::SyncError;
use crate::pipeline::controller::TickReport;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Connecting to the cache and the mirror
    Connecting,
    /// Checking the mirror schema version
    VerifyingSchema,
    /// Connected and verified; ticks may run
    Ready,
    /// Run loop active
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Shut down
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::VerifyingSchema => write!(f, "VerifyingSchema"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of one pass over every registered type.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Reports for types that completed (including skipped ones)
    pub reports: Vec<TickReport>,
    /// Types whose tick failed, with the error
    pub failures: Vec<(&'static str, SyncError)>,
}

impl SyncSummary {
    /// Every type ran and none failed or skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.reports.iter().all(|r| r.skipped.is_none())
    }

    #[must_use]
    pub fn report(&self, object_type: &str) -> Option<&TickReport> {
        self.reports.iter().find(|r| r.object_type == object_type)
    }

    /// Rows inserted, updated and deleted across all types.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.reports.iter().map(TickReport::changed).sum()
    }

    /// Chunks committed across all types.
    #[must_use]
    pub fn chunks(&self) -> u64 {
        self.reports.iter().map(|r| r.write.chunks).sum()
    }
}

/// Snapshot of engine health for readiness and diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub state: EngineState,
    pub ready: bool,
    pub redis_connected: Option<bool>,
    pub redis_latency_ms: Option<u64>,
    pub sql_connected: Option<bool>,
    pub sql_latency_ms: Option<u64>,
    pub environment_id: Option<String>,
    /// `(object_type, last_error)` for types currently failing
    pub failing_types: Vec<(String, String)>,
    pub healthy: bool,
}
