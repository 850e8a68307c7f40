// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared context for every controller.
//!
//! The supervisor owns the handles that all per-type pipelines share: both
//! store clients, the environment id, the decode queue, the notification
//! channel, the fatal error channel, and the per-type stats table.
//!
//! # Environment id
//!
//! Only [`Supervisor::with_env_id`] reads it. The closure runs under the lock
//! and must not do I/O; callers snapshot what they need and release.
//!
//! # Fatal errors
//!
//! The error channel holds one slot: the first fatal error wins and later
//! ones are logged and dropped without blocking.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MirrorSyncConfig;
use crate::error::SyncError;
use crate::id::{encode_id, Id};
use crate::notify::Notification;
use crate::pipeline::decode::DecodePackage;
use crate::storage::traits::{CacheClient, MirrorStore};

/// Capacity of the in-process notification channel.
const NOTIFICATION_CAPACITY: usize = 4096;

/// Per-type counters and the last error, readable in-process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeStats {
    pub state: &'static str,
    pub ticks: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub bad_rows: u64,
    pub conflicts: u64,
    pub chunks: u64,
    pub retries: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_duration_ms: u64,
}

pub struct Supervisor {
    pub cache: Arc<dyn CacheClient>,
    pub mirror: Arc<dyn MirrorStore>,
    pub config: Arc<MirrorSyncConfig>,
    pub cancel: CancellationToken,
    environment_id: Mutex<Id>,
    /// Set when the environment id came from config; never reloaded then
    environment_pinned: bool,
    decode_tx: mpsc::Sender<DecodePackage>,
    notifications: broadcast::Sender<Notification>,
    fatal_tx: mpsc::Sender<SyncError>,
    fatal_rx: Mutex<mpsc::Receiver<SyncError>>,
    stats: DashMap<&'static str, TypeStats>,
}

impl Supervisor {
    /// Build the context. A configured environment id is parsed here.
    pub fn new(
        cache: Arc<dyn CacheClient>,
        mirror: Arc<dyn MirrorStore>,
        config: Arc<MirrorSyncConfig>,
        decode_tx: mpsc::Sender<DecodePackage>,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let (environment_id, environment_pinned) = match config.environment_id.as_deref() {
            Some(hex) => (
                encode_id(hex).map_err(|e| SyncError::Config(format!("environment_id: {}", e)))?,
                true,
            ),
            None => (Id::default(), false),
        };
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Ok(Self {
            cache,
            mirror,
            config,
            cancel,
            environment_id: Mutex::new(environment_id),
            environment_pinned,
            decode_tx,
            notifications,
            fatal_tx,
            fatal_rx: Mutex::new(fatal_rx),
            stats: DashMap::new(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Environment
    // ═══════════════════════════════════════════════════════════════════════

    /// Run `f` with the current environment id.
    pub fn with_env_id<R>(&self, f: impl FnOnce(&Id) -> R) -> R {
        let guard = self.environment_id.lock();
        f(&guard)
    }

    /// Snapshot of the environment id.
    #[must_use]
    pub fn env_id(&self) -> Id {
        self.with_env_id(Id::clone)
    }

    /// Replace the environment id; returns the previous one.
    pub fn swap_env_id(&self, id: Id) -> Id {
        std::mem::replace(&mut *self.environment_id.lock(), id)
    }

    /// Re-read the environment id from the cache (unless pinned by config).
    ///
    /// Returns whether it changed. An absent environment is an error only
    /// while we have none yet.
    pub async fn refresh_environment(&self) -> Result<bool, SyncError> {
        if self.environment_pinned {
            return Ok(false);
        }

        let published = self.cache.environment_id().await?;
        let current = self.env_id();
        let Some(hex) = published else {
            if current.is_empty() {
                return Err(SyncError::FatalIo(
                    "cache publishes no environment id and none is configured".to_string(),
                ));
            }
            warn!(environment_id = %current, "Cache environment id missing, keeping the current one");
            return Ok(false);
        };

        let fresh = encode_id(&hex)?;
        if fresh == current {
            return Ok(false);
        }
        let previous = self.swap_env_id(fresh.clone());
        if previous.is_empty() {
            info!(environment_id = %fresh, "Environment discovered");
        } else {
            info!(previous = %previous, environment_id = %fresh, "Environment changed");
        }
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Channels
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn decode_sender(&self) -> &mpsc::Sender<DecodePackage> {
        &self.decode_tx
    }

    /// Subscribe to per-row change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Broadcast events; returns how many subscribers received them.
    pub fn broadcast(&self, events: &[Notification]) -> usize {
        let mut receivers = 0;
        for event in events {
            // No subscribers is not an error.
            receivers = self.notifications.send(event.clone()).unwrap_or(0);
        }
        receivers
    }

    /// Report a pipeline-stopping error. Never blocks.
    pub fn report_fatal(&self, err: SyncError) {
        error!(error = %err, "Fatal error reported");
        if let Err(e) = self.fatal_tx.try_send(err) {
            debug!(error = %e, "Fatal error channel already holds an error, dropping");
        }
    }

    /// Take the reported fatal error, if any.
    #[must_use]
    pub fn take_fatal(&self) -> Option<SyncError> {
        self.fatal_rx.lock().try_recv().ok()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stats
    // ═══════════════════════════════════════════════════════════════════════

    pub fn update_stats(&self, object_type: &'static str, f: impl FnOnce(&mut TypeStats)) {
        f(&mut self.stats.entry(object_type).or_default());
    }

    #[must_use]
    pub fn stats(&self, object_type: &str) -> Option<TypeStats> {
        self.stats.get(object_type).map(|s| s.clone())
    }

    /// Every type's stats, sorted by type name.
    #[must_use]
    pub fn all_stats(&self) -> Vec<(&'static str, TypeStats)> {
        let mut all: Vec<_> = self.stats.iter().map(|e| (*e.key(), e.value().clone())).collect();
        all.sort_by_key(|(name, _)| *name);
        all
    }
}
