// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: start, sync pass, run loop, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::pipeline::controller::{Controller, TickGates};
use crate::pipeline::decode::DecodePool;
use crate::schema;
use crate::storage::redis::RedisCache;
use crate::storage::sql::SqlMirror;
use crate::storage::traits::{CacheClient, MirrorStore};
use crate::supervisor::Supervisor;

use super::{EngineState, SyncEngine, SyncSummary};

impl SyncEngine {
    fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }

    /// Start the engine.
    ///
    /// Startup flow:
    /// 1. Connect to the mirror and the cache (unless stores were injected)
    /// 2. Verify the mirror schema version
    /// 3. Spawn the decode pool and build the supervisor
    /// 4. Resolve the environment id (config, else the cache)
    /// 5. Build one controller per registered type
    #[tracing::instrument(skip(self), fields(object_types = self.registry.len()))]
    pub async fn start(&mut self) -> Result<(), SyncError> {
        let startup_start = Instant::now();
        info!("Starting mirror sync engine...");
        self.set_state(EngineState::Connecting);

        let (cache, mirror) = self.connect().await?;

        self.set_state(EngineState::VerifyingSchema);
        if let Err(e) = schema::verify(mirror.as_ref()).await {
            error!(error = %e, "Mirror schema check failed");
            crate::metrics::record_error("engine", e.kind());
            return Err(e);
        }

        let pool = DecodePool::spawn(self.config.decode_workers, self.cancel.clone());
        let decode_tx = pool.sender();
        *self.decode_pool.lock() = Some(pool);

        let supervisor = Arc::new(Supervisor::new(
            cache,
            mirror,
            Arc::clone(&self.config),
            decode_tx,
            self.cancel.clone(),
        )?);

        if let Err(e) = supervisor.refresh_environment().await {
            error!(error = %e, "Could not resolve the environment id");
            return Err(e);
        }

        self.controllers = self
            .registry
            .sync_order()
            .map(|descriptor| Arc::new(Controller::new(Arc::clone(descriptor), Arc::clone(&supervisor))))
            .collect();
        self.supervisor = Some(supervisor);

        self.set_state(EngineState::Ready);
        info!(
            controllers = self.controllers.len(),
            startup_ms = startup_start.elapsed().as_millis() as u64,
            "Mirror sync engine ready"
        );
        Ok(())
    }

    async fn connect(&mut self) -> Result<(Arc<dyn CacheClient>, Arc<dyn MirrorStore>), SyncError> {
        let mirror: Arc<dyn MirrorStore> = match self.mirror {
            Some(ref mirror) => Arc::clone(mirror),
            None => {
                let url = self
                    .config
                    .sql_url
                    .as_deref()
                    .ok_or_else(|| SyncError::Config("sql_url is required".to_string()))?;
                info!("Connecting to SQL mirror...");
                match SqlMirror::connect(url, self.config.sql_max_connections).await {
                    Ok(store) => {
                        crate::metrics::set_backend_healthy("sql", true);
                        info!(dialect = ?store.dialect(), "SQL mirror connected");
                        Arc::new(store)
                    }
                    Err(e) => {
                        crate::metrics::set_backend_healthy("sql", false);
                        error!(error = %e, "Failed to connect to SQL mirror");
                        return Err(e);
                    }
                }
            }
        };
        self.mirror = Some(Arc::clone(&mirror));

        let cache: Arc<dyn CacheClient> = match self.cache {
            Some(ref cache) => Arc::clone(cache),
            None => {
                let url = self
                    .config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| SyncError::Config("redis_url is required".to_string()))?;
                info!(prefix = %self.config.redis_prefix, "Connecting to Redis cache...");
                match RedisCache::connect(url, &self.config.redis_prefix, self.config.redis_max_connections).await {
                    Ok(cache) => {
                        crate::metrics::set_backend_healthy("redis", true);
                        info!("Redis cache connected");
                        Arc::new(cache.with_stream_maxlen(self.config.notification_stream_maxlen))
                    }
                    Err(e) => {
                        crate::metrics::set_backend_healthy("redis", false);
                        error!(error = %e, "Failed to connect to Redis cache");
                        return Err(e);
                    }
                }
            }
        };
        self.cache = Some(Arc::clone(&cache));

        Ok((cache, mirror))
    }

    /// Run one tick of every controller.
    ///
    /// Controllers run concurrently; dependents wait on their dependencies'
    /// gates before writing. Per-type failures land in the summary. A fatal
    /// error reported by any controller is returned instead.
    #[tracing::instrument(skip(self))]
    pub async fn sync_once(&self) -> Result<SyncSummary, SyncError> {
        let supervisor = self.supervisor()?;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match supervisor.refresh_environment().await {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Environment refresh failed, keeping the current id");
            }
            Err(e) => return Err(e),
        }

        let gates = Arc::new(TickGates::new(self.registry.sync_order().map(|d| d.object_type)));
        let mut tasks = JoinSet::new();
        for controller in &self.controllers {
            let controller = Arc::clone(controller);
            let gates = Arc::clone(&gates);
            tasks.spawn(async move {
                let object_type = controller.descriptor().object_type;
                (object_type, controller.tick(&gates).await)
            });
        }

        let mut summary = SyncSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => summary.reports.push(report),
                Ok((object_type, Err(e))) => summary.failures.push((object_type, e)),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => warn!(error = %e, "Controller task aborted"),
            }
        }
        summary.reports.sort_by_key(|report| self.sync_position(report.object_type));
        summary.failures.sort_by_key(|(object_type, _)| self.sync_position(object_type));

        if let Some(fatal) = supervisor.take_fatal() {
            return Err(fatal);
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(
            changed = summary.changed(),
            chunks = summary.chunks(),
            failures = summary.failures.len(),
            "Sync pass complete"
        );
        Ok(summary)
    }

    fn sync_position(&self, object_type: &str) -> usize {
        self.registry
            .sync_order()
            .position(|d| d.object_type == object_type)
            .unwrap_or(usize::MAX)
    }

    /// Run sync passes every `sync_interval_secs` until cancelled.
    ///
    /// Returns `Ok` on cancellation and the error on a fatal failure.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<(), SyncError> {
        self.supervisor()?;
        self.set_state(EngineState::Running);
        info!(interval_secs = self.config.sync_interval_secs, "Mirror sync engine running");

        let mut interval = tokio::time::interval(self.config.sync_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Run loop cancelled");
                    return Ok(());
                }

                _ = interval.tick() => {
                    match self.sync_once().await {
                        Ok(summary) => {
                            for (object_type, e) in &summary.failures {
                                debug!(object_type, error = %e, "Type failed this pass");
                            }
                        }
                        Err(SyncError::Cancelled) => return Ok(()),
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Fatal error, stopping run loop");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, "Sync pass failed, retrying next interval");
                        }
                    }
                }
            }
        }
    }

    /// Initiate graceful shutdown.
    ///
    /// Cancels every task (open chunk transactions roll back), then waits
    /// for the decode workers.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating mirror sync engine shutdown...");
        self.set_state(EngineState::ShuttingDown);

        self.cancel.cancel();

        let pool = self.decode_pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }

        self.set_state(EngineState::Stopped);
        info!(
            shutdown_ms = shutdown_start.elapsed().as_millis() as u64,
            "Mirror sync engine shutdown complete"
        );
    }
}
