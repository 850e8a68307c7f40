// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! mirror-sync - keeps a SQL mirror converged on the Redis config cache.
//!
//! Exit codes: 0 on clean shutdown, 1 on fatal I/O or config errors, 2 if
//! the engine task panicked.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mirror_sync::{MirrorSyncConfig, SyncEngine, SyncError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mirror-sync", version, about = "Sync the Redis configuration cache into the SQL mirror")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: PathBuf,

    /// Run a single sync pass and exit
    #[arg(long)]
    once: bool,

    /// Log level used when RUST_LOG is unset (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code(&e);
        }
    };

    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    setup_logging(&level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config, args.once))
}

fn load_config(path: &Path) -> Result<MirrorSyncConfig, SyncError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("reading {}: {}", path.display(), e)))?;
    let config: MirrorSyncConfig =
        toml::from_str(&raw).map_err(|e| SyncError::Config(format!("parsing {}: {}", path.display(), e)))?;

    if config.redis_url.is_none() {
        return Err(SyncError::Config("redis_url is required".to_string()));
    }
    if config.sql_url.is_none() {
        return Err(SyncError::Config("sql_url is required".to_string()));
    }
    config.validate()?;
    Ok(config)
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run(config: MirrorSyncConfig, once: bool) -> ExitCode {
    let mut engine = match SyncEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return exit_code(&e);
        }
    };

    if let Err(e) = engine.start().await {
        error!(error = %e, "Startup failed");
        engine.shutdown().await;
        return exit_code(&e);
    }

    let engine = Arc::new(engine);

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });

    let worker = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if once {
                sync_once(&engine).await
            } else {
                engine.run().await
            }
        })
    };

    let result = worker.await;
    engine.shutdown().await;

    match result {
        Ok(Ok(())) | Ok(Err(SyncError::Cancelled)) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(error = %e, kind = e.kind(), "Mirror sync stopped");
            exit_code(&e)
        }
        Err(e) => {
            error!(error = %e, "Engine task panicked");
            ExitCode::from(2)
        }
    }
}

async fn sync_once(engine: &SyncEngine) -> Result<(), SyncError> {
    let summary = engine.sync_once().await?;
    for report in &summary.reports {
        info!(
            object_type = report.object_type,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            bad_rows = report.bad_rows,
            skipped = ?report.skipped,
            "Type synced"
        );
    }
    for (object_type, e) in &summary.failures {
        warn!(object_type, error = %e, "Type failed");
    }
    match summary.failures.into_iter().find(|(_, e)| !matches!(e, SyncError::Cancelled)) {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn exit_code(err: &SyncError) -> ExitCode {
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}
