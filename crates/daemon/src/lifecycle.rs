// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: wiring, loop supervision, shutdown ordering.
//!
//! Everything is built here as plain values with collaborators passed in,
//! then handed to long-lived tokio tasks that all share one shutdown token.
//! Startup order matters: lock file, store, recovery, bootstrap work, then
//! the loops.

use crate::config::Config;
use fs2::FileExt;
use gf_adapters::{GatewayFleet, PassthroughCipher, RuntimeProvisioner, SecretCipher, WorkerRpc};
use gf_core::{Clock, MetricsRecorder, NoopMetrics, SystemClock};
use gf_engine::{
    AutomationScheduler, BackgroundCoordinator, CronScheduler, LeaseCoordinator,
    RecoveryService, RouteTable, RunDispatcher, RunViewProjector, SettingsProvider,
    StatusPublisher, WorkRelay, WorkerEventListener, WorkerPool,
};
use gf_storage::{JsonStore, Store, StoreError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for loops to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another gfd instance holds {0}")]
    AlreadyRunning(std::path::PathBuf),
    #[error("state directory: {0}")]
    StateDir(#[from] std::io::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("fatal background work: {0}")]
    FatalWork(String),
}

/// Run the daemon to completion (ctrl-c or fatal error).
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(config.logs_dir())?;

    // Single-instance lock. Open without truncating so a losing race does
    // not wipe the winner's pid.
    let lock_path = config.lock_path();
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning(lock_path.clone()))?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let store: Arc<dyn Store> = Arc::new(JsonStore::open(config.store_path())?);
    let clock = SystemClock;

    // The gateway client serves both kernel seams.
    let fleet = GatewayFleet::connect(&config.gateway_url);
    let rpc: Arc<dyn WorkerRpc> = fleet.clone();
    let provisioner: Arc<dyn RuntimeProvisioner> = fleet.clone();
    let cipher: Arc<dyn SecretCipher> = Arc::new(PassthroughCipher);
    let metrics: Arc<dyn MetricsRecorder> = Arc::new(NoopMetrics);

    // Kernel components, wired explicitly.
    let publisher = StatusPublisher::new();
    let settings = Arc::new(SettingsProvider::new(Arc::clone(&store), clock.clone()));
    let routes = Arc::new(RouteTable::new());
    let projector = Arc::new(RunViewProjector::new(Arc::clone(&store)));
    let leases = Arc::new(LeaseCoordinator::new(Arc::clone(&store), clock.clone()));
    let coordinator = Arc::new(BackgroundCoordinator::new(clock.clone()));
    let relay = Arc::new(WorkRelay::new(publisher.clone(), clock.clone()));
    {
        let relay = Arc::clone(&relay);
        coordinator.on_update(move |snapshot| relay.observe(snapshot));
    }

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&provisioner),
        Arc::clone(&rpc),
        Arc::clone(&settings),
        publisher.clone(),
        Arc::clone(&metrics),
        clock.clone(),
    ));
    let dispatcher = Arc::new(RunDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&rpc),
        Arc::clone(&pool),
        Arc::clone(&settings),
        publisher.clone(),
        Arc::clone(&routes),
        cipher,
        Arc::clone(&metrics),
        clock.clone(),
    ));
    let scheduler = CronScheduler::new(
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        Arc::clone(&settings),
        clock.clone(),
    )
    .with_leader_lease(Arc::clone(&leases), "scheduler-tick");
    let automations = AutomationScheduler::new(
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        Arc::clone(&settings),
        clock.clone(),
    )
    .with_leader_lease(Arc::clone(&leases), "automation-tick");
    let listener = WorkerEventListener::new(
        Arc::clone(&store),
        Arc::clone(&rpc),
        Arc::clone(&dispatcher),
        Arc::clone(&projector),
        publisher.clone(),
        Arc::clone(&routes),
        clock.clone(),
    );
    let recovery = RecoveryService::new(
        Arc::clone(&store),
        Arc::clone(&rpc),
        Arc::clone(&settings),
        publisher.clone(),
        clock.clone(),
    );

    // Restart reconciliation runs before anything can schedule new work.
    recovery.startup_recovery().await.map_err(|e| match e {
        gf_engine::EngineError::Store(e) => LifecycleError::Store(e),
        other => LifecycleError::FatalWork(other.to_string()),
    })?;

    let shutdown = CancellationToken::new();
    let fatal = coordinator.fatal_token();
    let mut tasks = tokio::task::JoinSet::new();

    // Background worker first so bootstrap work can run.
    {
        let coordinator = Arc::clone(&coordinator);
        let token = shutdown.clone();
        tasks.spawn(async move { coordinator.run_worker(token).await });
    }

    // Image bootstrap is critical: a failure trips the fatal token below.
    let image = settings
        .get()
        .await
        .image_registry
        .unwrap_or_else(|| "agent-runtime:latest".to_string());
    pool.ensure_image_available(&coordinator, &image, true);

    {
        let scheduler = scheduler;
        let token = shutdown.clone();
        tasks.spawn(async move { scheduler.run(token).await });
    }
    {
        let automations = automations;
        let token = shutdown.clone();
        tasks.spawn(async move { automations.run(token).await });
    }
    {
        let listener = listener;
        let token = shutdown.clone();
        tasks.spawn(async move { listener.run(token).await });
    }
    {
        let recovery = recovery;
        let token = shutdown.clone();
        tasks.spawn(async move { recovery.run_monitor(token).await });
    }
    {
        let pool = Arc::clone(&pool);
        let settings = Arc::clone(&settings);
        let leases = Arc::clone(&leases);
        let token = shutdown.clone();
        tasks.spawn(async move { pool_maintenance(pool, settings, leases, token).await });
    }
    {
        let pool = Arc::clone(&pool);
        let mut heartbeats = fleet.subscribe_heartbeats();
        let token = shutdown.clone();
        tasks.spawn(async move {
            loop {
                let hb = tokio::select! {
                    _ = token.cancelled() => return,
                    hb = heartbeats.recv() => match hb {
                        Some(hb) => hb,
                        None => return,
                    },
                };
                if let Err(e) = pool.report_heartbeat(hb).await {
                    tracing::warn!(error = %e, "heartbeat ingest failed");
                }
            }
        });
    }

    tracing::info!(
        state_dir = %config.state_dir.display(),
        gateway = %config.gateway_url,
        "gfd started"
    );

    // Run until ctrl-c or a critical background failure.
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
        _ = fatal.cancelled() => {
            let reason = coordinator
                .fatal_reason()
                .unwrap_or_else(|| "critical background work failed".to_string());
            Err(LifecycleError::FatalWork(reason))
        }
    };

    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("shutdown grace elapsed with loops still running");
        tasks.abort_all();
    }

    let _ = fs2::FileExt::unlock(&lock_file);
    tracing::info!("gfd stopped");
    outcome
}

/// Periodic pool upkeep: reconciliation and idle scale-down, leader-guarded
/// so only one replica reshapes the pool.
async fn pool_maintenance<C: Clock>(
    pool: Arc<WorkerPool<C>>,
    settings: Arc<SettingsProvider<C>>,
    leases: Arc<LeaseCoordinator<C>>,
    shutdown: CancellationToken,
) {
    loop {
        let interval =
            Duration::from_secs(settings.get().await.health_probe_interval_seconds);

        match leases.try_acquire("pool-reconcile", interval * 2).await {
            Ok(Some(_guard)) => {
                if let Err(e) = pool.run_reconciliation().await {
                    tracing::warn!(error = %e, "pool reconciliation failed");
                }
                if let Err(e) = pool.scale_down_idle().await {
                    tracing::warn!(error = %e, "idle scale-down failed");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "pool lease acquire failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
