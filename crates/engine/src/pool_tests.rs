// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_adapters::{FakeProvisioner, FakeWorkerRpc};
use gf_core::{FakeClock, NoopMetrics, SettingsDoc};
use gf_storage::{MemoryStore, StoreError};

struct Rig {
    store: Arc<MemoryStore>,
    provisioner: Arc<FakeProvisioner>,
    rpc: Arc<FakeWorkerRpc>,
    clock: FakeClock,
    pool: Arc<WorkerPool<FakeClock>>,
}

async fn rig_with(doc: SettingsDoc) -> Rig {
    let store = Arc::new(MemoryStore::new());
    store.put_settings(doc).await.unwrap();
    let provisioner = Arc::new(FakeProvisioner::new());
    let rpc = Arc::new(FakeWorkerRpc::new());
    let clock = FakeClock::new();
    let settings = Arc::new(SettingsProvider::new(
        Arc::clone(&store) as Arc<dyn Store>,
        clock.clone(),
    ));
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&provisioner) as Arc<dyn RuntimeProvisioner>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        settings,
        StatusPublisher::new(),
        Arc::new(NoopMetrics),
        clock.clone(),
    ));
    Rig { store, provisioner, rpc, clock, pool }
}

async fn rig() -> Rig {
    rig_with(SettingsDoc { min_workers: Some(2), max_workers: Some(4), ..Default::default() }).await
}

fn heartbeat(worker: &WorkerId, active: u32) -> Heartbeat {
    Heartbeat {
        worker: worker.clone(),
        host_name: "host-a".to_string(),
        active_slots: active,
        max_slots: 1,
        timestamp_ms: 0,
    }
}

async fn ready_worker(rig: &Rig) -> WorkerId {
    rig.pool.ensure_minimum_workers().await.unwrap();
    let workers = rig.store.list_workers().await.unwrap();
    let id = workers[0].id.clone();
    for w in &workers {
        rig.pool.report_heartbeat(heartbeat(&w.id, 0)).await.unwrap();
    }
    id
}

#[tokio::test]
async fn ensure_minimum_launches_up_to_min_plus_reserve() {
    let rig = rig().await;
    let started = rig.pool.ensure_minimum_workers().await.unwrap();
    assert_eq!(started, 2);
    assert_eq!(rig.provisioner.launch_count(), 2);

    let workers = rig.store.list_workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.state == RuntimeState::Starting));
    assert!(workers.iter().all(|w| w.container_id.is_some()));

    // Already at minimum: nothing more starts.
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeat_promotes_starting_to_ready() {
    let rig = rig().await;
    rig.pool.ensure_minimum_workers().await.unwrap();
    let worker = rig.store.list_workers().await.unwrap()[0].id.clone();

    rig.pool.report_heartbeat(heartbeat(&worker, 0)).await.unwrap();
    let stored = rig.store.get_worker(&worker).await.unwrap();
    assert_eq!(stored.state, RuntimeState::Ready);
    assert!(stored.last_heartbeat.is_some());
}

#[tokio::test]
async fn dispatch_lease_reserves_and_releases() {
    let rig = rig().await;
    let worker = ready_worker(&rig).await;

    let lease = rig.pool.acquire_for_dispatch().await.unwrap().unwrap();
    assert_eq!(rig.store.get_worker(&lease.worker).await.unwrap().state, RuntimeState::Busy);

    // Released unused: back to Ready.
    let leased = lease.worker.clone();
    lease.release_unused().await.unwrap();
    assert_eq!(rig.store.get_worker(&leased).await.unwrap().state, RuntimeState::Ready);

    // Confirmed: stays Busy, dispatch activity recorded.
    let lease = rig.pool.acquire_for_dispatch().await.unwrap().unwrap();
    let leased = lease.worker.clone();
    lease.confirm_dispatched().await.unwrap();
    let stored = rig.store.get_worker(&leased).await.unwrap();
    assert_eq!(stored.state, RuntimeState::Busy);
    assert_eq!(stored.dispatch_count, 1);
    let _ = worker;
}

#[tokio::test]
async fn no_lease_when_nothing_dispatchable() {
    let rig = rig().await;
    // Starting workers only, no heartbeats yet.
    rig.pool.ensure_minimum_workers().await.unwrap();
    assert!(rig.pool.acquire_for_dispatch().await.unwrap().is_none());
}

#[tokio::test]
async fn busy_worker_returns_to_ready_when_run_finishes() {
    let rig = rig().await;
    ready_worker(&rig).await;
    let lease = rig.pool.acquire_for_dispatch().await.unwrap().unwrap();
    let worker = lease.worker.clone();
    lease.confirm_dispatched().await.unwrap();

    rig.pool.report_heartbeat(heartbeat(&worker, 1)).await.unwrap();
    assert_eq!(rig.store.get_worker(&worker).await.unwrap().state, RuntimeState::Busy);

    rig.pool.report_heartbeat(heartbeat(&worker, 0)).await.unwrap();
    assert_eq!(rig.store.get_worker(&worker).await.unwrap().state, RuntimeState::Ready);
}

#[tokio::test]
async fn start_attempts_are_rate_limited_per_window() {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(10),
        max_workers: Some(64),
        max_worker_start_attempts_per_10min: Some(3),
        ..Default::default()
    })
    .await;

    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 3);
    // Window still open: no further attempts allowed.
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 0);

    // Window expires: attempts resume.
    rig.clock.advance(Duration::from_secs(601));
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 3);
}

#[tokio::test]
async fn failed_starts_trigger_cooldown() {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(5),
        max_workers: Some(64),
        max_failed_starts_per_10min: Some(2),
        cooldown_minutes: Some(10),
        ..Default::default()
    })
    .await;
    rig.provisioner.fail_launches(true);

    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 0);
    let health = rig.pool.health_snapshot().await.unwrap();
    assert!(health.cooldown_active);

    // Launches fixed, but cooldown still blocks.
    rig.provisioner.fail_launches(false);
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 0);

    // Cooldown elapses.
    rig.clock.advance(Duration::from_secs(601));
    assert!(rig.pool.ensure_minimum_workers().await.unwrap() > 0);
}

#[tokio::test]
async fn scale_out_pause_blocks_starts() {
    let rig = rig().await;
    rig.pool.set_scale_out_paused(true);
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 0);
    rig.pool.set_scale_out_paused(false);
    assert_eq!(rig.pool.ensure_minimum_workers().await.unwrap(), 2);
}

#[tokio::test]
async fn draining_idle_worker_stops_on_next_heartbeat() {
    let rig = rig().await;
    let worker = ready_worker(&rig).await;

    rig.pool.set_draining(&worker, true).await.unwrap();
    assert_eq!(rig.store.get_worker(&worker).await.unwrap().state, RuntimeState::Draining);

    rig.pool.report_heartbeat(heartbeat(&worker, 0)).await.unwrap();
    assert_eq!(rig.store.get_worker(&worker).await.unwrap().state, RuntimeState::Stopped);
    assert_eq!(rig.provisioner.terminate_count(), 1);
}

#[tokio::test]
async fn reconciliation_marks_vanished_containers_stopped() {
    let rig = rig().await;
    let worker = ready_worker(&rig).await;

    // The substrate lost the container.
    rig.provisioner.set_live(Vec::new());
    rig.pool.run_reconciliation().await.unwrap();

    // Marked stopped, then the record pruned on the following pass; the
    // pool also backfills to minimum.
    match rig.store.get_worker(&worker).await {
        Ok(w) => assert_eq!(w.state, RuntimeState::Stopped),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
    let live = rig
        .store
        .list_workers()
        .await
        .unwrap()
        .into_iter()
        .filter(|w| w.state.is_live())
        .count();
    assert_eq!(live, 2);
}

#[tokio::test]
async fn reconciliation_reaps_orphans_with_known_run_ids() {
    let rig = rig().await;
    rig.pool.run_reconciliation().await.unwrap();
    let calls = rig.rpc.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, gf_adapters::RpcCall::Reconcile { .. })));
}

#[tokio::test]
async fn auto_recycle_after_configured_runs() {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(1),
        max_workers: Some(4),
        recycle_after_runs: Some(2),
        ..Default::default()
    })
    .await;
    let worker = ready_worker(&rig).await;
    for _ in 0..2 {
        rig.pool.record_dispatch_activity(&worker).await.unwrap();
    }

    rig.pool.run_reconciliation().await.unwrap();
    // The aged worker was stopped; a replacement keeps the minimum.
    match rig.store.get_worker(&worker).await {
        Ok(w) => assert!(!w.state.is_live()),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
    assert!(rig.provisioner.terminate_count() >= 1);
}

#[tokio::test]
async fn scale_down_stops_idle_workers_above_minimum() {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(1),
        max_workers: Some(8),
        ..Default::default()
    })
    .await;
    // Bring up three workers by temporarily raising the minimum.
    rig.store
        .put_settings(SettingsDoc { min_workers: Some(3), max_workers: Some(8), ..Default::default() })
        .await
        .unwrap();
    rig.pool.ensure_minimum_workers().await.unwrap();
    for w in rig.store.list_workers().await.unwrap() {
        rig.pool.report_heartbeat(heartbeat(&w.id, 0)).await.unwrap();
    }

    // Back to min=1; two idle workers are excess.
    rig.store
        .put_settings(SettingsDoc { min_workers: Some(1), max_workers: Some(8), ..Default::default() })
        .await
        .unwrap();
    rig.clock.advance(Duration::from_secs(11)); // settings cache
    let stopped = rig.pool.scale_down_idle().await.unwrap();
    assert_eq!(stopped, 2);

    let live = rig
        .store
        .list_workers()
        .await
        .unwrap()
        .into_iter()
        .filter(|w| w.state.is_live())
        .count();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn stale_presence_is_pruned_after_ttl() {
    let rig = rig().await;
    let worker = ready_worker(&rig).await;
    let _ = worker;

    let health = rig.pool.health_snapshot().await.unwrap();
    assert_eq!(health.tracked_presence, 2);

    rig.clock.advance(Duration::from_secs(121));
    rig.provisioner.set_live(
        rig.store
            .list_workers()
            .await
            .unwrap()
            .iter()
            .filter_map(|w| w.container_id.clone())
            .collect(),
    );
    rig.pool.run_reconciliation().await.unwrap();

    let health = rig.pool.health_snapshot().await.unwrap();
    assert_eq!(health.tracked_presence, 0);
}

#[tokio::test]
async fn pressure_scaling_adds_a_worker_when_hot() {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(1),
        max_workers: Some(4),
        pressure_scaling_enabled: Some(true),
        pressure_cpu_threshold_percent: Some(70.0),
        ..Default::default()
    })
    .await;
    ready_worker(&rig).await;
    let before = rig.provisioner.launch_count();

    for i in 0..10 {
        rig.pool.record_pressure_sample(PressureSample {
            cpu_percent: 95.0,
            memory_percent: 40.0,
            at_ms: i,
        });
    }
    rig.pool.run_reconciliation().await.unwrap();
    assert_eq!(rig.provisioner.launch_count(), before + 1);
}
