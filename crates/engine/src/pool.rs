// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker (task-runtime) lifecycle management.
//!
//! Keeps the pool sized between the configured min/max, hands out dispatch
//! leases, mirrors heartbeats, and reconciles the store's view of workers
//! against the containers actually alive on the substrate.
//!
//! Scale-out is rate-limited on a 10-minute sliding window and suspended
//! for a cooldown period after repeated failed starts.

use crate::background::{BackgroundCoordinator, WorkError};
use crate::error::EngineError;
use crate::publisher::StatusPublisher;
use crate::settings::SettingsProvider;
use gf_adapters::{RuntimeProvisioner, WorkerRpc};
use gf_core::{
    Clock, Heartbeat, MetricsRecorder, PressureSample, RuntimeSettings, RuntimeState, StatusEvent,
    TaskRuntime, WorkKind, WorkerId,
};
use gf_storage::Store;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Heartbeats older than this fall out of in-memory presence.
const HEARTBEAT_TTL: Duration = Duration::from_secs(120);
/// Sliding window for start-attempt and failed-start rate limiting.
const START_WINDOW: Duration = Duration::from_secs(600);
/// Pressure samples kept for scaling decisions.
const PRESSURE_WINDOW: usize = 30;

/// Aggregate pool health for status surfaces.
#[derive(Debug, Clone, Default)]
pub struct PoolHealth {
    pub by_state: HashMap<RuntimeState, u32>,
    pub live: u32,
    pub dispatchable: u32,
    pub tracked_presence: u32,
    pub cooldown_active: bool,
    pub scale_out_paused: bool,
}

struct Presence {
    last_heartbeat: Instant,
    active: u32,
}

struct PoolState {
    presence: HashMap<WorkerId, Presence>,
    start_attempts: VecDeque<Instant>,
    failed_starts: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    scale_out_paused: bool,
    pressure: VecDeque<PressureSample>,
    resolved_images: HashMap<String, String>,
    launch_counter: u64,
}

/// Pool of remote execution runtimes.
pub struct WorkerPool<C: Clock> {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn RuntimeProvisioner>,
    rpc: Arc<dyn WorkerRpc>,
    settings: Arc<SettingsProvider<C>>,
    publisher: StatusPublisher,
    metrics: Arc<dyn MetricsRecorder>,
    clock: C,
    inner: Arc<Mutex<PoolState>>,
}

impl<C: Clock> WorkerPool<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn RuntimeProvisioner>,
        rpc: Arc<dyn WorkerRpc>,
        settings: Arc<SettingsProvider<C>>,
        publisher: StatusPublisher,
        metrics: Arc<dyn MetricsRecorder>,
        clock: C,
    ) -> Self {
        Self {
            store,
            provisioner,
            rpc,
            settings,
            publisher,
            metrics,
            clock,
            inner: Arc::new(Mutex::new(PoolState {
                presence: HashMap::new(),
                start_attempts: VecDeque::new(),
                failed_starts: VecDeque::new(),
                cooldown_until: None,
                scale_out_paused: false,
                pressure: VecDeque::new(),
                resolved_images: HashMap::new(),
                launch_counter: 0,
            })),
        }
    }

    /// Resolve the worker image as deduped background work. Critical at
    /// bootstrap: failure there is fatal to the daemon.
    pub fn ensure_image_available(
        &self,
        coordinator: &BackgroundCoordinator,
        image: &str,
        critical: bool,
    ) -> gf_core::WorkId {
        let provisioner = Arc::clone(&self.provisioner);
        let inner = Arc::clone(&self.inner);
        let image_owned = image.to_string();
        coordinator.enqueue(
            WorkKind::TaskRuntimeImageResolution,
            format!("image:{image}"),
            move |_token, progress| async move {
                progress.report(Some(10), format!("resolving {image_owned}"));
                let digest = provisioner
                    .resolve_image(&image_owned)
                    .await
                    .map_err(|e| WorkError::with_code("image_resolution", e.to_string()))?;
                inner.lock().resolved_images.insert(image_owned.clone(), digest);
                progress.report(Some(100), format!("resolved {image_owned}"));
                Ok(())
            },
            true,
            critical,
        )
    }

    /// Start workers until the live count reaches the configured minimum.
    /// Returns how many starts were initiated.
    pub async fn ensure_minimum_workers(&self) -> Result<u32, EngineError> {
        let settings = self.settings.get().await;
        let workers = self.store.list_workers().await?;
        let live = workers.iter().filter(|w| w.state.is_live()).count() as u32;
        let target = settings.min_workers + settings.reserve_workers;
        if live >= target {
            return Ok(0);
        }
        let headroom = settings.max_workers.saturating_sub(live);
        let wanted = (target - live).min(headroom);

        let mut started = 0;
        for _ in 0..wanted {
            if !self.try_record_start_attempt(&settings) {
                break;
            }
            match self.start_worker(&settings).await {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "worker start failed");
                }
            }
        }
        self.metrics.set_gauge("pool.live_workers", (live + started) as f64);
        Ok(started)
    }

    /// Whether scale-out may proceed, recording the attempt when it may.
    fn try_record_start_attempt(&self, settings: &RuntimeSettings) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.scale_out_paused {
            return false;
        }
        if let Some(until) = inner.cooldown_until {
            if now < until {
                return false;
            }
            inner.cooldown_until = None;
        }
        while inner
            .start_attempts
            .front()
            .is_some_and(|t| now.duration_since(*t) > START_WINDOW)
        {
            inner.start_attempts.pop_front();
        }
        if inner.start_attempts.len() as u32 >= settings.max_worker_start_attempts_per_10min {
            tracing::warn!("worker start rate limit reached, deferring scale-out");
            return false;
        }
        inner.start_attempts.push_back(now);
        true
    }

    /// Pick the canary image for the configured percentage of launches.
    fn pick_image(&self, settings: &RuntimeSettings) -> String {
        let base = settings
            .image_registry
            .clone()
            .unwrap_or_else(|| "agent-runtime:latest".to_string());
        let Some(canary) = settings.canary_image.clone() else { return base };
        if settings.canary_percent == 0 {
            return base;
        }
        let counter = {
            let mut inner = self.inner.lock();
            inner.launch_counter += 1;
            inner.launch_counter
        };
        if (counter % 100) < settings.canary_percent as u64 {
            canary
        } else {
            base
        }
    }

    async fn start_worker(&self, settings: &RuntimeSettings) -> Result<WorkerId, EngineError> {
        let image = self.pick_image(settings);
        let id = WorkerId::fresh();
        let mut runtime = TaskRuntime::new(id.clone(), image.clone());
        runtime.started_at = Some(self.clock.now_utc());
        runtime.image_digest = self.inner.lock().resolved_images.get(&image).cloned();
        self.store.upsert_worker(runtime.clone()).await?;
        self.publish_state(&id, RuntimeState::Provisioning);

        match self.provisioner.launch(&id, &image).await {
            Ok(launched) => {
                runtime.container_id = Some(launched.container_id);
                runtime.grpc_endpoint = Some(launched.grpc_endpoint);
                runtime.state = RuntimeState::Starting;
                self.store.upsert_worker(runtime).await?;
                self.publish_state(&id, RuntimeState::Starting);
                self.metrics.incr_counter("pool.worker_starts", 1);
                tracing::info!(worker = %id, image = %image, "worker container launched");
                Ok(id)
            }
            Err(e) => {
                runtime.state = RuntimeState::FailedStart;
                self.store.upsert_worker(runtime).await?;
                self.publish_state(&id, RuntimeState::FailedStart);
                self.record_failed_start(settings);
                self.metrics.incr_counter("pool.failed_starts", 1);
                Err(e.into())
            }
        }
    }

    fn record_failed_start(&self, settings: &RuntimeSettings) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        while inner
            .failed_starts
            .front()
            .is_some_and(|t| now.duration_since(*t) > START_WINDOW)
        {
            inner.failed_starts.pop_front();
        }
        inner.failed_starts.push_back(now);
        if inner.failed_starts.len() as u32 >= settings.max_failed_starts_per_10min {
            let cooldown = Duration::from_secs(settings.cooldown_minutes * 60);
            inner.cooldown_until = Some(now + cooldown);
            tracing::warn!(
                cooldown_minutes = settings.cooldown_minutes,
                "too many failed starts, entering scale-out cooldown"
            );
        }
    }

    /// Reserve a Ready worker for one dispatch, moving it to Busy.
    pub async fn acquire_for_dispatch(
        &self,
    ) -> Result<Option<DispatchLease<'_, C>>, EngineError> {
        let workers = self.store.list_workers().await?;
        let mut candidates: Vec<&TaskRuntime> =
            workers.iter().filter(|w| w.is_dispatchable()).collect();
        // Spread load toward the least-used runtime.
        candidates.sort_by_key(|w| (w.dispatch_count, w.id.clone()));

        let Some(chosen) = candidates.first() else { return Ok(None) };
        let Some(endpoint) = chosen.grpc_endpoint.clone() else {
            tracing::warn!(worker = %chosen.id, "ready worker has no endpoint, skipping");
            return Ok(None);
        };

        let mut updated = (*chosen).clone();
        updated.state = RuntimeState::Busy;
        updated.active_slots = 1;
        self.store.upsert_worker(updated).await?;
        self.publish_state(&chosen.id, RuntimeState::Busy);

        Ok(Some(DispatchLease {
            pool: self,
            worker: chosen.id.clone(),
            endpoint,
            settled: false,
        }))
    }

    /// Record one placed run on the worker.
    pub async fn record_dispatch_activity(&self, id: &WorkerId) -> Result<(), EngineError> {
        let mut worker = self.store.get_worker(id).await?;
        worker.dispatch_count += 1;
        self.store.upsert_worker(worker).await?;
        Ok(())
    }

    /// Return an unused Busy reservation to Ready.
    async fn return_to_ready(&self, id: &WorkerId) -> Result<(), EngineError> {
        let mut worker = self.store.get_worker(id).await?;
        if worker.state == RuntimeState::Busy {
            worker.state = if worker.draining { RuntimeState::Draining } else { RuntimeState::Ready };
            worker.active_slots = 0;
            let state = worker.state;
            self.store.upsert_worker(worker).await?;
            self.publish_state(id, state);
        }
        Ok(())
    }

    /// Ingest a heartbeat: refresh presence, mirror slots, advance
    /// Starting → Ready, Busy → Ready when the run finished, and finish
    /// draining workers that went idle.
    pub async fn report_heartbeat(&self, hb: Heartbeat) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock();
            inner.presence.insert(
                hb.worker.clone(),
                Presence { last_heartbeat: self.clock.now(), active: hb.active_slots },
            );
        }

        let mut worker = match self.store.get_worker(&hb.worker).await {
            Ok(w) => w,
            Err(_) => {
                tracing::debug!(worker = %hb.worker, "heartbeat from unknown worker");
                return Ok(());
            }
        };

        worker.active_slots = hb.active_slots;
        worker.max_slots = hb.max_slots.max(1);
        worker.last_heartbeat = Some(self.clock.now_utc());

        let mut next_state = None;
        match worker.state {
            RuntimeState::Starting => next_state = Some(RuntimeState::Ready),
            RuntimeState::Busy if hb.active_slots == 0 => next_state = Some(RuntimeState::Ready),
            _ => {}
        }
        if let Some(next) = next_state {
            if worker.state.can_transition_to(next) {
                worker.state = next;
            }
        }

        let drained = worker.draining
            && hb.active_slots == 0
            && matches!(worker.state, RuntimeState::Ready | RuntimeState::Draining);
        let state = worker.state;
        let changed = next_state == Some(state);
        self.store.upsert_worker(worker).await?;
        if changed {
            self.publish_state(&hb.worker, state);
        }
        if drained {
            self.stop_worker(&hb.worker).await?;
        }
        Ok(())
    }

    /// Feed one CPU/memory observation into the pressure window.
    pub fn record_pressure_sample(&self, sample: PressureSample) {
        let mut inner = self.inner.lock();
        inner.pressure.push_back(sample);
        while inner.pressure.len() > PRESSURE_WINDOW {
            inner.pressure.pop_front();
        }
    }

    /// Flag a worker to stop accepting runs. Idle workers stop right away;
    /// busy ones finish their run first.
    pub async fn set_draining(&self, id: &WorkerId, draining: bool) -> Result<(), EngineError> {
        let mut worker = self.store.get_worker(id).await?;
        worker.draining = draining;
        if draining && worker.state == RuntimeState::Ready {
            worker.state = RuntimeState::Draining;
        }
        if !draining && worker.state == RuntimeState::Draining {
            worker.state = RuntimeState::Ready;
        }
        let state = worker.state;
        self.store.upsert_worker(worker).await?;
        self.publish_state(id, state);
        Ok(())
    }

    /// Stop idle Ready workers above the configured minimum.
    pub async fn scale_down_idle(&self) -> Result<u32, EngineError> {
        let settings = self.settings.get().await;
        let workers = self.store.list_workers().await?;
        let live = workers.iter().filter(|w| w.state.is_live()).count() as u32;
        let floor = settings.min_workers + settings.reserve_workers;
        if live <= floor {
            return Ok(0);
        }
        let mut excess = live - floor;

        let mut idle: Vec<&TaskRuntime> = workers
            .iter()
            .filter(|w| w.state == RuntimeState::Ready && w.active_slots == 0 && !w.draining)
            .collect();
        // Retire the most-used first so long-lived runtimes cycle out.
        idle.sort_by_key(|w| std::cmp::Reverse(w.dispatch_count));

        let mut stopped = 0;
        for worker in idle {
            if excess == 0 {
                break;
            }
            self.stop_worker(&worker.id).await?;
            excess -= 1;
            stopped += 1;
        }
        Ok(stopped)
    }

    /// Recycle one worker: stop it (after draining if busy) and let
    /// reconciliation backfill the pool.
    pub async fn recycle_worker(&self, id: &WorkerId) -> Result<(), EngineError> {
        let worker = self.store.get_worker(id).await?;
        if worker.state == RuntimeState::Busy {
            self.set_draining(id, true).await?;
        } else {
            self.stop_worker(id).await?;
        }
        Ok(())
    }

    /// Recycle every live worker in the pool.
    pub async fn recycle_pool(&self) -> Result<(), EngineError> {
        let workers = self.store.list_workers().await?;
        for worker in workers.iter().filter(|w| w.state.is_live()) {
            self.recycle_worker(&worker.id).await?;
        }
        Ok(())
    }

    async fn stop_worker(&self, id: &WorkerId) -> Result<(), EngineError> {
        let mut worker = self.store.get_worker(id).await?;
        if worker.state.is_terminal() {
            return Ok(());
        }
        if worker.state.can_transition_to(RuntimeState::Stopping) {
            worker.state = RuntimeState::Stopping;
            self.store.upsert_worker(worker.clone()).await?;
            self.publish_state(id, RuntimeState::Stopping);
        }
        if let Some(container_id) = worker.container_id.clone() {
            if let Err(e) = self.provisioner.terminate(&container_id).await {
                tracing::warn!(worker = %id, error = %e, "container terminate failed");
            }
        }
        worker.state = RuntimeState::Stopped;
        worker.active_slots = 0;
        self.store.upsert_worker(worker).await?;
        self.publish_state(id, RuntimeState::Stopped);
        self.inner.lock().presence.remove(id);
        Ok(())
    }

    /// Pause or resume scale-out entirely.
    pub fn set_scale_out_paused(&self, paused: bool) {
        self.inner.lock().scale_out_paused = paused;
    }

    /// Verify the store's worker set against live containers, expire stale
    /// presence, auto-recycle aged runtimes, reap orphan containers, and
    /// top the pool back up.
    pub async fn run_reconciliation(&self) -> Result<(), EngineError> {
        self.prune_stale_presence();

        let settings = self.settings.get().await;
        let live_containers = self.provisioner.list_live().await?;
        let workers = self.store.list_workers().await?;

        for worker in &workers {
            if !worker.state.is_live() {
                // Terminal records have served their purpose.
                if worker.state == RuntimeState::Stopped {
                    self.store.delete_worker(&worker.id).await?;
                }
                continue;
            }

            // A live record whose container vanished is gone, whatever the
            // state machine thought.
            if let Some(container_id) = &worker.container_id {
                if !live_containers.contains(container_id) {
                    tracing::warn!(worker = %worker.id, container = %container_id,
                        "container missing, marking worker stopped");
                    let mut gone = worker.clone();
                    gone.state = RuntimeState::Stopped;
                    gone.active_slots = 0;
                    self.store.upsert_worker(gone).await?;
                    self.publish_state(&worker.id, RuntimeState::Stopped);
                    self.inner.lock().presence.remove(&worker.id);
                    continue;
                }
            }

            if self.due_for_recycle(worker, &settings) {
                tracing::info!(worker = %worker.id, "auto-recycling worker");
                self.recycle_worker(&worker.id).await?;
            }
        }

        // Orphans: containers labeled with run ids this control plane does
        // not know about.
        let active_runs = self.store.list_all_run_ids().await?;
        match self.rpc.reconcile_orphaned_containers(active_runs).await {
            Ok(outcome) if outcome.removed_count > 0 => {
                tracing::info!(removed = outcome.removed_count, "reaped orphan containers");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "orphan container reconcile failed"),
        }

        if settings.pressure_scaling_enabled && self.under_pressure(&settings) {
            if self.try_record_start_attempt(&settings) {
                if let Err(e) = self.start_worker(&settings).await {
                    tracing::warn!(error = %e, "pressure scale-out failed");
                }
            }
        }

        self.ensure_minimum_workers().await?;
        Ok(())
    }

    fn due_for_recycle(&self, worker: &TaskRuntime, settings: &RuntimeSettings) -> bool {
        if settings.recycle_after_runs > 0 && worker.dispatch_count >= settings.recycle_after_runs {
            return true;
        }
        if settings.recycle_after_uptime_minutes > 0 {
            if let Some(started) = worker.started_at {
                let age = self.clock.now_utc().signed_duration_since(started);
                if age.num_minutes() >= settings.recycle_after_uptime_minutes as i64 {
                    return true;
                }
            }
        }
        false
    }

    fn under_pressure(&self, settings: &RuntimeSettings) -> bool {
        let inner = self.inner.lock();
        if inner.pressure.is_empty() {
            return false;
        }
        let n = inner.pressure.len() as f64;
        let (cpu, mem) = inner
            .pressure
            .iter()
            .fold((0.0, 0.0), |(c, m), s| (c + s.cpu_percent, m + s.memory_percent));
        cpu / n > settings.pressure_cpu_threshold_percent
            || mem / n > settings.pressure_memory_threshold_percent
    }

    fn prune_stale_presence(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner
            .presence
            .retain(|_, p| now.duration_since(p.last_heartbeat) <= HEARTBEAT_TTL);
    }

    /// Aggregate health for status surfaces.
    pub async fn health_snapshot(&self) -> Result<PoolHealth, EngineError> {
        let workers = self.store.list_workers().await?;
        let mut health = PoolHealth::default();
        for worker in &workers {
            *health.by_state.entry(worker.state).or_default() += 1;
            if worker.state.is_live() {
                health.live += 1;
            }
            if worker.is_dispatchable() {
                health.dispatchable += 1;
            }
        }
        let inner = self.inner.lock();
        health.tracked_presence = inner.presence.len() as u32;
        health.cooldown_active = inner
            .cooldown_until
            .is_some_and(|until| self.clock.now() < until);
        health.scale_out_paused = inner.scale_out_paused;
        Ok(health)
    }

    fn publish_state(&self, worker: &WorkerId, state: RuntimeState) {
        self.publisher.publish(StatusEvent::WorkerState { worker: worker.clone(), state });
    }
}

/// Reservation of one Ready worker for one dispatch.
///
/// `confirm_dispatched` keeps the worker Busy for the accepted run;
/// `release_unused` puts an unused reservation back. A leaked reservation
/// self-heals on the worker's next idle heartbeat (Busy + 0 active slots
/// goes back to Ready).
pub struct DispatchLease<'a, C: Clock> {
    pool: &'a WorkerPool<C>,
    pub worker: WorkerId,
    pub endpoint: String,
    settled: bool,
}

impl<C: Clock> DispatchLease<'_, C> {
    /// The dispatch was accepted: the worker stays Busy and its dispatch
    /// count advances.
    pub async fn confirm_dispatched(mut self) -> Result<(), EngineError> {
        self.settled = true;
        self.pool.record_dispatch_activity(&self.worker).await
    }

    /// The dispatch did not happen: hand the worker back.
    pub async fn release_unused(mut self) -> Result<(), EngineError> {
        self.settled = true;
        self.pool.return_to_ready(&self.worker).await
    }
}

impl<C: Clock> Drop for DispatchLease<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(worker = %self.worker, "dispatch lease dropped unsettled");
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
