// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron & due-task scheduler.
//!
//! A periodic tick admits due tasks into runs and hands them to the
//! dispatcher, then flushes the heads of per-task queues while global
//! capacity remains. Tick scheduling is drift-compensated: each tick is
//! computed from the previous intended tick, not wall clock at loop end.

use crate::dispatch::RunDispatcher;
use crate::error::EngineError;
use crate::lease::LeaseCoordinator;
use crate::settings::SettingsProvider;
use chrono::Duration as ChronoDuration;
use gf_core::{next_fire_after, Clock, Run, RunState, Task, TaskKind};
use gf_storage::Store;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct CronScheduler<C: Clock> {
    store: Arc<dyn Store>,
    dispatcher: Arc<RunDispatcher<C>>,
    settings: Arc<SettingsProvider<C>>,
    clock: C,
    leader: Option<(Arc<LeaseCoordinator<C>>, String)>,
}

impl<C: Clock> CronScheduler<C> {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<RunDispatcher<C>>,
        settings: Arc<SettingsProvider<C>>,
        clock: C,
    ) -> Self {
        Self { store, dispatcher, settings, clock, leader: None }
    }

    /// Guard each tick with a named lease so only one replica schedules.
    pub fn with_leader_lease(
        mut self,
        coordinator: Arc<LeaseCoordinator<C>>,
        name: impl Into<String>,
    ) -> Self {
        self.leader = Some((coordinator, name.into()));
        self
    }

    /// Tick until `shutdown` trips.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut intended = self.clock.now();
        loop {
            let interval =
                Duration::from_secs(self.settings.get().await.scheduler_interval_seconds);

            if let Err(e) = self.guarded_tick(interval).await {
                tracing::warn!(error = %e, "scheduler tick failed");
            }

            intended += interval;
            let sleep_for = intended.saturating_duration_since(self.clock.now());
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn guarded_tick(&self, interval: Duration) -> Result<(), EngineError> {
        match &self.leader {
            None => self.tick().await,
            Some((coordinator, name)) => {
                // Held for the tick only; the TTL covers a replica dying
                // mid-tick without blocking the others for long.
                match coordinator.try_acquire(name, interval * 2).await? {
                    Some(_guard) => self.tick().await,
                    None => {
                        tracing::debug!(lease = %name, "another replica is scheduling");
                        Ok(())
                    }
                }
            }
        }
    }

    /// One scheduling pass.
    pub async fn tick(&self) -> Result<(), EngineError> {
        let settings = self.settings.get().await;
        let max = settings.max_global_concurrent_runs;

        let active = self.store.count_active_runs().await?;
        if active >= max {
            tracing::debug!(active, max, "at global capacity, skipping tick");
            return Ok(());
        }

        let now = self.clock.now_utc();
        let due = self.store.list_due_tasks(now, (max - active) as usize).await?;
        for task in due {
            if let Err(e) = self.admit_due_task(&task).await {
                tracing::warn!(task = %task.id, error = %e, "due-task admission failed");
            }
        }

        self.flush_queued_heads(max).await
    }

    async fn admit_due_task(&self, task: &Task) -> Result<(), EngineError> {
        let repo = match self.store.get_repository(&task.repo).await {
            Ok(repo) => repo,
            Err(e) => {
                tracing::warn!(task = %task.id, repo = %task.repo, error = %e,
                    "task repository missing, skipping");
                return Ok(());
            }
        };

        let now = self.clock.now_utc();
        let run = Run::new(task.id.clone(), repo.id.clone(), 1, now);
        self.store.create_run(run.clone()).await?;
        tracing::info!(task = %task.id, run = %run.id, "due task admitted");

        self.dispatcher.dispatch(&repo, task, &run).await?;
        self.advance_schedule(task).await
    }

    /// Consume one-shots; move cron tasks to their next firing.
    async fn advance_schedule(&self, task: &Task) -> Result<(), EngineError> {
        let mut updated = task.clone();
        match task.kind {
            TaskKind::Cron => {
                let after = self.clock.now_utc() + ChronoDuration::seconds(1);
                updated.next_run_at = match task.cron_expression.as_deref() {
                    Some(expr) => {
                        let next = next_fire_after(expr, after);
                        if next.is_none() {
                            tracing::warn!(task = %task.id, expr = ?task.cron_expression,
                                "cron expression yields no next firing, unscheduling");
                        }
                        next
                    }
                    None => {
                        tracing::warn!(task = %task.id, "enabled cron task without expression");
                        None
                    }
                };
            }
            TaskKind::OneShot => {
                updated.enabled = false;
                updated.next_run_at = None;
            }
            // A manual task should not have been due; clear the stray
            // deadline rather than re-admit it every tick.
            TaskKind::Manual => updated.next_run_at = None,
        }
        self.store.upsert_task(updated).await?;
        Ok(())
    }

    /// Dispatch the oldest Queued run per distinct task, in created-at
    /// order, until the global cap is reached again.
    async fn flush_queued_heads(&self, max: u32) -> Result<(), EngineError> {
        let queued = self.store.list_runs_by_state(RunState::Queued).await?;
        let mut seen = HashSet::new();
        for run in queued {
            if !seen.insert(run.task.clone()) {
                continue;
            }
            if self.store.count_active_runs().await? >= max {
                break;
            }
            if let Err(e) = self.dispatcher.dispatch_next_queued_run_for_task(&run.task).await {
                tracing::warn!(task = %run.task, error = %e, "queued-head dispatch failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
