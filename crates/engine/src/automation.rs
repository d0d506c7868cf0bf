// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Automation scheduler: time-driven execution of user-defined automations.
//!
//! Same tick shape as the cron scheduler, but each firing targets an
//! existing task, stamps the run with the automation id, and records an
//! execution-history row.

use crate::dispatch::RunDispatcher;
use crate::error::EngineError;
use crate::lease::LeaseCoordinator;
use crate::settings::SettingsProvider;
use chrono::Duration as ChronoDuration;
use gf_core::{next_fire_after, Automation, AutomationExecution, Clock, Run};
use gf_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct AutomationScheduler<C: Clock> {
    store: Arc<dyn Store>,
    dispatcher: Arc<RunDispatcher<C>>,
    settings: Arc<SettingsProvider<C>>,
    clock: C,
    leader: Option<(Arc<LeaseCoordinator<C>>, String)>,
}

impl<C: Clock> AutomationScheduler<C> {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<RunDispatcher<C>>,
        settings: Arc<SettingsProvider<C>>,
        clock: C,
    ) -> Self {
        Self { store, dispatcher, settings, clock, leader: None }
    }

    /// Guard each tick with a named lease so only one replica fires
    /// automations.
    pub fn with_leader_lease(
        mut self,
        coordinator: Arc<LeaseCoordinator<C>>,
        name: impl Into<String>,
    ) -> Self {
        self.leader = Some((coordinator, name.into()));
        self
    }

    /// Tick until `shutdown` trips. Shares the scheduler interval (and its
    /// 2-second floor) with the cron scheduler.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut intended = self.clock.now();
        loop {
            let interval =
                Duration::from_secs(self.settings.get().await.scheduler_interval_seconds);

            let tick_result = match &self.leader {
                None => self.tick().await,
                Some((coordinator, name)) => {
                    match coordinator.try_acquire(name, interval * 2).await {
                        Ok(Some(_guard)) => self.tick().await,
                        Ok(None) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
            };
            if let Err(e) = tick_result {
                tracing::warn!(error = %e, "automation tick failed");
            }

            intended += interval;
            let sleep_for = intended.saturating_duration_since(self.clock.now());
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// One pass over due automations.
    pub async fn tick(&self) -> Result<(), EngineError> {
        let settings = self.settings.get().await;
        let max = settings.max_global_concurrent_runs;

        let active = self.store.count_active_runs().await?;
        if active >= max {
            return Ok(());
        }

        let now = self.clock.now_utc();
        let due = self.store.list_due_automations(now, (max - active) as usize).await?;
        for automation in due {
            if let Err(e) = self.fire(&automation).await {
                tracing::warn!(automation = %automation.id, error = %e, "automation firing failed");
            }
        }
        Ok(())
    }

    async fn fire(&self, automation: &Automation) -> Result<(), EngineError> {
        let task = match self.store.get_task(&automation.target_task).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(automation = %automation.id, task = %automation.target_task,
                    error = %e, "automation target task missing, skipping");
                self.advance(automation, None).await?;
                return Ok(());
            }
        };
        let repo = match self.store.get_repository(&task.repo).await {
            Ok(repo) => repo,
            Err(e) => {
                tracing::warn!(automation = %automation.id, repo = %task.repo, error = %e,
                    "automation target repository missing, skipping");
                self.advance(automation, None).await?;
                return Ok(());
            }
        };

        let now = self.clock.now_utc();
        let mut run = Run::new(task.id.clone(), repo.id.clone(), 1, now);
        run.automation_run = Some(automation.id.clone());
        self.store.create_run(run.clone()).await?;

        self.dispatcher.dispatch(&repo, &task, &run).await?;

        self.store
            .record_automation_execution(AutomationExecution {
                automation: automation.id.clone(),
                run: run.id.clone(),
                fired_at: now,
            })
            .await?;
        tracing::info!(automation = %automation.id, run = %run.id, "automation fired");

        self.advance(automation, Some(now)).await
    }

    async fn advance(
        &self,
        automation: &Automation,
        fired_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), EngineError> {
        let mut updated = automation.clone();
        if fired_at.is_some() {
            updated.last_fired_at = fired_at;
        }
        let after = self.clock.now_utc() + ChronoDuration::seconds(1);
        updated.next_run_at = next_fire_after(&automation.cron_expression, after);
        if updated.next_run_at.is_none() {
            tracing::warn!(automation = %automation.id, expr = %automation.cron_expression,
                "automation expression yields no next firing, disabling");
            updated.enabled = false;
        }
        self.store.upsert_automation(updated).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "automation_tests.rs"]
mod tests;
