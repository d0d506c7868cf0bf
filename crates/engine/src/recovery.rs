// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery: restart reconciliation and dead-run detection.
//!
//! Startup forcibly fails whatever claimed to be Running when the previous
//! process died, then a timer applies the stale/zombie/overdue cascades to
//! runs that stopped making progress.

use crate::error::EngineError;
use crate::publisher::StatusPublisher;
use crate::settings::SettingsProvider;
use gf_adapters::WorkerRpc;
use gf_core::{
    Clock, FailureClass, Finding, FindingId, Run, RunState, RuntimeSettings, StatusEvent,
};
use gf_storage::{RunCompletion, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct RecoveryService<C: Clock> {
    store: Arc<dyn Store>,
    rpc: Arc<dyn WorkerRpc>,
    settings: Arc<SettingsProvider<C>>,
    publisher: StatusPublisher,
    clock: C,
}

impl<C: Clock> RecoveryService<C> {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn WorkerRpc>,
        settings: Arc<SettingsProvider<C>>,
        publisher: StatusPublisher,
        clock: C,
    ) -> Self {
        Self { store, rpc, settings, publisher, clock }
    }

    /// Restart reconciliation, in order: orphaned Running runs → Failed with
    /// findings; Running workflow executions → Failed; report pending
    /// approval / queued counts; reap orphan containers.
    pub async fn startup_recovery(&self) -> Result<(), EngineError> {
        let running = self.store.list_runs_by_state(RunState::Running).await?;
        for run in &running {
            tracing::warn!(run = %run.id, "orphaned running run from previous process, failing");
            self.terminate_run(run, FailureClass::OrphanRecovery, "orphaned by restart").await?;
        }
        if !running.is_empty() {
            tracing::info!(count = running.len(), "orphaned runs failed at startup");
        }

        let executions = self.store.list_workflow_executions_by_state("running").await?;
        for exec in &executions {
            tracing::warn!(workflow = %exec.id, "orphaned workflow execution, failing");
            self.store
                .mark_workflow_execution_failed(&exec.id, self.clock.now_utc())
                .await?;
        }

        let pending = self.store.list_runs_by_state(RunState::PendingApproval).await?.len();
        let queued = self.store.list_runs_by_state(RunState::Queued).await?.len();
        tracing::info!(pending_approval = pending, queued, "runs carried across restart");

        let known = self.store.list_all_run_ids().await?;
        match self.rpc.reconcile_orphaned_containers(known).await {
            Ok(outcome) if outcome.removed_count > 0 => {
                tracing::info!(removed = outcome.removed_count, "startup orphan containers removed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "startup container reconcile failed"),
        }
        Ok(())
    }

    /// Dead-run monitor loop. Does nothing when auto-termination is off.
    pub async fn run_monitor(&self, shutdown: CancellationToken) {
        loop {
            let settings = self.settings.get().await;
            if settings.enable_auto_termination {
                if let Err(e) = self.sweep(&settings).await {
                    tracing::warn!(error = %e, "dead-run sweep failed");
                }
            }

            let interval = Duration::from_secs(settings.check_interval_seconds);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One detection pass over Running runs, applying the harshest matching
    /// cascade: overdue and zombie runs get their container force-killed,
    /// stale runs terminate softly.
    pub async fn sweep(&self, settings: &RuntimeSettings) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        let running = self.store.list_runs_by_state(RunState::Running).await?;

        for run in &running {
            let age = now.signed_duration_since(run.last_activity());
            let minutes = age.num_minutes().max(0) as u64;

            if minutes >= settings.max_run_age_hours * 60 {
                tracing::warn!(run = %run.id, minutes, "run overdue, force-terminating");
                self.kill_container(run, "overdue run").await;
                self.terminate_run(run, FailureClass::OverdueRun, "exceeded maximum run age")
                    .await?;
            } else if minutes >= settings.zombie_run_threshold_minutes {
                tracing::warn!(run = %run.id, minutes, "zombie run, force-terminating");
                self.kill_container(run, "zombie run").await;
                self.terminate_run(run, FailureClass::ZombieRun, "no activity past zombie threshold")
                    .await?;
            } else if minutes >= settings.stale_run_threshold_minutes {
                tracing::warn!(run = %run.id, minutes, "stale run, terminating");
                self.terminate_run(run, FailureClass::StaleRun, "no activity past stale threshold")
                    .await?;
            }
        }
        Ok(())
    }

    async fn kill_container(&self, run: &Run, reason: &str) {
        match self.rpc.kill_container(&run.id, reason, true).await {
            Ok(outcome) if !outcome.killed => {
                tracing::warn!(run = %run.id, error = ?outcome.error, "container kill reported failure");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(run = %run.id, error = %e, "container kill rpc failed"),
        }
    }

    /// Fail the run, publish its status, and record a finding.
    async fn terminate_run(
        &self,
        run: &Run,
        class: FailureClass,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.store
            .mark_completed(
                &run.id,
                RunCompletion {
                    succeeded: false,
                    summary: Some(reason.to_string()),
                    output: None,
                    failure_class: Some(class),
                    pr_url: None,
                    ended_at: self.clock.now_utc(),
                },
            )
            .await?;
        self.publisher.publish(StatusEvent::RunStatus {
            run: run.id.clone(),
            state: RunState::Failed,
            summary: Some(reason.to_string()),
        });
        self.store
            .create_finding(Finding {
                id: FindingId::fresh(),
                run: run.id.clone(),
                task: run.task.clone(),
                summary: reason.to_string(),
                failure_class: Some(class),
                created_at: self.clock.now_utc(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
