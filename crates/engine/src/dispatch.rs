// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run dispatcher: admission control, enrichment, worker placement.

use crate::error::EngineError;
use crate::pool::WorkerPool;
use crate::prompt::build_layered_prompt;
use crate::publisher::StatusPublisher;
use crate::routes::RouteTable;
use crate::settings::SettingsProvider;
use gf_adapters::{container_labels, provider_env_names, upper_snake};
use gf_adapters::{DispatchRequest, SecretCipher, WorkerRpc};
use gf_core::{
    ApprovalProfile, Clock, FailureClass, Finding, FindingId, MetricsRecorder, Repository, Run,
    RunId, RunState, StatusEvent, Task,
};
use gf_storage::{RunCompletion, Store};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Places runs onto workers, enforcing admission limits and enriching the
/// request with secrets and the layered prompt.
pub struct RunDispatcher<C: Clock> {
    store: Arc<dyn Store>,
    rpc: Arc<dyn WorkerRpc>,
    pool: Arc<WorkerPool<C>>,
    settings: Arc<SettingsProvider<C>>,
    publisher: StatusPublisher,
    routes: Arc<RouteTable>,
    cipher: Arc<dyn SecretCipher>,
    metrics: Arc<dyn MetricsRecorder>,
    clock: C,
}

impl<C: Clock> RunDispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn WorkerRpc>,
        pool: Arc<WorkerPool<C>>,
        settings: Arc<SettingsProvider<C>>,
        publisher: StatusPublisher,
        routes: Arc<RouteTable>,
        cipher: Arc<dyn SecretCipher>,
        metrics: Arc<dyn MetricsRecorder>,
        clock: C,
    ) -> Self {
        Self { store, rpc, pool, settings, publisher, routes, cipher, metrics, clock }
    }

    /// Try to place `run`. `Ok(true)` means the run moved forward (Running
    /// or PendingApproval); `Ok(false)` leaves it Queued for a later pass,
    /// except dispatch rejections which fail it.
    pub async fn dispatch(
        &self,
        repo: &Repository,
        task: &Task,
        run: &Run,
    ) -> Result<bool, EngineError> {
        if task.approval == ApprovalProfile::RequireApproval {
            self.store.mark_pending_approval(&run.id).await?;
            self.publish_status(&run.id, RunState::PendingApproval, None);
            tracing::info!(run = %run.id, task = %task.id, "run awaiting approval");
            return Ok(true);
        }

        if !self.admission_allows(repo, task).await? {
            return Ok(false);
        }

        // Worker placement. No free worker leaves the run Queued like any
        // other admission denial.
        let Some(lease) = self.pool.acquire_for_dispatch().await? else {
            tracing::debug!(run = %run.id, "no dispatchable worker, run stays queued");
            return Ok(false);
        };

        let request = self.compose_request(repo, task, run).await;
        let endpoint = lease.endpoint.clone();

        match self.rpc.dispatch_job(&endpoint, request).await {
            Ok(reply) if reply.accepted => {
                self.store.mark_started(&run.id, self.clock.now_utc()).await?;
                lease.confirm_dispatched().await?;
                self.routes.register(run.id.clone(), endpoint);
                self.publish_status(&run.id, RunState::Running, None);
                self.metrics.incr_counter("dispatch.accepted", 1);
                tracing::info!(run = %run.id, task = %task.id, attempt = run.attempt, "run dispatched");
                Ok(true)
            }
            Ok(reply) => {
                lease.release_unused().await?;
                let reason = reply.reason.unwrap_or_else(|| "worker rejected dispatch".to_string());
                tracing::warn!(run = %run.id, reason = %reason, "dispatch rejected");
                self.fail_run(run, task, &reason, Some(FailureClass::DispatchRejected)).await?;
                self.metrics.incr_counter("dispatch.rejected", 1);
                Ok(false)
            }
            Err(e) => {
                // Transport trouble is transient: the run stays Queued and a
                // later pass retries.
                lease.release_unused().await?;
                tracing::warn!(run = %run.id, error = %e, "dispatch rpc failed, run stays queued");
                Ok(false)
            }
        }
    }

    /// Dispatch the oldest Queued run of a task (created-at, then id order).
    pub async fn dispatch_next_queued_run_for_task(
        &self,
        task_id: &gf_core::TaskId,
    ) -> Result<bool, EngineError> {
        let queued = self.store.list_runs_by_state(RunState::Queued).await?;
        let Some(run) = queued.into_iter().find(|r| &r.task == task_id) else {
            return Ok(false);
        };
        let task = self.store.get_task(task_id).await?;
        let repo = self.store.get_repository(&task.repo).await?;
        self.dispatch(&repo, &task, &run).await
    }

    /// Fire-and-forget cancel. RPC failures are logged and swallowed.
    pub async fn cancel(&self, run: &RunId) {
        if let Err(e) = self.rpc.cancel_job(run).await {
            tracing::warn!(run = %run, error = %e, "cancel rpc failed");
        }
    }

    /// Check the admission limits in documented order: global, project,
    /// repo, task.
    async fn admission_allows(&self, repo: &Repository, task: &Task) -> Result<bool, EngineError> {
        let settings = self.settings.get().await;

        let global = self.store.count_active_runs().await?;
        if global >= settings.max_global_concurrent_runs {
            tracing::debug!(active = global, "global concurrency limit reached");
            return Ok(false);
        }

        if let Some(project) = &repo.project {
            let by_project = self.store.count_active_runs_for_project(project).await?;
            if by_project >= settings.per_project_concurrency_limit {
                tracing::debug!(project = %project, active = by_project, "project limit reached");
                return Ok(false);
            }
        }

        let by_repo = self.store.count_active_runs_for_repo(&repo.id).await?;
        if by_repo >= settings.per_repo_concurrency_limit {
            tracing::debug!(repo = %repo.id, active = by_repo, "repo limit reached");
            return Ok(false);
        }

        if task.concurrency_limit > 0 {
            let by_task = self.store.count_active_runs_for_task(&task.id).await?;
            if by_task >= task.concurrency_limit {
                tracing::debug!(task = %task.id, active = by_task, "task limit reached");
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn compose_request(&self, repo: &Repository, task: &Task, run: &Run) -> DispatchRequest {
        let mut env = BTreeMap::new();

        // Decrypt provider secrets into canonical env names. Failures are
        // logged and skipped; the run dispatches without that secret.
        match self.store.list_secrets_for_repo(&repo.id).await {
            Ok(secrets) => {
                for secret in &secrets {
                    match self.cipher.open(secret) {
                        Ok(value) => {
                            for name in provider_env_names(&secret.provider) {
                                env.insert(name, value.clone());
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                repo = %repo.id,
                                provider = %secret.provider,
                                error = %e,
                                "secret decryption failed, skipping"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(repo = %repo.id, error = %e, "secret listing failed, dispatching without secrets");
            }
        }

        // Harness tuning rides along as HARNESS_* env.
        for (key, value) in &task.harness_settings {
            env.insert(format!("HARNESS_{}", upper_snake(key)), value.clone());
        }

        DispatchRequest {
            run: run.id.clone(),
            task: task.id.clone(),
            repo: repo.id.clone(),
            project: repo.project.clone(),
            harness: task.harness.clone(),
            command: task.command.clone(),
            prompt: build_layered_prompt(repo, task),
            execution_timeout_secs: task.execution_timeout_secs,
            attempt: run.attempt,
            sandbox: task.sandbox.clone(),
            artifacts: task.artifacts.clone(),
            git_url: repo.git_url.clone(),
            artifact_path: format!("/artifacts/{}", run.id),
            labels: container_labels(&run.id, &task.id, &repo.id, repo.project.as_ref()),
            env,
        }
    }

    /// Fail a run with a published status and a finding.
    pub async fn fail_run(
        &self,
        run: &Run,
        task: &Task,
        reason: &str,
        class: Option<FailureClass>,
    ) -> Result<(), EngineError> {
        self.store
            .mark_completed(
                &run.id,
                RunCompletion {
                    succeeded: false,
                    summary: Some(reason.to_string()),
                    output: None,
                    failure_class: class,
                    pr_url: None,
                    ended_at: self.clock.now_utc(),
                },
            )
            .await?;
        self.publish_status(&run.id, RunState::Failed, Some(reason.to_string()));
        self.store
            .create_finding(Finding {
                id: FindingId::fresh(),
                run: run.id.clone(),
                task: task.id.clone(),
                summary: reason.to_string(),
                failure_class: class,
                created_at: self.clock.now_utc(),
            })
            .await?;
        Ok(())
    }

    fn publish_status(&self, run: &RunId, state: RunState, summary: Option<String>) {
        self.publisher.publish(StatusEvent::RunStatus { run: run.clone(), state, summary });
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
