// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store: the test fake, also usable for ephemeral deployments.

use crate::state::Collections;
use crate::store::{RunCompletion, Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gf_core::{
    Automation, AutomationExecution, Finding, Project, ProjectId, RepoId, Repository, Run,
    RunId, RunState, SecretRecord, SettingsDoc, StructuredEvent, Task, TaskId, TaskRuntime,
    WorkerId, WorkflowExecution, WorkflowId,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Store impl holding everything in a mutex-guarded [`Collections`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a closure against the raw collections (test seeding/inspection).
    pub fn with_state<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        f(&mut self.state.lock())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.state.lock().projects.get(id).cloned().ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.state.lock().projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_repository(&self, id: &RepoId) -> Result<Repository, StoreError> {
        self.state.lock().repositories.get(id).cloned().ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_repository(&self, repo: Repository) -> Result<(), StoreError> {
        self.state.lock().repositories.insert(repo.id.clone(), repo);
        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        Ok(self.state.lock().repositories.values().cloned().collect())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.state.lock().get_task(id)
    }

    async fn upsert_task(&self, task: Task) -> Result<(), StoreError> {
        self.state.lock().tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.lock().tasks.values().cloned().collect())
    }

    async fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.lock().list_due_tasks(now, max))
    }

    async fn create_run(&self, run: Run) -> Result<(), StoreError> {
        self.state.lock().create_run(run)
    }

    async fn get_run(&self, id: &RunId) -> Result<Run, StoreError> {
        self.state.lock().get_run(id)
    }

    async fn mark_pending_approval(&self, id: &RunId) -> Result<(), StoreError> {
        self.state.lock().mark_pending_approval(id)
    }

    async fn mark_started(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.lock().mark_started(id, at)
    }

    async fn mark_completed(&self, id: &RunId, outcome: RunCompletion) -> Result<(), StoreError> {
        self.state.lock().mark_completed(id, outcome)
    }

    async fn mark_cancelled(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.lock().mark_cancelled(id, at)
    }

    async fn count_active_runs(&self) -> Result<u32, StoreError> {
        Ok(self.state.lock().count_active_runs())
    }

    async fn count_active_runs_for_project(&self, id: &ProjectId) -> Result<u32, StoreError> {
        Ok(self.state.lock().count_active_runs_for_project(id))
    }

    async fn count_active_runs_for_repo(&self, id: &RepoId) -> Result<u32, StoreError> {
        Ok(self.state.lock().count_active_runs_for_repo(id))
    }

    async fn count_active_runs_for_task(&self, id: &TaskId) -> Result<u32, StoreError> {
        Ok(self.state.lock().count_active_runs_for_task(id))
    }

    async fn list_runs_by_state(&self, state: RunState) -> Result<Vec<Run>, StoreError> {
        Ok(self.state.lock().list_runs_by_state(state))
    }

    async fn list_all_run_ids(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.state.lock().runs.keys().cloned().collect())
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<TaskRuntime, StoreError> {
        self.state.lock().workers.get(id).cloned().ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_worker(&self, worker: TaskRuntime) -> Result<(), StoreError> {
        self.state.lock().workers.insert(worker.id.clone(), worker);
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<TaskRuntime>, StoreError> {
        Ok(self.state.lock().workers.values().cloned().collect())
    }

    async fn delete_worker(&self, id: &WorkerId) -> Result<(), StoreError> {
        self.state.lock().workers.remove(id);
        Ok(())
    }

    async fn create_finding(&self, finding: Finding) -> Result<(), StoreError> {
        self.state.lock().findings.push(finding);
        Ok(())
    }

    async fn list_findings(&self) -> Result<Vec<Finding>, StoreError> {
        Ok(self.state.lock().findings.clone())
    }

    async fn upsert_automation(&self, automation: Automation) -> Result<(), StoreError> {
        self.state.lock().automations.insert(automation.id.clone(), automation);
        Ok(())
    }

    async fn list_due_automations(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Automation>, StoreError> {
        Ok(self.state.lock().list_due_automations(now, max))
    }

    async fn record_automation_execution(
        &self,
        execution: AutomationExecution,
    ) -> Result<(), StoreError> {
        self.state.lock().automation_executions.push(execution);
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        Ok(self.state.lock().try_acquire_lease(name, owner, ttl_ms, now_ms))
    }

    async fn release_lease(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        self.state.lock().release_lease(name, owner);
        Ok(())
    }

    async fn get_settings(&self) -> Result<SettingsDoc, StoreError> {
        Ok(self.state.lock().settings.clone())
    }

    async fn put_settings(&self, doc: SettingsDoc) -> Result<(), StoreError> {
        self.state.lock().settings = doc;
        Ok(())
    }

    async fn upsert_secret(&self, secret: SecretRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .secrets
            .iter_mut()
            .find(|s| s.repo == secret.repo && s.provider == secret.provider)
        {
            *existing = secret;
        } else {
            state.secrets.push(secret);
        }
        Ok(())
    }

    async fn list_secrets_for_repo(&self, repo: &RepoId) -> Result<Vec<SecretRecord>, StoreError> {
        Ok(self.state.lock().secrets.iter().filter(|s| &s.repo == repo).cloned().collect())
    }

    async fn append_structured_event(&self, event: StructuredEvent) -> Result<bool, StoreError> {
        Ok(self.state.lock().append_structured_event(event))
    }

    async fn next_event_sequence(&self, run: &RunId) -> Result<u64, StoreError> {
        Ok(self.state.lock().next_event_sequence(run))
    }

    async fn list_structured_events(
        &self,
        run: &RunId,
        max: usize,
    ) -> Result<Vec<StructuredEvent>, StoreError> {
        Ok(self.state.lock().list_structured_events(run, max))
    }

    async fn upsert_workflow_execution(&self, exec: WorkflowExecution) -> Result<(), StoreError> {
        self.state.lock().workflow_executions.insert(exec.id.clone(), exec);
        Ok(())
    }

    async fn list_workflow_executions_by_state(
        &self,
        state: &str,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        Ok(self
            .state
            .lock()
            .workflow_executions
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect())
    }

    async fn mark_workflow_execution_failed(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state.lock().mark_workflow_execution_failed(id, at)
    }

    async fn save_artifact(
        &self,
        run: &RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.state.lock().save_artifact(run, name, bytes);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
