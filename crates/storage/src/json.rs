// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot-persisted store.
//!
//! Holds the same [`Collections`] core as the in-memory store and writes a
//! snapshot after every mutation. Control-plane write rates are low enough
//! that write-through keeps the recovery story simple: the snapshot on disk
//! is always the latest committed state.

use crate::snapshot::{load_snapshot, save_snapshot, SnapshotError};
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
use std::path::PathBuf;
use std::sync::Arc;

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Io(io) => StoreError::Io(io),
            SnapshotError::Json(json) => StoreError::Encoding(json),
            SnapshotError::Version(v) => StoreError::Conflict(format!("snapshot version {v}")),
        }
    }
}

/// Store impl persisting every mutation to a zstd snapshot file.
#[derive(Clone)]
pub struct JsonStore {
    state: Arc<Mutex<Collections>>,
    path: Arc<PathBuf>,
}

impl JsonStore {
    /// Open the store at `path`, loading the existing snapshot if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match load_snapshot(&path)? {
            Some(state) => {
                tracing::info!(
                    path = %path.display(),
                    runs = state.runs.len(),
                    tasks = state.tasks.len(),
                    workers = state.workers.len(),
                    "loaded store snapshot"
                );
                state
            }
            None => {
                tracing::info!(path = %path.display(), "no snapshot, starting empty");
                Collections::default()
            }
        };
        Ok(Self { state: Arc::new(Mutex::new(state)), path: Arc::new(path) })
    }

    fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> R {
        f(&self.state.lock())
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Collections) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        let out = f(&mut state)?;
        save_snapshot(&self.path, &state)?;
        Ok(out)
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.read(|s| s.projects.get(id).cloned()).ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.projects.insert(project.id.clone(), project);
            Ok(())
        })
    }

    async fn get_repository(&self, id: &RepoId) -> Result<Repository, StoreError> {
        self.read(|s| s.repositories.get(id).cloned()).ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_repository(&self, repo: Repository) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.repositories.insert(repo.id.clone(), repo);
            Ok(())
        })
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        Ok(self.read(|s| s.repositories.values().cloned().collect()))
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.read(|s| s.get_task(id))
    }

    async fn upsert_task(&self, task: Task) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.tasks.insert(task.id.clone(), task);
            Ok(())
        })
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.read(|s| s.tasks.values().cloned().collect()))
    }

    async fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self.read(|s| s.list_due_tasks(now, max)))
    }

    async fn create_run(&self, run: Run) -> Result<(), StoreError> {
        self.mutate(|s| s.create_run(run))
    }

    async fn get_run(&self, id: &RunId) -> Result<Run, StoreError> {
        self.read(|s| s.get_run(id))
    }

    async fn mark_pending_approval(&self, id: &RunId) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_pending_approval(id))
    }

    async fn mark_started(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_started(id, at))
    }

    async fn mark_completed(&self, id: &RunId, outcome: RunCompletion) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_completed(id, outcome))
    }

    async fn mark_cancelled(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_cancelled(id, at))
    }

    async fn count_active_runs(&self) -> Result<u32, StoreError> {
        Ok(self.read(|s| s.count_active_runs()))
    }

    async fn count_active_runs_for_project(&self, id: &ProjectId) -> Result<u32, StoreError> {
        Ok(self.read(|s| s.count_active_runs_for_project(id)))
    }

    async fn count_active_runs_for_repo(&self, id: &RepoId) -> Result<u32, StoreError> {
        Ok(self.read(|s| s.count_active_runs_for_repo(id)))
    }

    async fn count_active_runs_for_task(&self, id: &TaskId) -> Result<u32, StoreError> {
        Ok(self.read(|s| s.count_active_runs_for_task(id)))
    }

    async fn list_runs_by_state(&self, state: RunState) -> Result<Vec<Run>, StoreError> {
        Ok(self.read(|s| s.list_runs_by_state(state)))
    }

    async fn list_all_run_ids(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.read(|s| s.runs.keys().cloned().collect()))
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<TaskRuntime, StoreError> {
        self.read(|s| s.workers.get(id).cloned()).ok_or_else(|| StoreError::not_found(id))
    }

    async fn upsert_worker(&self, worker: TaskRuntime) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.workers.insert(worker.id.clone(), worker);
            Ok(())
        })
    }

    async fn list_workers(&self) -> Result<Vec<TaskRuntime>, StoreError> {
        Ok(self.read(|s| s.workers.values().cloned().collect()))
    }

    async fn delete_worker(&self, id: &WorkerId) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.workers.remove(id);
            Ok(())
        })
    }

    async fn create_finding(&self, finding: Finding) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.findings.push(finding);
            Ok(())
        })
    }

    async fn list_findings(&self) -> Result<Vec<Finding>, StoreError> {
        Ok(self.read(|s| s.findings.clone()))
    }

    async fn upsert_automation(&self, automation: Automation) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.automations.insert(automation.id.clone(), automation);
            Ok(())
        })
    }

    async fn list_due_automations(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Automation>, StoreError> {
        Ok(self.read(|s| s.list_due_automations(now, max)))
    }

    async fn record_automation_execution(
        &self,
        execution: AutomationExecution,
    ) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.automation_executions.push(execution);
            Ok(())
        })
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.try_acquire_lease(name, owner, ttl_ms, now_ms)))
    }

    async fn release_lease(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.release_lease(name, owner);
            Ok(())
        })
    }

    async fn get_settings(&self) -> Result<SettingsDoc, StoreError> {
        Ok(self.read(|s| s.settings.clone()))
    }

    async fn put_settings(&self, doc: SettingsDoc) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.settings = doc;
            Ok(())
        })
    }

    async fn upsert_secret(&self, secret: SecretRecord) -> Result<(), StoreError> {
        self.mutate(|s| {
            if let Some(existing) = s
                .secrets
                .iter_mut()
                .find(|x| x.repo == secret.repo && x.provider == secret.provider)
            {
                *existing = secret;
            } else {
                s.secrets.push(secret);
            }
            Ok(())
        })
    }

    async fn list_secrets_for_repo(&self, repo: &RepoId) -> Result<Vec<SecretRecord>, StoreError> {
        Ok(self.read(|s| s.secrets.iter().filter(|x| &x.repo == repo).cloned().collect()))
    }

    async fn append_structured_event(&self, event: StructuredEvent) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.append_structured_event(event)))
    }

    async fn next_event_sequence(&self, run: &RunId) -> Result<u64, StoreError> {
        Ok(self.read(|s| s.next_event_sequence(run)))
    }

    async fn list_structured_events(
        &self,
        run: &RunId,
        max: usize,
    ) -> Result<Vec<StructuredEvent>, StoreError> {
        Ok(self.read(|s| s.list_structured_events(run, max)))
    }

    async fn upsert_workflow_execution(&self, exec: WorkflowExecution) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.workflow_executions.insert(exec.id.clone(), exec);
            Ok(())
        })
    }

    async fn list_workflow_executions_by_state(
        &self,
        state: &str,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        Ok(self.read(|s| {
            s.workflow_executions.values().filter(|e| e.state == state).cloned().collect()
        }))
    }

    async fn mark_workflow_execution_failed(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_workflow_execution_failed(id, at))
    }

    async fn save_artifact(
        &self,
        run: &RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.save_artifact(run, name, bytes);
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
