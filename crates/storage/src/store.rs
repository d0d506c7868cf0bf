// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Store` trait: every persistence operation the kernel consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gf_core::{
    Automation, AutomationExecution, FailureClass, Finding, Project, ProjectId, RepoId,
    Repository, Run, RunId, RunState, SecretRecord, SettingsDoc, StructuredEvent, Task, TaskId,
    TaskRuntime, WorkerId, WorkflowExecution, WorkflowId,
};
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn conflict(what: impl std::fmt::Display) -> Self {
        Self::Conflict(what.to_string())
    }
}

/// Terminal outcome applied by `mark_completed`.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub succeeded: bool,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    pub failure_class: Option<FailureClass>,
    pub pr_url: Option<String>,
    pub ended_at: DateTime<Utc>,
}

/// The persistence seam consumed by the orchestration kernel.
///
/// Cancellation rides the future: dropping a call abandons it. Writes are
/// atomic per call; cross-call consistency is the caller's concern (leases
/// guard single-leader sections).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // === projects & repositories ===
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError>;
    async fn upsert_project(&self, project: Project) -> Result<(), StoreError>;
    async fn get_repository(&self, id: &RepoId) -> Result<Repository, StoreError>;
    async fn upsert_repository(&self, repo: Repository) -> Result<(), StoreError>;
    async fn list_repositories(&self) -> Result<Vec<Repository>, StoreError>;

    // === tasks ===
    async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError>;
    async fn upsert_task(&self, task: Task) -> Result<(), StoreError>;
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;
    /// Enabled tasks with `next_run_at ≤ now`, oldest due first, at most `max`.
    async fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Task>, StoreError>;

    // === runs ===
    /// Fails with `Conflict` when the run id already exists.
    async fn create_run(&self, run: Run) -> Result<(), StoreError>;
    async fn get_run(&self, id: &RunId) -> Result<Run, StoreError>;
    async fn mark_pending_approval(&self, id: &RunId) -> Result<(), StoreError>;
    async fn mark_started(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn mark_completed(&self, id: &RunId, outcome: RunCompletion) -> Result<(), StoreError>;
    async fn mark_cancelled(&self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn count_active_runs(&self) -> Result<u32, StoreError>;
    async fn count_active_runs_for_project(&self, id: &ProjectId) -> Result<u32, StoreError>;
    async fn count_active_runs_for_repo(&self, id: &RepoId) -> Result<u32, StoreError>;
    async fn count_active_runs_for_task(&self, id: &TaskId) -> Result<u32, StoreError>;
    /// Sorted by created-at, then id.
    async fn list_runs_by_state(&self, state: RunState) -> Result<Vec<Run>, StoreError>;
    async fn list_all_run_ids(&self) -> Result<Vec<RunId>, StoreError>;

    // === workers ===
    async fn get_worker(&self, id: &WorkerId) -> Result<TaskRuntime, StoreError>;
    async fn upsert_worker(&self, worker: TaskRuntime) -> Result<(), StoreError>;
    async fn list_workers(&self) -> Result<Vec<TaskRuntime>, StoreError>;
    async fn delete_worker(&self, id: &WorkerId) -> Result<(), StoreError>;

    // === findings ===
    async fn create_finding(&self, finding: Finding) -> Result<(), StoreError>;
    async fn list_findings(&self) -> Result<Vec<Finding>, StoreError>;

    // === automations ===
    async fn upsert_automation(&self, automation: Automation) -> Result<(), StoreError>;
    /// Enabled automations with `next_run_at ≤ now`, oldest due first.
    async fn list_due_automations(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Automation>, StoreError>;
    async fn record_automation_execution(
        &self,
        execution: AutomationExecution,
    ) -> Result<(), StoreError>;

    // === leases ===
    /// Acquire succeeds iff no live lease exists under `name` or the owner
    /// matches. Returns whether the lease is now held by `owner`.
    async fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError>;
    /// Release only when held by `owner`; silently a no-op otherwise.
    async fn release_lease(&self, name: &str, owner: &str) -> Result<(), StoreError>;

    // === settings & secrets ===
    async fn get_settings(&self) -> Result<SettingsDoc, StoreError>;
    async fn put_settings(&self, doc: SettingsDoc) -> Result<(), StoreError>;
    async fn upsert_secret(&self, secret: SecretRecord) -> Result<(), StoreError>;
    async fn list_secrets_for_repo(&self, repo: &RepoId) -> Result<Vec<SecretRecord>, StoreError>;

    // === structured events ===
    /// Append idempotently by `(run, sequence)`; returns `false` when the
    /// pair was already present.
    async fn append_structured_event(&self, event: StructuredEvent) -> Result<bool, StoreError>;
    /// The next unused sequence for a run (1 when the run has no events).
    async fn next_event_sequence(&self, run: &RunId) -> Result<u64, StoreError>;
    /// The most recent `max` events for a run, ordered by ascending sequence.
    async fn list_structured_events(
        &self,
        run: &RunId,
        max: usize,
    ) -> Result<Vec<StructuredEvent>, StoreError>;

    // === workflow executions ===
    async fn upsert_workflow_execution(&self, exec: WorkflowExecution) -> Result<(), StoreError>;
    async fn list_workflow_executions_by_state(
        &self,
        state: &str,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;
    async fn mark_workflow_execution_failed(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // === artifacts ===
    async fn save_artifact(
        &self,
        run: &RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError>;
}
