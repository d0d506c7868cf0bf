// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared collection state behind both store implementations.
//!
//! All operations are synchronous and run under the owning store's mutex;
//! the trait impls wrap them in async methods. Keeping the logic here means
//! the fake and the persistent store cannot diverge.

use crate::store::{RunCompletion, StoreError};
use chrono::{DateTime, Utc};
use gf_core::{
    Automation, AutomationExecution, Finding, LeaseRecord, Project, ProjectId, RepoId,
    Repository, Run, RunId, RunState, SecretRecord, SettingsDoc, StructuredEvent, Task, TaskId,
    TaskRuntime, WorkerId, WorkflowExecution, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stored artifact blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBlob {
    pub run: RunId,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Every collection the facade serves, as one serializable value.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Collections {
    pub projects: HashMap<ProjectId, Project>,
    pub repositories: HashMap<RepoId, Repository>,
    pub tasks: HashMap<TaskId, Task>,
    pub runs: HashMap<RunId, Run>,
    pub workers: HashMap<WorkerId, TaskRuntime>,
    pub findings: Vec<Finding>,
    pub automations: HashMap<gf_core::AutomationId, Automation>,
    pub automation_executions: Vec<AutomationExecution>,
    pub leases: HashMap<String, LeaseRecord>,
    pub settings: SettingsDoc,
    pub secrets: Vec<SecretRecord>,
    /// Per-run structured events, kept sorted by sequence.
    pub events: HashMap<RunId, Vec<StructuredEvent>>,
    pub workflow_executions: HashMap<WorkflowId, WorkflowExecution>,
    pub artifacts: Vec<ArtifactBlob>,
}

impl Collections {
    pub fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.tasks.get(id).cloned().ok_or_else(|| StoreError::not_found(id))
    }

    pub fn list_due_tasks(&self, now: DateTime<Utc>, max: usize) -> Vec<Task> {
        let mut due: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.enabled)
            .filter(|t| t.next_run_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by_key(|t| (t.next_run_at, t.id.clone()));
        due.into_iter().take(max).cloned().collect()
    }

    pub fn create_run(&mut self, run: Run) -> Result<(), StoreError> {
        if self.runs.contains_key(&run.id) {
            return Err(StoreError::conflict(&run.id));
        }
        self.runs.insert(run.id.clone(), run);
        Ok(())
    }

    pub fn get_run(&self, id: &RunId) -> Result<Run, StoreError> {
        self.runs.get(id).cloned().ok_or_else(|| StoreError::not_found(id))
    }

    fn run_mut(&mut self, id: &RunId) -> Result<&mut Run, StoreError> {
        self.runs.get_mut(id).ok_or_else(|| StoreError::not_found(id))
    }

    fn transition(run: &mut Run, next: RunState) -> Result<(), StoreError> {
        if !run.state.can_transition_to(next) {
            return Err(StoreError::conflict(format!(
                "run {} cannot move {} -> {}",
                run.id, run.state, next
            )));
        }
        run.state = next;
        Ok(())
    }

    pub fn mark_pending_approval(&mut self, id: &RunId) -> Result<(), StoreError> {
        let run = self.run_mut(id)?;
        Self::transition(run, RunState::PendingApproval)
    }

    pub fn mark_started(&mut self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let run = self.run_mut(id)?;
        Self::transition(run, RunState::Running)?;
        run.started_at = Some(at);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        id: &RunId,
        outcome: RunCompletion,
    ) -> Result<(), StoreError> {
        let run = self.run_mut(id)?;
        let next = if outcome.succeeded { RunState::Succeeded } else { RunState::Failed };
        Self::transition(run, next)?;
        run.summary = outcome.summary;
        run.output = outcome.output;
        run.failure_class = outcome.failure_class;
        if outcome.pr_url.is_some() {
            run.pr_url = outcome.pr_url;
        }
        run.ended_at = Some(outcome.ended_at);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, id: &RunId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let run = self.run_mut(id)?;
        Self::transition(run, RunState::Cancelled)?;
        run.ended_at = Some(at);
        Ok(())
    }

    pub fn count_active_runs(&self) -> u32 {
        self.runs.values().filter(|r| r.state == RunState::Running).count() as u32
    }

    pub fn count_active_runs_for_project(&self, id: &ProjectId) -> u32 {
        self.runs
            .values()
            .filter(|r| r.state == RunState::Running)
            .filter(|r| {
                self.repositories
                    .get(&r.repo)
                    .and_then(|repo| repo.project.as_ref())
                    .is_some_and(|p| p == id)
            })
            .count() as u32
    }

    pub fn count_active_runs_for_repo(&self, id: &RepoId) -> u32 {
        self.runs
            .values()
            .filter(|r| r.state == RunState::Running && &r.repo == id)
            .count() as u32
    }

    pub fn count_active_runs_for_task(&self, id: &TaskId) -> u32 {
        self.runs
            .values()
            .filter(|r| r.state == RunState::Running && &r.task == id)
            .count() as u32
    }

    pub fn list_runs_by_state(&self, state: RunState) -> Vec<Run> {
        let mut runs: Vec<Run> =
            self.runs.values().filter(|r| r.state == state).cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        runs
    }

    pub fn list_due_automations(&self, now: DateTime<Utc>, max: usize) -> Vec<Automation> {
        let mut due: Vec<&Automation> = self
            .automations
            .values()
            .filter(|a| a.enabled)
            .filter(|a| a.next_run_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by_key(|a| (a.next_run_at, a.id.clone()));
        due.into_iter().take(max).cloned().collect()
    }

    pub fn try_acquire_lease(&mut self, name: &str, owner: &str, ttl_ms: u64, now_ms: u64) -> bool {
        if let Some(existing) = self.leases.get(name) {
            if existing.is_live(now_ms) && existing.owner != owner {
                return false;
            }
        }
        self.leases.insert(
            name.to_string(),
            LeaseRecord {
                name: name.to_string(),
                owner: owner.to_string(),
                expires_at_ms: now_ms + ttl_ms,
            },
        );
        true
    }

    pub fn release_lease(&mut self, name: &str, owner: &str) {
        if self.leases.get(name).is_some_and(|l| l.owner == owner) {
            self.leases.remove(name);
        }
    }

    pub fn append_structured_event(&mut self, event: StructuredEvent) -> bool {
        let events = self.events.entry(event.run.clone()).or_default();
        match events.binary_search_by_key(&event.sequence, |e| e.sequence) {
            // Idempotent by (run, sequence): a duplicate is dropped.
            Ok(_) => false,
            Err(pos) => {
                events.insert(pos, event);
                true
            }
        }
    }

    pub fn next_event_sequence(&self, run: &RunId) -> u64 {
        self.events
            .get(run)
            .and_then(|events| events.last())
            .map(|e| e.sequence + 1)
            .unwrap_or(1)
    }

    pub fn list_structured_events(&self, run: &RunId, max: usize) -> Vec<StructuredEvent> {
        let Some(events) = self.events.get(run) else { return Vec::new() };
        let skip = events.len().saturating_sub(max);
        events[skip..].to_vec()
    }

    pub fn mark_workflow_execution_failed(
        &mut self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let exec = self
            .workflow_executions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id))?;
        exec.state = "failed".to_string();
        exec.ended_at = Some(at);
        Ok(())
    }

    pub fn save_artifact(&mut self, run: &RunId, name: &str, bytes: Vec<u8>) {
        if let Some(existing) = self
            .artifacts
            .iter_mut()
            .find(|a| &a.run == run && a.name == name)
        {
            existing.bytes = bytes;
            return;
        }
        self.artifacts.push(ArtifactBlob { run: run.clone(), name: name.to_string(), bytes });
    }
}
