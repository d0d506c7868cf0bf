// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run records and their state machine.

use crate::id::{AutomationId, RepoId, RunId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a run. Transitions only move forward through the graph:
///
/// ```text
/// Queued ─► PendingApproval ─► Running ─► Succeeded | Failed | Cancelled
///    └───────────────────────────► Running
///    └► Failed | Cancelled  (rejection / cancel before placement)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    PendingApproval,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

crate::simple_display! {
    RunState {
        Queued => "queued",
        PendingApproval => "pending_approval",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Cancelled)
    }

    /// Whether moving to `next` is a forward transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match self {
            Queued => matches!(next, PendingApproval | Running | Failed | Cancelled),
            PendingApproval => matches!(next, Running | Failed | Cancelled),
            Running => next.is_terminal(),
            Succeeded | Failed | Cancelled => false,
        }
    }
}

/// Why a run failed, when the system can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    EnvelopeValidation,
    Timeout,
    StaleRun,
    ZombieRun,
    OverdueRun,
    OrphanRecovery,
    DispatchRejected,
}

crate::simple_display! {
    FailureClass {
        EnvelopeValidation => "envelope_validation",
        Timeout => "timeout",
        StaleRun => "stale_run",
        ZombieRun => "zombie_run",
        OverdueRun => "overdue_run",
        OrphanRecovery => "orphan_recovery",
        DispatchRejected => "dispatch_rejected",
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub task: TaskId,
    pub repo: RepoId,
    /// 1-based; retries create a fresh run with `attempt + 1`.
    pub attempt: u32,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub failure_class: Option<FailureClass>,
    /// Opaque result payload from the worker's completion envelope.
    pub output: Option<serde_json::Value>,
    pub pr_url: Option<String>,
    pub session_profile: Option<String>,
    /// Set when the run was fired by an automation.
    pub automation_run: Option<AutomationId>,
}

impl Run {
    pub fn new(task: TaskId, repo: RepoId, attempt: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::fresh(),
            task,
            repo,
            attempt,
            state: RunState::Queued,
            created_at,
            started_at: None,
            ended_at: None,
            summary: None,
            failure_class: None,
            output: None,
            pr_url: None,
            session_profile: None,
            automation_run: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Last observable activity: start time when the run was placed,
    /// creation time otherwise. Drives stale/zombie/overdue detection.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    /// Invariant from the data model: `ended_at` is set iff terminal.
    pub fn check_terminal_invariant(&self) -> bool {
        self.is_terminal() == self.ended_at.is_some()
    }
}

crate::test_builder! {
    RunBuilder => Run {
        id: RunId = RunId::from_string("run-test"),
        task: TaskId = TaskId::from_string("tsk-test"),
        repo: RepoId = RepoId::from_string("rep-test"),
        attempt: u32 = 1,
        state: RunState = RunState::Queued,
        created_at: DateTime<Utc> = DateTime::<Utc>::from_timestamp_millis(1_767_225_600_000)
            .unwrap_or_default(),
        started_at: Option<DateTime<Utc>> = None,
        ended_at: Option<DateTime<Utc>> = None,
        summary: Option<String> = None,
        failure_class: Option<FailureClass> = None,
        output: Option<serde_json::Value> = None,
        pr_url: Option<String> = None,
        session_profile: Option<String> = None,
        automation_run: Option<AutomationId> = None,
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
