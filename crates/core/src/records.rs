// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supporting persisted records: projects, repositories, instruction files,
//! findings, secrets, workflow executions.

use crate::id::{FindingId, ProjectId, RepoId, RunId, TaskId, WorkflowId};
use crate::run::FailureClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project groups repositories for concurrency accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

/// An instruction file layered into the dispatch prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionFile {
    pub name: String,
    pub content: String,
    /// Sort key within its layer (order field for embedded/task files,
    /// priority for collection files).
    pub order: i32,
    pub enabled: bool,
}

/// A repository runs execute against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub project: Option<ProjectId>,
    pub name: String,
    pub git_url: String,
    /// Repository-collection instruction files, priority-ordered; only
    /// enabled ones are layered.
    pub collection_instructions: Vec<InstructionFile>,
    /// Instruction files embedded in the repository record, order-field
    /// sorted.
    pub embedded_instructions: Vec<InstructionFile>,
}

/// A persisted failure record surfaced to users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub run: RunId,
    pub task: TaskId,
    pub summary: String,
    pub failure_class: Option<FailureClass>,
    pub created_at: DateTime<Utc>,
}

/// A repository-scoped provider secret, opaque until the dispatch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub repo: RepoId,
    /// Provider name (`github`, `codex`, `claude-code`, …) selecting the
    /// canonical env mapping.
    pub provider: String,
    /// Ciphertext; decrypted only while composing a dispatch request.
    pub encrypted_value: String,
}

/// Execution of a user-defined workflow; only its recovery contract matters
/// to the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: WorkflowId,
    pub state: String,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}
