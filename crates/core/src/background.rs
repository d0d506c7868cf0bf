// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background-work snapshots.

use crate::id::WorkId;
use serde::{Deserialize, Serialize};

/// What a background work item is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    TaskRuntimeImageResolution,
    LiteDbVectorBootstrap,
    RepositoryGitRefresh,
    Recovery,
    TaskTemplateInit,
    Other,
}

crate::simple_display! {
    WorkKind {
        TaskRuntimeImageResolution => "task_runtime_image_resolution",
        LiteDbVectorBootstrap => "lite_db_vector_bootstrap",
        RepositoryGitRefresh => "repository_git_refresh",
        Recovery => "recovery",
        TaskTemplateInit => "task_template_init",
        Other => "other",
    }
}

/// State of a background work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

crate::simple_display! {
    WorkState {
        Pending => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl WorkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkState::Succeeded | WorkState::Failed | WorkState::Cancelled)
    }
}

/// Read-only view of a background work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSnapshot {
    pub id: WorkId,
    pub kind: WorkKind,
    /// Dedup key; at most one non-terminal item per key when deduping.
    pub operation_key: String,
    pub state: WorkState,
    /// 0–100 when the work reports progress.
    pub percent: Option<u8>,
    pub message: Option<String>,
    pub started_at_ms: u64,
    pub updated_at_ms: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Critical work failing is fatal to the process (image bootstrap).
    pub critical: bool,
}

impl WorkSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 10%-wide progress bucket, used by the notification relay to decide
    /// whether a progress change is worth republishing.
    pub fn progress_bucket(&self) -> Option<u8> {
        self.percent.map(|p| p.min(100) / 10)
    }
}
