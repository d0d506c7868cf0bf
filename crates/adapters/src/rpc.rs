// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker RPC semantics.
//!
//! The wire format is a deployment concern; this trait pins the semantics
//! the kernel relies on: idempotent dispatch by run id, fire-and-forget
//! cancel, an at-least-once event stream, and container kill/reconcile.

use async_trait::async_trait;
use gf_core::{ArtifactPolicy, HarnessKind, ProjectId, RepoId, RunId, SandboxProfile, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from worker RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("worker unavailable: {0}")]
    Unavailable(String),
    #[error("stream closed")]
    StreamClosed,
    #[error("rpc failed: {0}")]
    Failed(String),
}

/// Everything a worker needs to execute one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub run: RunId,
    pub task: TaskId,
    pub repo: RepoId,
    pub project: Option<ProjectId>,
    pub harness: HarnessKind,
    pub command: String,
    /// The fully layered prompt (instruction layers + task prompt).
    pub prompt: String,
    pub execution_timeout_secs: u64,
    pub attempt: u32,
    pub sandbox: SandboxProfile,
    pub artifacts: ArtifactPolicy,
    pub git_url: String,
    pub artifact_path: String,
    /// Container labels (`orchestrator.run-id` and friends).
    pub labels: BTreeMap<String, String>,
    /// Environment map; includes decrypted secrets, never logged.
    pub env: BTreeMap<String, String>,
}

/// Worker's answer to a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReply {
    pub accepted: bool,
    pub reason: Option<String>,
}

/// One message from the fleet-wide worker event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStreamEvent {
    /// `log_chunk`, `completed`, or any structured event kind.
    pub kind: String,
    pub run: RunId,
    pub message: String,
    pub timestamp_ms: u64,
    pub payload_json: Option<String>,
}

/// Result of a container kill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillOutcome {
    pub killed: bool,
    pub container_id: Option<String>,
    pub error: Option<String>,
}

/// Result of an orphan-container sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub removed_count: u32,
    pub removed_ids: Vec<String>,
}

/// RPC surface of the worker fleet.
#[async_trait]
pub trait WorkerRpc: Send + Sync + 'static {
    /// Place a run on the worker at `endpoint`. Idempotent by run id: a
    /// worker that already holds the run re-acknowledges instead of
    /// double-starting it.
    async fn dispatch_job(
        &self,
        endpoint: &str,
        request: DispatchRequest,
    ) -> Result<DispatchReply, RpcError>;

    /// Fire-and-forget cancellation of a run.
    async fn cancel_job(&self, run: &RunId) -> Result<(), RpcError>;

    /// Subscribe to the fleet-wide event stream. Delivery is at-least-once;
    /// the receiver closing means the stream dropped and the caller should
    /// resubscribe.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<WorkerStreamEvent>, RpcError>;

    /// Kill the container executing `run`.
    async fn kill_container(
        &self,
        run: &RunId,
        reason: &str,
        force: bool,
    ) -> Result<KillOutcome, RpcError>;

    /// Remove containers whose `run-id` label is not in `active_runs`.
    async fn reconcile_orphaned_containers(
        &self,
        active_runs: Vec<RunId>,
    ) -> Result<ReconcileOutcome, RpcError>;
}

/// Labels set on every dispatched container.
pub fn container_labels(
    run: &RunId,
    task: &TaskId,
    repo: &RepoId,
    project: Option<&ProjectId>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("orchestrator.run-id".to_string(), run.to_string());
    labels.insert("orchestrator.task-id".to_string(), task.to_string());
    labels.insert("orchestrator.repo-id".to_string(), repo.to_string());
    if let Some(project) = project {
        labels.insert("orchestrator.project-id".to_string(), project.to_string());
    }
    labels
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
