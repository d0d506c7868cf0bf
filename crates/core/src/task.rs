// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task definitions and scheduling policies.

use crate::id::{RepoId, TaskId};
use crate::records::InstructionFile;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on the delay between retry attempts.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// How a task is admitted into runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fires once when due, then is consumed.
    OneShot,
    /// Fires on a cron expression.
    Cron,
    /// Fires only on explicit user request.
    Manual,
}

crate::simple_display! {
    TaskKind {
        OneShot => "one_shot",
        Cron => "cron",
        Manual => "manual",
    }
}

/// The agent-execution adapter a run is handed to on the worker
/// (`codex`, `opencode`, `claude-code`, `zai`, …). Open set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HarnessKind(pub String);

impl HarnessKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retry policy for failed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, base_backoff_secs: 10, multiplier: 2.0 }
    }
}

impl RetryPolicy {
    /// Delay before dispatching `attempt + 1`, given the attempt that just
    /// failed. `base × multiplier^(attempt−1)`, capped at
    /// [`MAX_RETRY_BACKOFF_SECS`].
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let secs = self.base_backoff_secs as f64 * self.multiplier.powi(exp as i32);
        let capped = secs.min(MAX_RETRY_BACKOFF_SECS as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Container sandbox limits applied to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    pub cpu_limit: Option<f64>,
    pub memory_mb: Option<u64>,
    pub network_disabled: bool,
    pub read_only_rootfs: bool,
}

/// Artifact collection limits for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    pub max_count: u32,
    pub max_total_bytes: u64,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self { max_count: 16, max_total_bytes: 64 * 1024 * 1024 }
    }
}

/// Whether runs of a task need human approval before placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalProfile {
    #[default]
    Automatic,
    RequireApproval,
}

crate::simple_display! {
    ApprovalProfile {
        Automatic => "automatic",
        RequireApproval => "require_approval",
    }
}

/// A schedulable task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub repo: RepoId,
    pub harness: HarnessKind,
    pub command: String,
    /// Base prompt appended after all instruction layers.
    pub prompt: String,
    /// Task-scoped instruction files, ordered by their `order` field.
    pub instruction_files: Vec<InstructionFile>,
    pub kind: TaskKind,
    /// Cron expression; required when `kind` is [`TaskKind::Cron`].
    pub cron_expression: Option<String>,
    /// When the task next becomes due.
    pub next_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub retry: RetryPolicy,
    pub execution_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    pub sandbox: SandboxProfile,
    pub artifacts: ArtifactPolicy,
    pub approval: ApprovalProfile,
    /// Per-task concurrent-run cap; 0 disables the check.
    pub concurrency_limit: u32,
    pub auto_create_pr: bool,
    /// Harness tuning surfaced to the worker (`model`, `temperature`, …).
    #[serde(default)]
    pub harness_settings: std::collections::BTreeMap<String, String>,
}

impl Task {
    /// Enabled cron tasks must carry a parseable expression and a due time.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind == TaskKind::Cron && self.enabled {
            let expr = self
                .cron_expression
                .as_deref()
                .ok_or_else(|| format!("cron task {} has no cron expression", self.id))?;
            parse_cron(expr)
                .map_err(|e| format!("cron task {} has invalid expression {expr:?}: {e}", self.id))?;
            if self.next_run_at.is_none() {
                return Err(format!("enabled cron task {} has no next_run_at", self.id));
            }
        }
        Ok(())
    }
}

/// Parse a cron expression, accepting the common 5-field form.
///
/// The `cron` crate wants a seconds field; user-facing expressions usually
/// omit it, so a 5-field expression gets `0` prepended.
fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {trimmed}"))
    } else {
        cron::Schedule::from_str(trimmed)
    }
}

/// First firing of `expr` strictly after `after`.
///
/// Returns `None` when the expression does not parse or never fires again.
pub fn next_fire_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = parse_cron(expr).ok()?;
    // `Schedule::after` is inclusive of the next whole second; nudge past it
    // so "strictly after" holds even on exact-second boundaries.
    schedule.after(&(after + ChronoDuration::milliseconds(999))).next()
}

crate::test_builder! {
    TaskBuilder => Task {
        id: TaskId = TaskId::from_string("tsk-test"),
        name: String = "review".to_string(),
        repo: RepoId = RepoId::from_string("rep-test"),
        harness: HarnessKind = HarnessKind::new("claude-code"),
        command: String = "agent run".to_string(),
        prompt: String = "do the thing".to_string(),
        instruction_files: Vec<InstructionFile> = Vec::new(),
        kind: TaskKind = TaskKind::Cron,
        cron_expression: Option<String> = Some("0 */5 * * * *".to_string()),
        next_run_at: Option<DateTime<Utc>> = None,
        enabled: bool = true,
        retry: RetryPolicy = RetryPolicy::default(),
        execution_timeout_secs: u64 = 1800,
        overall_timeout_secs: u64 = 3600,
        sandbox: SandboxProfile = SandboxProfile::default(),
        artifacts: ArtifactPolicy = ArtifactPolicy::default(),
        approval: ApprovalProfile = ApprovalProfile::Automatic,
        concurrency_limit: u32 = 0,
        auto_create_pr: bool = false,
        harness_settings: std::collections::BTreeMap<String, String> =
            std::collections::BTreeMap::new(),
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
