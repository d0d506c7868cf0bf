// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-defined automation definitions and their execution history.

use crate::id::{AutomationId, RunId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-driven automation: fires a target task on its own schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: AutomationId,
    pub name: String,
    pub enabled: bool,
    pub cron_expression: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub target_task: TaskId,
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// History row recorded for every automation firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationExecution {
    pub automation: AutomationId,
    pub run: RunId,
    pub fired_at: DateTime<Utc>,
}
