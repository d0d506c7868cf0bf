// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured run events and the status-event fan-out payloads.

use crate::background::WorkSnapshot;
use crate::id::{RunId, WorkerId};
use crate::run::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, per-run-sequenced event from a worker.
///
/// Idempotent by `(run, sequence)`: appending the same pair twice is a no-op
/// at the store, and projections dedup by sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEvent {
    pub run: RunId,
    /// Monotonically increasing within the run.
    pub sequence: u64,
    pub event_type: String,
    pub category: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub schema_version: u32,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Events delivered to status subscribers (UI relays, notification sinks).
///
/// Subscribers are idempotent; delivery happens on a background worker and
/// dead subscribers are pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_kind", rename_all = "snake_case")]
pub enum StatusEvent {
    /// A run changed state.
    RunStatus {
        run: RunId,
        state: RunState,
        summary: Option<String>,
    },
    /// A streamed log chunk; never persisted.
    RunLogChunk {
        run: RunId,
        message: String,
        timestamp_ms: u64,
    },
    /// A persisted run log line.
    RunLog {
        run: RunId,
        kind: String,
        message: String,
        timestamp_ms: u64,
    },
    /// A background work item changed.
    WorkUpdated { snapshot: WorkSnapshot },
    /// A worker changed lifecycle state.
    WorkerState {
        worker: WorkerId,
        state: crate::runtime::RuntimeState,
    },
}
