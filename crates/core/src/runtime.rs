// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-runtime (worker) records and lifecycle states.

use crate::id::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task runtime.
///
/// ```text
/// Provisioning ─► Starting ─► Ready ─┬► Busy ─► Ready
///                                    │         │
///                                    ├► Draining ─► Stopping ─► Stopped
///                                    └► Quarantined
/// Starting ─► FailedStart
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Provisioning,
    Starting,
    Ready,
    Busy,
    Draining,
    Stopping,
    Stopped,
    Quarantined,
    FailedStart,
}

crate::simple_display! {
    RuntimeState {
        Provisioning => "provisioning",
        Starting => "starting",
        Ready => "ready",
        Busy => "busy",
        Draining => "draining",
        Stopping => "stopping",
        Stopped => "stopped",
        Quarantined => "quarantined",
        FailedStart => "failed_start",
    }
}

impl RuntimeState {
    /// Whether the runtime counts toward pool capacity.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RuntimeState::Provisioning
                | RuntimeState::Starting
                | RuntimeState::Ready
                | RuntimeState::Busy
                | RuntimeState::Draining
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeState::Stopped | RuntimeState::FailedStart)
    }

    /// Whether moving to `next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        use RuntimeState::*;
        match self {
            Provisioning => matches!(next, Starting | FailedStart | Stopped),
            Starting => matches!(next, Ready | FailedStart | Stopped),
            Ready => matches!(next, Busy | Draining | Quarantined | Stopping | Stopped),
            Busy => matches!(next, Ready | Draining | Quarantined | Stopping | Stopped),
            Draining => matches!(next, Stopping | Stopped),
            Stopping => matches!(next, Stopped),
            Quarantined => matches!(next, Stopping | Stopped),
            Stopped | FailedStart => false,
        }
    }
}

/// A remote container executing runs; single-slot in this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub id: WorkerId,
    pub container_id: Option<String>,
    pub grpc_endpoint: Option<String>,
    pub state: RuntimeState,
    pub active_slots: u32,
    pub max_slots: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    /// Runs placed on this runtime over its lifetime.
    pub dispatch_count: u64,
    pub draining: bool,
    pub image: String,
    pub image_digest: Option<String>,
}

impl TaskRuntime {
    pub fn new(id: WorkerId, image: impl Into<String>) -> Self {
        Self {
            id,
            container_id: None,
            grpc_endpoint: None,
            state: RuntimeState::Provisioning,
            active_slots: 0,
            max_slots: 1,
            last_heartbeat: None,
            started_at: None,
            dispatch_count: 0,
            draining: false,
            image: image.into(),
            image_digest: None,
        }
    }

    /// Ready with a free slot and not set to drain.
    pub fn is_dispatchable(&self) -> bool {
        self.state == RuntimeState::Ready && !self.draining && self.active_slots < self.max_slots
    }
}

/// Periodic liveness report from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker: WorkerId,
    pub host_name: String,
    pub active_slots: u32,
    pub max_slots: u32,
    pub timestamp_ms: u64,
}

/// One CPU/memory observation for pressure scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub at_ms: u64,
}

crate::test_builder! {
    TaskRuntimeBuilder => TaskRuntime {
        id: WorkerId = WorkerId::from_string("wkr-test"),
        container_id: Option<String> = Some("cid-test".to_string()),
        grpc_endpoint: Option<String> = Some("http://127.0.0.1:7070".to_string()),
        state: RuntimeState = RuntimeState::Ready,
        active_slots: u32 = 0,
        max_slots: u32 = 1,
        last_heartbeat: Option<DateTime<Utc>> = None,
        started_at: Option<DateTime<Utc>> = None,
        dispatch_count: u64 = 0,
        draining: bool = false,
        image: String = "agent-runtime:latest".to_string(),
        image_digest: Option<String> = None,
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
