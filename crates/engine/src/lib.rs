// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestration kernel.
//!
//! Each component is a plain value built in the daemon's wiring phase with
//! its collaborators passed in explicitly: the store facade, the worker RPC,
//! the provisioner, the status publisher, and a clock. Long-lived loops take
//! a cancellation token and exit quietly when it trips.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod automation;
pub mod background;
pub mod condition;
pub mod diff_merge;
pub mod dispatch;
pub mod error;
pub mod lease;
pub mod listener;
pub mod pool;
pub mod projector;
pub mod prompt;
pub mod publisher;
pub mod recovery;
pub mod routes;
pub mod scheduler;
pub mod settings;

pub use automation::AutomationScheduler;
pub use background::{BackgroundCoordinator, ProgressHandle, WorkError};
pub use condition::{evaluate_condition, EdgeContext, NodeInfo};
pub use diff_merge::merge_lane_diffs;
pub use dispatch::RunDispatcher;
pub use error::EngineError;
pub use lease::{LeaseCoordinator, LeaseGuard};
pub use listener::WorkerEventListener;
pub use pool::{DispatchLease, PoolHealth, WorkerPool};
pub use projector::{RunViewProjector, RunViewSnapshot};
pub use prompt::build_layered_prompt;
pub use publisher::{StatusPublisher, WorkRelay};
pub use recovery::RecoveryService;
pub use routes::RouteTable;
pub use scheduler::CronScheduler;
pub use settings::SettingsProvider;
