// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seams to the worker fleet.
//!
//! The kernel never talks to containers or sockets directly: it goes through
//! [`WorkerRpc`] (dispatch, cancel, event stream, kill, orphan reconcile)
//! and [`RuntimeProvisioner`] (image resolution, container launch/terminate).
//! Secrets cross into dispatch requests through [`SecretCipher`]. Fake
//! implementations live behind the `test-support` feature.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod gateway;
pub mod provision;
pub mod rpc;
pub mod secrets;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeProvisioner, FakeWorkerRpc, RpcCall};

pub use gateway::GatewayFleet;
pub use provision::{LaunchedRuntime, ProvisionError, RuntimeProvisioner};
pub use rpc::{
    container_labels, DispatchReply, DispatchRequest, KillOutcome, ReconcileOutcome, RpcError,
    WorkerRpc, WorkerStreamEvent,
};
pub use secrets::{provider_env_names, upper_snake, PassthroughCipher, SecretCipher, SecretError};
