// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error type.

use gf_adapters::{ProvisionError, RpcError};
use gf_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by kernel components.
///
/// Loops catch these, log with context, and continue; only the daemon's
/// wiring phase treats them as fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("invalid input: {0}")]
    Invalid(String),
}
