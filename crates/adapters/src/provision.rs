// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container provisioning seam for the worker pool.

use async_trait::async_trait;
use gf_core::WorkerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("image resolution failed: {0}")]
    ImageResolution(String),
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    #[error("terminate failed: {0}")]
    TerminateFailed(String),
    #[error("runtime listing failed: {0}")]
    ListFailed(String),
}

/// A freshly launched worker container.
#[derive(Debug, Clone)]
pub struct LaunchedRuntime {
    pub container_id: String,
    pub grpc_endpoint: String,
}

/// Launches and tears down worker containers.
#[async_trait]
pub trait RuntimeProvisioner: Send + Sync + 'static {
    /// Resolve an image reference to a digest, pulling or building per the
    /// configured image policy. Slow; callers run it as background work.
    async fn resolve_image(&self, image: &str) -> Result<String, ProvisionError>;

    /// Start a container for `worker` from `image`.
    async fn launch(&self, worker: &WorkerId, image: &str)
        -> Result<LaunchedRuntime, ProvisionError>;

    /// Stop and remove a container. Best effort; idempotent.
    async fn terminate(&self, container_id: &str) -> Result<(), ProvisionError>;

    /// Container ids currently alive on the substrate.
    async fn list_live(&self) -> Result<Vec<String>, ProvisionError>;
}
