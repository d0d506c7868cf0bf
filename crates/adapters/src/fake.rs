// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake worker-fleet adapters for deterministic testing.

use crate::provision::{LaunchedRuntime, ProvisionError, RuntimeProvisioner};
use crate::rpc::{
    DispatchReply, DispatchRequest, KillOutcome, ReconcileOutcome, RpcError, WorkerRpc,
    WorkerStreamEvent,
};
use async_trait::async_trait;
use gf_core::{RunId, WorkerId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Recorded call to [`FakeWorkerRpc`].
#[derive(Debug, Clone)]
pub enum RpcCall {
    Dispatch { endpoint: String, run: RunId },
    Cancel { run: RunId },
    Kill { run: RunId, reason: String, force: bool },
    Reconcile { active: Vec<RunId> },
}

/// Fake worker RPC: records calls, lets tests script replies and feed the
/// event stream.
#[derive(Clone, Default)]
pub struct FakeWorkerRpc {
    inner: Arc<Mutex<FakeRpcState>>,
}

#[derive(Default)]
struct FakeRpcState {
    calls: Vec<RpcCall>,
    requests: Vec<DispatchRequest>,
    reject_reason: Option<String>,
    dispatch_error: Option<String>,
    reconcile_outcome: ReconcileOutcome,
    subscribers: Vec<mpsc::Sender<WorkerStreamEvent>>,
}

impl FakeWorkerRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.inner.lock().calls.clone()
    }

    /// Dispatch requests seen so far, in order.
    pub fn dispatch_requests(&self) -> Vec<DispatchRequest> {
        self.inner.lock().requests.clone()
    }

    /// Make subsequent dispatches come back `accepted = false`.
    pub fn reject_dispatches(&self, reason: impl Into<String>) {
        self.inner.lock().reject_reason = Some(reason.into());
    }

    /// Make subsequent dispatches fail at the transport level.
    pub fn fail_dispatches(&self, reason: impl Into<String>) {
        self.inner.lock().dispatch_error = Some(reason.into());
    }

    pub fn set_reconcile_outcome(&self, outcome: ReconcileOutcome) {
        self.inner.lock().reconcile_outcome = outcome;
    }

    /// Feed an event to every live subscriber.
    pub async fn push_event(&self, event: WorkerStreamEvent) {
        let subscribers = self.inner.lock().subscribers.clone();
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Drop all subscriber channels, simulating a stream disconnect.
    pub fn drop_stream(&self) {
        self.inner.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[async_trait]
impl WorkerRpc for FakeWorkerRpc {
    async fn dispatch_job(
        &self,
        endpoint: &str,
        request: DispatchRequest,
    ) -> Result<DispatchReply, RpcError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(RpcCall::Dispatch { endpoint: endpoint.to_string(), run: request.run.clone() });
        if let Some(reason) = inner.dispatch_error.clone() {
            return Err(RpcError::Unavailable(reason));
        }
        inner.requests.push(request);
        match inner.reject_reason.clone() {
            Some(reason) => Ok(DispatchReply { accepted: false, reason: Some(reason) }),
            None => Ok(DispatchReply { accepted: true, reason: None }),
        }
    }

    async fn cancel_job(&self, run: &RunId) -> Result<(), RpcError> {
        self.inner.lock().calls.push(RpcCall::Cancel { run: run.clone() });
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<WorkerStreamEvent>, RpcError> {
        let (tx, rx) = mpsc::channel(64);
        self.inner.lock().subscribers.push(tx);
        Ok(rx)
    }

    async fn kill_container(
        &self,
        run: &RunId,
        reason: &str,
        force: bool,
    ) -> Result<KillOutcome, RpcError> {
        self.inner.lock().calls.push(RpcCall::Kill {
            run: run.clone(),
            reason: reason.to_string(),
            force,
        });
        Ok(KillOutcome { killed: true, container_id: Some(format!("cid-{run}")), error: None })
    }

    async fn reconcile_orphaned_containers(
        &self,
        active_runs: Vec<RunId>,
    ) -> Result<ReconcileOutcome, RpcError> {
        let mut inner = self.inner.lock();
        inner.calls.push(RpcCall::Reconcile { active: active_runs });
        Ok(inner.reconcile_outcome.clone())
    }
}

/// Fake provisioner: launches succeed with synthetic endpoints unless told
/// to fail.
#[derive(Clone, Default)]
pub struct FakeProvisioner {
    inner: Arc<Mutex<FakeProvisionState>>,
}

#[derive(Default)]
struct FakeProvisionState {
    launch_count: u32,
    terminate_count: u32,
    fail_launches: bool,
    fail_image: bool,
    live: Vec<String>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_launches(&self, fail: bool) {
        self.inner.lock().fail_launches = fail;
    }

    pub fn fail_image_resolution(&self, fail: bool) {
        self.inner.lock().fail_image = fail;
    }

    pub fn launch_count(&self) -> u32 {
        self.inner.lock().launch_count
    }

    pub fn terminate_count(&self) -> u32 {
        self.inner.lock().terminate_count
    }

    /// Set the container ids `list_live` reports.
    pub fn set_live(&self, ids: Vec<String>) {
        self.inner.lock().live = ids;
    }
}

#[async_trait]
impl RuntimeProvisioner for FakeProvisioner {
    async fn resolve_image(&self, image: &str) -> Result<String, ProvisionError> {
        if self.inner.lock().fail_image {
            return Err(ProvisionError::ImageResolution(format!("no such image {image}")));
        }
        Ok(format!("sha256:{:016x}", image.len()))
    }

    async fn launch(
        &self,
        worker: &WorkerId,
        _image: &str,
    ) -> Result<LaunchedRuntime, ProvisionError> {
        let mut inner = self.inner.lock();
        if inner.fail_launches {
            return Err(ProvisionError::LaunchFailed("substrate said no".to_string()));
        }
        inner.launch_count += 1;
        let container_id = format!("cid-{worker}");
        inner.live.push(container_id.clone());
        Ok(LaunchedRuntime {
            container_id,
            grpc_endpoint: format!("http://{worker}.workers.local:7070"),
        })
    }

    async fn terminate(&self, container_id: &str) -> Result<(), ProvisionError> {
        let mut inner = self.inner.lock();
        inner.terminate_count += 1;
        inner.live.retain(|c| c != container_id);
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(self.inner.lock().live.clone())
    }
}
