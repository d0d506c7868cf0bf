// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-over-WebSocket fleet gateway client.
//!
//! The control plane talks to a fleet gateway over two sockets: a control
//! socket carrying correlated request/response frames, and an events socket
//! streaming worker events and heartbeats. The gateway's internals (how it
//! reaches containers, registries, the substrate) are its own business; this
//! client only speaks the frame protocol.
//!
//! Control frames:
//! ```json
//! → {"id": 7, "op": "dispatch_job", "params": {…}}
//! ← {"id": 7, "ok": true, "result": {…}}
//! ← {"id": 7, "ok": false, "error": "no such worker"}
//! ```
//!
//! Event frames are [`WorkerStreamEvent`] JSON; frames with kind
//! `heartbeat` carry a [`Heartbeat`] payload and are routed separately.

use crate::provision::{LaunchedRuntime, ProvisionError, RuntimeProvisioner};
use crate::rpc::{
    DispatchReply, DispatchRequest, KillOutcome, ReconcileOutcome, RpcError, WorkerRpc,
    WorkerStreamEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gf_core::{Heartbeat, RunId, WorkerId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// How long a control request may wait for its reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay before redialing a dropped control socket.
const REDIAL_BACKOFF: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, String>>>>>;

/// Client for the fleet gateway; implements both kernel seams.
pub struct GatewayFleet {
    events_url: String,
    next_id: AtomicU64,
    pending: Pending,
    control_tx: mpsc::Sender<String>,
    heartbeat_subs: Arc<Mutex<Vec<mpsc::Sender<Heartbeat>>>>,
}

impl GatewayFleet {
    /// Dial the gateway at `base_url` (e.g. `ws://fleet-gw:9500`). The
    /// control socket is kept alive with redials; event subscriptions dial
    /// on demand.
    pub fn connect(base_url: &str) -> Arc<Self> {
        let control_url = format!("{}/control", base_url.trim_end_matches('/'));
        let events_url = format!("{}/events", base_url.trim_end_matches('/'));
        let (control_tx, control_rx) = mpsc::channel::<String>(64);

        let fleet = Arc::new(Self {
            events_url,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            control_tx,
            heartbeat_subs: Arc::new(Mutex::new(Vec::new())),
        });

        tokio::spawn(control_pump(control_url, Arc::clone(&fleet.pending), control_rx));
        fleet
    }

    /// Receive fleet heartbeats; the daemon pumps these into the pool.
    pub fn subscribe_heartbeats(&self) -> mpsc::Receiver<Heartbeat> {
        let (tx, rx) = mpsc::channel(64);
        self.heartbeat_subs.lock().push(tx);
        rx
    }

    async fn request(
        &self,
        op: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({"id": id, "op": op, "params": params}).to_string();
        if self.control_tx.send(frame).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(RpcError::Unavailable("control socket closed".to_string()));
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(RpcError::Failed(error)),
            Ok(Err(_)) => Err(RpcError::Unavailable("control socket dropped".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RpcError::Unavailable(format!("{op} timed out")))
            }
        }
    }

    fn fanout_heartbeat(subs: &Arc<Mutex<Vec<mpsc::Sender<Heartbeat>>>>, hb: Heartbeat) {
        let mut subs = subs.lock();
        subs.retain(|tx| tx.try_send(hb.clone()).is_ok() || !tx.is_closed());
    }
}

/// Own the control socket: forward outbound frames, correlate replies,
/// redial on loss.
async fn control_pump(url: String, pending: Pending, mut outbound: mpsc::Receiver<String>) {
    loop {
        let socket = match connect_async(&url).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "gateway control dial failed");
                tokio::time::sleep(REDIAL_BACKOFF).await;
                continue;
            }
        };
        tracing::info!(url = %url, "gateway control socket connected");
        let (mut write, mut read) = socket.split();

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { return };
                    if write.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => complete_pending(&pending, &text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "gateway control socket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        // The socket is gone; every in-flight request fails fast.
        pending.lock().clear();
        tracing::warn!("gateway control socket dropped, redialing");
        tokio::time::sleep(REDIAL_BACKOFF).await;
    }
}

fn complete_pending(pending: &Pending, text: &str) {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::warn!("unparseable control frame from gateway");
        return;
    };
    let Some(id) = frame.get("id").and_then(|v| v.as_u64()) else { return };
    let Some(tx) = pending.lock().remove(&id) else { return };

    let ok = frame.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
    let outcome = if ok {
        Ok(frame.get("result").cloned().unwrap_or(serde_json::Value::Null))
    } else {
        Err(frame
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("gateway error")
            .to_string())
    };
    let _ = tx.send(outcome);
}

#[async_trait]
impl WorkerRpc for GatewayFleet {
    async fn dispatch_job(
        &self,
        endpoint: &str,
        request: DispatchRequest,
    ) -> Result<DispatchReply, RpcError> {
        let result = self
            .request(
                "dispatch_job",
                json!({"endpoint": endpoint, "request": request}),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::Failed(e.to_string()))
    }

    async fn cancel_job(&self, run: &RunId) -> Result<(), RpcError> {
        self.request("cancel_job", json!({"run": run})).await?;
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<WorkerStreamEvent>, RpcError> {
        let (socket, _) = connect_async(&self.events_url)
            .await
            .map_err(|e| RpcError::Unavailable(e.to_string()))?;
        tracing::info!(url = %self.events_url, "gateway events socket connected");

        let (tx, rx) = mpsc::channel(256);
        let heartbeat_subs = Arc::clone(&self.heartbeat_subs);
        tokio::spawn(async move {
            let (_, mut read) = socket.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        // Heartbeats ride the same socket under their own kind.
                        if let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) {
                            if frame.get("kind").and_then(|v| v.as_str()) == Some("heartbeat") {
                                if let Some(hb) = frame
                                    .get("payload")
                                    .and_then(|p| serde_json::from_value::<Heartbeat>(p.clone()).ok())
                                {
                                    GatewayFleet::fanout_heartbeat(&heartbeat_subs, hb);
                                }
                                continue;
                            }
                        }
                        match serde_json::from_str::<WorkerStreamEvent>(&text) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "unparseable worker event frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            // Dropping `tx` closes the receiver; the listener resubscribes.
        });
        Ok(rx)
    }

    async fn kill_container(
        &self,
        run: &RunId,
        reason: &str,
        force: bool,
    ) -> Result<KillOutcome, RpcError> {
        let result = self
            .request(
                "kill_container",
                json!({"run": run, "reason": reason, "force": force}),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::Failed(e.to_string()))
    }

    async fn reconcile_orphaned_containers(
        &self,
        active_runs: Vec<RunId>,
    ) -> Result<ReconcileOutcome, RpcError> {
        let result = self
            .request("reconcile_orphans", json!({"active_runs": active_runs}))
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::Failed(e.to_string()))
    }
}

#[async_trait]
impl RuntimeProvisioner for GatewayFleet {
    async fn resolve_image(&self, image: &str) -> Result<String, ProvisionError> {
        let result = self
            .request("resolve_image", json!({"image": image}))
            .await
            .map_err(|e| ProvisionError::ImageResolution(e.to_string()))?;
        result
            .get("digest")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::ImageResolution("gateway returned no digest".to_string()))
    }

    async fn launch(
        &self,
        worker: &WorkerId,
        image: &str,
    ) -> Result<LaunchedRuntime, ProvisionError> {
        let result = self
            .request("launch_runtime", json!({"worker": worker, "image": image}))
            .await
            .map_err(|e| ProvisionError::LaunchFailed(e.to_string()))?;
        let container_id = result.get("container_id").and_then(|v| v.as_str());
        let endpoint = result.get("grpc_endpoint").and_then(|v| v.as_str());
        match (container_id, endpoint) {
            (Some(container_id), Some(endpoint)) => Ok(LaunchedRuntime {
                container_id: container_id.to_string(),
                grpc_endpoint: endpoint.to_string(),
            }),
            _ => Err(ProvisionError::LaunchFailed("gateway returned no runtime info".to_string())),
        }
    }

    async fn terminate(&self, container_id: &str) -> Result<(), ProvisionError> {
        self.request("terminate_runtime", json!({"container_id": container_id}))
            .await
            .map_err(|e| ProvisionError::TerminateFailed(e.to_string()))?;
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<String>, ProvisionError> {
        let result = self
            .request("list_runtimes", json!({}))
            .await
            .map_err(|e| ProvisionError::ListFailed(e.to_string()))?;
        Ok(result
            .get("ids")
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
