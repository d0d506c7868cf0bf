// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-event ingest and run-completion projection.
//!
//! One long-lived subscription to the fleet event stream. Log chunks are
//! published but never persisted; structured events are appended idempotently
//! and projected; `completed` events close runs, clean up proxy routes,
//! create findings, and schedule retries under the task's retry policy.
//! Dropped streams reconnect after a short backoff; a tripped shutdown token
//! ends the loop without an error.

use crate::dispatch::RunDispatcher;
use crate::error::EngineError;
use crate::projector::RunViewProjector;
use crate::publisher::StatusPublisher;
use crate::routes::RouteTable;
use gf_adapters::{WorkerRpc, WorkerStreamEvent};
use gf_core::{
    classify_failure, Clock, CompletionEnvelope, Finding, FindingId, Run, RunState, StatusEvent,
    StructuredEvent,
};
use gf_storage::{RunCompletion, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay before resubscribing after a dropped stream.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

pub struct WorkerEventListener<C: Clock> {
    store: Arc<dyn Store>,
    rpc: Arc<dyn WorkerRpc>,
    dispatcher: Arc<RunDispatcher<C>>,
    projector: Arc<RunViewProjector>,
    publisher: StatusPublisher,
    routes: Arc<RouteTable>,
    clock: C,
}

impl<C: Clock> WorkerEventListener<C> {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn WorkerRpc>,
        dispatcher: Arc<RunDispatcher<C>>,
        projector: Arc<RunViewProjector>,
        publisher: StatusPublisher,
        routes: Arc<RouteTable>,
        clock: C,
    ) -> Self {
        Self { store, rpc, dispatcher, projector, publisher, routes, clock }
    }

    /// Consume the event stream until `shutdown` trips, resubscribing on
    /// disconnect.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            match self.rpc.subscribe_events().await {
                Ok(mut stream) => {
                    tracing::info!("worker event stream connected");
                    loop {
                        let event = tokio::select! {
                            _ = shutdown.cancelled() => return,
                            event = stream.recv() => match event {
                                Some(event) => event,
                                None => break,
                            },
                        };
                        if let Err(e) = self.handle_event(event, &shutdown).await {
                            tracing::warn!(error = %e, "worker event handling failed");
                        }
                    }
                    tracing::warn!("worker event stream dropped, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "worker event subscribe failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    /// Process one stream message.
    pub async fn handle_event(
        &self,
        event: WorkerStreamEvent,
        shutdown: &CancellationToken,
    ) -> Result<(), EngineError> {
        match event.kind.as_str() {
            // Chunked log output is fan-out only, never persisted.
            "log_chunk" => {
                self.publisher.publish(StatusEvent::RunLogChunk {
                    run: event.run,
                    message: event.message,
                    timestamp_ms: event.timestamp_ms,
                });
                Ok(())
            }
            "completed" => self.handle_completed(event, shutdown).await,
            _ => self.persist_run_event(event).await,
        }
    }

    async fn persist_run_event(&self, event: WorkerStreamEvent) -> Result<(), EngineError> {
        let payload: Option<serde_json::Value> =
            event.payload_json.as_deref().and_then(|raw| serde_json::from_str(raw).ok());
        let category = payload
            .as_ref()
            .and_then(|p| p.get("category"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let sequence = self.store.next_event_sequence(&event.run).await?;
        let structured = StructuredEvent {
            run: event.run.clone(),
            sequence,
            event_type: event.kind.clone(),
            category,
            payload,
            schema_version: 1,
            summary: (!event.message.is_empty()).then(|| event.message.clone()),
            error: None,
            timestamp: self.clock.now_utc(),
        };
        self.store.append_structured_event(structured.clone()).await?;
        self.projector.apply(&structured).await?;

        self.publisher.publish(StatusEvent::RunLog {
            run: event.run,
            kind: event.kind,
            message: event.message,
            timestamp_ms: event.timestamp_ms,
        });
        Ok(())
    }

    async fn handle_completed(
        &self,
        event: WorkerStreamEvent,
        shutdown: &CancellationToken,
    ) -> Result<(), EngineError> {
        let payload_raw = event.payload_json.as_deref().unwrap_or("{}");
        let envelope = CompletionEnvelope::parse(payload_raw);
        let succeeded = envelope.succeeded();
        let failure_class = if succeeded { None } else { classify_failure(&envelope) };
        let summary = if envelope.summary.is_empty() {
            (!event.message.is_empty()).then(|| event.message.clone())
        } else {
            Some(envelope.summary.clone())
        };
        let output: Option<serde_json::Value> = serde_json::from_str(payload_raw).ok();

        let completion = RunCompletion {
            succeeded,
            summary: summary.clone(),
            output,
            failure_class,
            pr_url: envelope.pr_url().map(str::to_string),
            ended_at: self.clock.now_utc(),
        };
        match self.store.mark_completed(&event.run, completion).await {
            Ok(()) => {}
            // At-least-once stream: a replayed completion is a no-op.
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(run = %event.run, "duplicate completion ignored");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.routes.remove(&event.run);

        let state = if succeeded { RunState::Succeeded } else { RunState::Failed };
        self.publisher.publish(StatusEvent::RunStatus {
            run: event.run.clone(),
            state,
            summary: summary.clone(),
        });
        tracing::info!(run = %event.run, state = %state, "run completed");

        if succeeded {
            return Ok(());
        }

        let run = self.store.get_run(&event.run).await?;
        let task = self.store.get_task(&run.task).await?;

        self.store
            .create_finding(Finding {
                id: FindingId::fresh(),
                run: run.id.clone(),
                task: task.id.clone(),
                summary: summary.unwrap_or_else(|| "run failed".to_string()),
                failure_class,
                created_at: self.clock.now_utc(),
            })
            .await?;

        if run.attempt < task.retry.max_attempts {
            self.schedule_retry(&run, shutdown).await?;
        } else {
            tracing::info!(run = %run.id, attempt = run.attempt, "retry attempts exhausted");
        }
        Ok(())
    }

    /// Wait out the backoff, then dispatch a fresh attempt as a new run.
    async fn schedule_retry(
        &self,
        failed: &Run,
        shutdown: &CancellationToken,
    ) -> Result<(), EngineError> {
        let task = self.store.get_task(&failed.task).await?;
        let repo = self.store.get_repository(&failed.repo).await?;
        let backoff = task.retry.backoff_for(failed.attempt);
        let next_attempt = failed.attempt + 1;
        tracing::info!(
            run = %failed.id,
            attempt = failed.attempt,
            next_attempt,
            backoff_secs = backoff.as_secs(),
            "scheduling retry"
        );

        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let clock = self.clock.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            let run = Run::new(task.id.clone(), repo.id.clone(), next_attempt, clock.now_utc());
            if let Err(e) = store.create_run(run.clone()).await {
                tracing::warn!(task = %task.id, error = %e, "retry run creation failed");
                return;
            }
            if let Err(e) = dispatcher.dispatch(&repo, &task, &run).await {
                tracing::warn!(run = %run.id, error = %e, "retry dispatch failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
