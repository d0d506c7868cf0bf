// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deduplicated fire-and-forget background work with progress snapshots.
//!
//! `enqueue` returns immediately with a work id; a single worker loop drains
//! the queue. Work deduped by operation key keeps the invariant of at most
//! one non-terminal item per key. Every snapshot mutation notifies the
//! registered update listeners (the notification relay among them).

use gf_core::{Clock, WorkId, WorkKind, WorkSnapshot, WorkState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Failure reported by background work.
#[derive(Debug, Clone)]
pub struct WorkError {
    pub code: Option<String>,
    pub message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into() }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: Some(code.into()), message: message.into() }
    }
}

type WorkFuture = Pin<Box<dyn Future<Output = Result<(), WorkError>> + Send>>;
type WorkFn = Box<dyn FnOnce(CancellationToken, ProgressHandle) -> WorkFuture + Send>;
type UpdateListener = Box<dyn Fn(&WorkSnapshot) + Send + Sync>;

struct QueuedWork {
    id: WorkId,
    work: WorkFn,
}

struct CoordState {
    snapshots: HashMap<WorkId, WorkSnapshot>,
    cancels: HashMap<WorkId, CancellationToken>,
    /// operation key → the one non-terminal deduped item under it.
    dedup: HashMap<String, WorkId>,
}

struct Shared {
    state: Mutex<CoordState>,
    listeners: Mutex<Vec<UpdateListener>>,
    now_ms: Box<dyn Fn() -> u64 + Send + Sync>,
    fatal: CancellationToken,
    fatal_reason: Mutex<Option<String>>,
}

impl Shared {
    /// Mutate a snapshot and notify listeners with the result.
    fn update(&self, id: &WorkId, f: impl FnOnce(&mut WorkSnapshot)) {
        let updated = {
            let mut state = self.state.lock();
            let Some(snapshot) = state.snapshots.get_mut(id) else { return };
            f(snapshot);
            snapshot.updated_at_ms = (self.now_ms)();
            let updated = snapshot.clone();
            if updated.is_terminal() {
                state.cancels.remove(id);
                if state.dedup.get(&updated.operation_key) == Some(id) {
                    state.dedup.remove(&updated.operation_key);
                }
            }
            updated
        };
        for listener in self.listeners.lock().iter() {
            listener(&updated);
        }
    }
}

/// Reports progress from inside running work.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<Shared>,
    id: WorkId,
}

impl ProgressHandle {
    pub fn report(&self, percent: Option<u8>, message: impl Into<String>) {
        let message = message.into();
        self.shared.update(&self.id, |s| {
            if percent.is_some() {
                s.percent = percent.map(|p| p.min(100));
            }
            s.message = Some(message);
        });
    }
}

/// Dedup + single-consumer async-job facility.
pub struct BackgroundCoordinator {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<QueuedWork>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedWork>>>,
}

impl BackgroundCoordinator {
    pub fn new<C: Clock>(clock: C) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordState {
                    snapshots: HashMap::new(),
                    cancels: HashMap::new(),
                    dedup: HashMap::new(),
                }),
                listeners: Mutex::new(Vec::new()),
                now_ms: Box::new(move || clock.epoch_ms()),
                fatal: CancellationToken::new(),
                fatal_reason: Mutex::new(None),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Register an update listener fired on every snapshot mutation.
    pub fn on_update(&self, listener: impl Fn(&WorkSnapshot) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Box::new(listener));
    }

    /// Queue background work. With `dedupe_by_operation_key`, an existing
    /// non-terminal item under `operation_key` short-circuits and its id is
    /// returned instead.
    pub fn enqueue<F, Fut>(
        &self,
        kind: WorkKind,
        operation_key: impl Into<String>,
        work: F,
        dedupe_by_operation_key: bool,
        is_critical: bool,
    ) -> WorkId
    where
        F: FnOnce(CancellationToken, ProgressHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let operation_key = operation_key.into();
        let now = (self.shared.now_ms)();

        let snapshot = {
            let mut state = self.shared.state.lock();
            if dedupe_by_operation_key {
                if let Some(existing) = state.dedup.get(&operation_key) {
                    if state
                        .snapshots
                        .get(existing)
                        .is_some_and(|s| !s.is_terminal())
                    {
                        return existing.clone();
                    }
                }
            }

            let id = WorkId::fresh();
            let snapshot = WorkSnapshot {
                id: id.clone(),
                kind,
                operation_key: operation_key.clone(),
                state: WorkState::Pending,
                percent: None,
                message: None,
                started_at_ms: now,
                updated_at_ms: now,
                error_code: None,
                error_message: None,
                critical: is_critical,
            };
            state.snapshots.insert(id.clone(), snapshot.clone());
            if dedupe_by_operation_key {
                state.dedup.insert(operation_key, id.clone());
            }
            snapshot
        };

        let id = snapshot.id.clone();
        for listener in self.shared.listeners.lock().iter() {
            listener(&snapshot);
        }

        let boxed: WorkFn = Box::new(move |token, progress| Box::pin(work(token, progress)));
        // The worker loop owns the receiver; a closed channel means the
        // process is past the point of running new work.
        let _ = self.tx.send(QueuedWork { id: id.clone(), work: boxed });
        id
    }

    /// Request cancellation of one work item.
    pub fn cancel(&self, id: &WorkId) {
        let token = self.shared.state.lock().cancels.get(id).cloned();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Stable read-only copy of every snapshot.
    pub fn snapshot(&self) -> Vec<WorkSnapshot> {
        let mut all: Vec<WorkSnapshot> =
            self.shared.state.lock().snapshots.values().cloned().collect();
        all.sort_by_key(|s| (s.started_at_ms, s.id.clone()));
        all
    }

    pub fn try_get(&self, id: &WorkId) -> Option<WorkSnapshot> {
        self.shared.state.lock().snapshots.get(id).cloned()
    }

    /// Trips when critical work fails; the daemon treats it as fatal.
    pub fn fatal_token(&self) -> CancellationToken {
        self.shared.fatal.clone()
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.shared.fatal_reason.lock().clone()
    }

    /// Drain the queue until `shutdown` trips. Single consumer: items run
    /// one at a time in enqueue order.
    pub async fn run_worker(&self, shutdown: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("background worker already running");
            return;
        };

        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let job_token = shutdown.child_token();
            self.shared.state.lock().cancels.insert(item.id.clone(), job_token.clone());

            self.shared.update(&item.id, |s| s.state = WorkState::Running);
            let progress = ProgressHandle { shared: Arc::clone(&self.shared), id: item.id.clone() };

            let result = (item.work)(job_token.clone(), progress).await;

            let cancelled = job_token.is_cancelled();
            let mut critical_failure = None;
            self.shared.update(&item.id, |s| match &result {
                Ok(()) => s.state = WorkState::Succeeded,
                Err(_) if cancelled => s.state = WorkState::Cancelled,
                Err(e) => {
                    s.state = WorkState::Failed;
                    s.error_code = e.code.clone();
                    s.error_message = Some(e.message.clone());
                    if s.critical {
                        critical_failure = Some(e.message.clone());
                    }
                }
            });

            if let Some(reason) = critical_failure {
                tracing::error!(work = %item.id, reason = %reason, "critical background work failed");
                *self.shared.fatal_reason.lock() = Some(reason);
                self.shared.fatal.cancel();
            }
        }
    }
}

#[cfg(test)]
#[path = "background_tests.rs"]
mod tests;
