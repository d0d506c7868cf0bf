// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status-event fan-out and the background-work notification relay.

use gf_core::{Clock, StatusEvent, WorkId, WorkSnapshot, WorkState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Minimum gap between non-state-change publishes for one work item.
const RELAY_THROTTLE: Duration = Duration::from_secs(15);

/// Fan-out publisher for [`StatusEvent`]s.
///
/// `publish` enqueues without blocking; a background task delivers to every
/// subscriber. Subscribers whose channel closed are pruned on the next
/// delivery. Subscribers must be idempotent: the rest of the system may
/// publish the same status more than once.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: mpsc::UnboundedSender<StatusEvent>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<StatusEvent>>>>,
}

impl StatusPublisher {
    /// Create the publisher and spawn its delivery task. The task ends when
    /// every publisher handle is dropped.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
        let subscribers: Arc<Mutex<Vec<mpsc::Sender<StatusEvent>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let delivery_subs = Arc::clone(&subscribers);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let subs = delivery_subs.lock().clone();
                let mut dead = Vec::new();
                for (i, sub) in subs.iter().enumerate() {
                    if sub.send(event.clone()).await.is_err() {
                        dead.push(i);
                    }
                }
                if !dead.is_empty() {
                    let mut subs = delivery_subs.lock();
                    // Closed receivers may have been re-indexed by a
                    // concurrent subscribe; retain by liveness instead.
                    subs.retain(|s| !s.is_closed());
                }
            }
        });

        Self { tx, subscribers }
    }

    /// Register a subscriber; returns its receiving end.
    pub fn subscribe(&self) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Queue an event for delivery. Never blocks; delivery failure only
    /// means every subscriber is gone.
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Republishes background-work snapshots with per-work throttling.
///
/// State changes always go out. Progress-bucket (10 %) or message changes go
/// out at most once per 15 s per work id. Anything else is dropped.
pub struct WorkRelay<C: Clock> {
    publisher: StatusPublisher,
    clock: C,
    seen: Mutex<HashMap<WorkId, RelaySeen>>,
}

struct RelaySeen {
    last_publish: Instant,
    state: WorkState,
    bucket: Option<u8>,
    message: Option<String>,
}

impl<C: Clock> WorkRelay<C> {
    pub fn new(publisher: StatusPublisher, clock: C) -> Self {
        Self { publisher, clock, seen: Mutex::new(HashMap::new()) }
    }

    /// Observe an updated snapshot and publish if it clears the policy.
    pub fn observe(&self, snapshot: &WorkSnapshot) {
        let now = self.clock.now();
        let mut seen = self.seen.lock();

        let publish = match seen.get(&snapshot.id) {
            None => true,
            Some(prev) if prev.state != snapshot.state => true,
            Some(prev) => {
                let changed = prev.bucket != snapshot.progress_bucket()
                    || prev.message != snapshot.message;
                changed && now.duration_since(prev.last_publish) >= RELAY_THROTTLE
            }
        };

        if !publish {
            return;
        }

        seen.insert(
            snapshot.id.clone(),
            RelaySeen {
                last_publish: now,
                state: snapshot.state,
                bucket: snapshot.progress_bucket(),
                message: snapshot.message.clone(),
            },
        );
        // Terminal items will not update again; drop their relay state.
        if snapshot.is_terminal() {
            seen.remove(&snapshot.id);
        }
        drop(seen);

        self.publisher.publish(StatusEvent::WorkUpdated { snapshot: snapshot.clone() });
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
