// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-wide named mutual exclusion backed by the store.
//!
//! There is no refresh: holders reacquire before the TTL elapses. Release is
//! best-effort on guard drop and never raises; an unreleased lease simply
//! expires.

use crate::error::EngineError;
use gf_core::Clock;
use gf_storage::Store;
use std::sync::Arc;
use std::time::Duration;

/// Acquires named TTL leases on behalf of this process.
pub struct LeaseCoordinator<C: Clock> {
    store: Arc<dyn Store>,
    clock: C,
    /// Host name plus a random per-process id.
    owner: String,
}

impl<C: Clock> LeaseCoordinator<C> {
    pub fn new(store: Arc<dyn Store>, clock: C) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let owner = format!("{host}/{}", nanoid::nanoid!(8));
        Self { store, clock, owner }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try to acquire `name` for `ttl`. `None` means another live owner
    /// holds it.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseGuard>, EngineError> {
        let now_ms = self.clock.epoch_ms();
        let acquired = self
            .store
            .try_acquire_lease(name, &self.owner, ttl.as_millis() as u64, now_ms)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(LeaseGuard {
            store: Arc::clone(&self.store),
            name: name.to_string(),
            owner: self.owner.clone(),
        }))
    }
}

/// Holds a lease; dropping it releases best-effort.
pub struct LeaseGuard {
    store: Arc<dyn Store>,
    name: String,
    owner: String,
}

impl LeaseGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let store = Arc::clone(&self.store);
        let name = std::mem::take(&mut self.name);
        let owner = std::mem::take(&mut self.owner);
        // Outside a runtime (process teardown) the lease just expires.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = store.release_lease(&name, &owner).await;
            });
        }
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
