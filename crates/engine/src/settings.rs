// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached, clamped projection of the persisted settings document.

use gf_core::{Clock, RuntimeSettings};
use gf_storage::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(10);

/// Serves [`RuntimeSettings`] with a 10-second cache.
///
/// Store errors fall back to the last projection (or defaults), so settings
/// reads never take a loop down.
pub struct SettingsProvider<C: Clock> {
    store: Arc<dyn Store>,
    clock: C,
    cached: Mutex<Option<CachedSettings>>,
}

struct CachedSettings {
    at: Instant,
    settings: RuntimeSettings,
}

impl<C: Clock> SettingsProvider<C> {
    pub fn new(store: Arc<dyn Store>, clock: C) -> Self {
        Self { store, clock, cached: Mutex::new(None) }
    }

    /// Current settings, refreshed from the store when the cache is stale.
    pub async fn get(&self) -> RuntimeSettings {
        let now = self.clock.now();
        if let Some(cached) = self.cached.lock().as_ref() {
            if now.duration_since(cached.at) < CACHE_TTL {
                return cached.settings.clone();
            }
        }

        match self.store.get_settings().await {
            Ok(doc) => {
                let settings = doc.clamped();
                *self.cached.lock() = Some(CachedSettings { at: now, settings: settings.clone() });
                settings
            }
            Err(e) => {
                tracing::warn!(error = %e, "settings read failed, serving last projection");
                let mut cached = self.cached.lock();
                match cached.as_mut() {
                    Some(entry) => {
                        // Refresh the stamp so a flapping store is retried on
                        // the cache cadence, not every call.
                        entry.at = now;
                        entry.settings.clone()
                    }
                    None => RuntimeSettings::default(),
                }
            }
        }
    }

    /// Drop the cache; the next `get` re-reads the store.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
