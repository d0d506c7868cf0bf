// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run → worker-endpoint proxy routes.
//!
//! The dispatcher registers a route when a run is placed; the event listener
//! removes it when the run completes. Out-of-scope surfaces (attach, log
//! streaming) read from here.

use gf_core::RunId;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct RouteTable {
    routes: Mutex<HashMap<RunId, String>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run: RunId, endpoint: impl Into<String>) {
        self.routes.lock().insert(run, endpoint.into());
    }

    pub fn remove(&self, run: &RunId) -> Option<String> {
        self.routes.lock().remove(run)
    }

    pub fn lookup(&self, run: &RunId) -> Option<String> {
        self.routes.lock().get(run).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }
}
