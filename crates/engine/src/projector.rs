// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory projection of structured events into per-run views.
//!
//! Each run gets a bounded timeline, thinking list, tool list, and a current
//! diff snapshot. Views hydrate lazily from the store and then track live
//! events. A per-run async mutex serializes hydration and reads against
//! applies; views for different runs proceed in parallel.

use crate::error::EngineError;
use gf_core::{RunId, StructuredEvent};
use gf_storage::Store;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const TIMELINE_CAP: usize = 1200;
const THINKING_CAP: usize = 400;
const TOOL_CAP: usize = 600;
const MESSAGE_CAP: usize = 360;
const HYDRATE_SCAN: usize = 4000;

/// One timeline row.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub sequence: u64,
    pub event_type: String,
    pub category: Option<String>,
    /// Truncated to 360 chars; summary, else error, else payload.
    pub message: String,
    pub timestamp_ms: i64,
}

/// One reasoning fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkingEntry {
    pub sequence: u64,
    pub text: String,
}

/// One tool invocation; upserted by `tool_call_id` when present.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEntry {
    pub sequence: u64,
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub message: String,
}

/// Latest diff reported by the run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffSnapshot {
    pub sequence: u64,
    pub patch: Option<String>,
    pub stat: Option<String>,
}

/// Read-only copy of a run's projection.
#[derive(Debug, Clone, Default)]
pub struct RunViewSnapshot {
    pub last_sequence: u64,
    pub timeline: Vec<TimelineEntry>,
    pub thinking: Vec<ThinkingEntry>,
    pub tools: Vec<ToolEntry>,
    pub diff: Option<DiffSnapshot>,
}

#[derive(Default)]
struct RunView {
    hydrated: bool,
    last_sequence: u64,
    timeline: VecDeque<TimelineEntry>,
    thinking: VecDeque<ThinkingEntry>,
    tools: VecDeque<ToolEntry>,
    diff: Option<DiffSnapshot>,
}

/// Projects structured events into bounded per-run views.
pub struct RunViewProjector {
    store: Arc<dyn Store>,
    views: Mutex<HashMap<RunId, Arc<tokio::sync::Mutex<RunView>>>>,
}

impl RunViewProjector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, views: Mutex::new(HashMap::new()) }
    }

    fn view_handle(&self, run: &RunId) -> Arc<tokio::sync::Mutex<RunView>> {
        let mut views = self.views.lock();
        Arc::clone(views.entry(run.clone()).or_default())
    }

    /// Apply one live event. Hydrates first so a freshly restarted process
    /// does not project a partial view.
    pub async fn apply(&self, event: &StructuredEvent) -> Result<(), EngineError> {
        let handle = self.view_handle(&event.run);
        let mut view = handle.lock().await;
        self.hydrate_locked(&event.run, &mut view).await?;
        apply_event(&mut view, event);
        Ok(())
    }

    /// Current snapshot of a run's view, hydrating on first use.
    pub async fn view(&self, run: &RunId) -> Result<RunViewSnapshot, EngineError> {
        let handle = self.view_handle(run);
        let mut view = handle.lock().await;
        self.hydrate_locked(run, &mut view).await?;
        Ok(RunViewSnapshot {
            last_sequence: view.last_sequence,
            timeline: view.timeline.iter().cloned().collect(),
            thinking: view.thinking.iter().cloned().collect(),
            tools: view.tools.iter().cloned().collect(),
            diff: view.diff.clone(),
        })
    }

    /// Drop a run's view (terminal runs, memory pressure).
    pub fn evict(&self, run: &RunId) {
        self.views.lock().remove(run);
    }

    async fn hydrate_locked(&self, run: &RunId, view: &mut RunView) -> Result<(), EngineError> {
        if view.hydrated {
            return Ok(());
        }
        view.hydrated = true;
        let events = self.store.list_structured_events(run, HYDRATE_SCAN).await?;
        for event in &events {
            apply_event(view, event);
        }
        Ok(())
    }
}

fn apply_event(view: &mut RunView, event: &StructuredEvent) {
    // Events arrive per-run-sequence-ordered; a sequence at or below the
    // watermark is a redelivery.
    if event.sequence <= view.last_sequence {
        return;
    }
    view.last_sequence = event.sequence;

    let payload = event.payload.as_ref();
    let payload_text = payload.map(|p| p.to_string());
    let message = first_text(&[
        event.summary.as_deref(),
        event.error.as_deref(),
        payload_text.as_deref(),
    ]);

    push_capped(
        &mut view.timeline,
        TimelineEntry {
            sequence: event.sequence,
            event_type: event.event_type.clone(),
            category: event.category.clone(),
            message: truncate(&message, MESSAGE_CAP),
            timestamp_ms: event.timestamp.timestamp_millis(),
        },
        TIMELINE_CAP,
    );

    let category = event.category.as_deref().unwrap_or("").to_ascii_lowercase();

    if let Some(text) = thinking_text(&category, payload) {
        push_capped(
            &mut view.thinking,
            ThinkingEntry { sequence: event.sequence, text: truncate(&text, MESSAGE_CAP) },
            THINKING_CAP,
        );
    }

    let tool_name = payload.and_then(|p| str_field(p, "toolName"));
    let tool_call_id = payload.and_then(|p| str_field(p, "toolCallId"));
    if category == "tool" || tool_name.is_some() || tool_call_id.is_some() {
        let entry = ToolEntry {
            sequence: event.sequence,
            tool_name: tool_name.unwrap_or_else(|| event.event_type.clone()),
            tool_call_id: tool_call_id.clone(),
            message: truncate(&message, MESSAGE_CAP),
        };
        let existing = tool_call_id.as_ref().and_then(|id| {
            view.tools.iter_mut().find(|t| t.tool_call_id.as_ref() == Some(id))
        });
        match existing {
            Some(slot) => *slot = entry,
            None => push_capped(&mut view.tools, entry, TOOL_CAP),
        }
    }

    let diff_patch = payload.and_then(|p| str_field(p, "diffPatch"));
    let diff_stat = payload.and_then(|p| str_field(p, "diffStat"));
    if category == "diff" || diff_patch.is_some() || diff_stat.is_some() {
        view.diff = Some(DiffSnapshot { sequence: event.sequence, patch: diff_patch, stat: diff_stat });
    }
}

fn thinking_text(category: &str, payload: Option<&serde_json::Value>) -> Option<String> {
    const KINDS: [&str; 3] = ["thinking", "reasoning", "analysis"];
    if KINDS.contains(&category) {
        return Some(
            payload
                .and_then(|p| KINDS.iter().find_map(|k| str_field(p, k)))
                .or_else(|| payload.and_then(|p| str_field(p, "text")))
                .unwrap_or_default(),
        );
    }
    payload.and_then(|p| KINDS.iter().find_map(|k| str_field(p, k)))
}

fn str_field(payload: &serde_json::Value, field: &str) -> Option<String> {
    payload.get(field).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string)
}

fn first_text(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn truncate(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

fn push_capped<T>(list: &mut VecDeque<T>, entry: T, cap: usize) {
    list.push_back(entry);
    while list.len() > cap {
        list.pop_front();
    }
}

#[cfg(test)]
#[path = "projector_tests.rs"]
mod tests;
