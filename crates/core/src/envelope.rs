// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The completion envelope a harness produces when a run finishes.

use crate::run::FailureClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON body of a `completed` worker event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CompletionEnvelope {
    /// Parse the payload of a `completed` event. Malformed payloads yield a
    /// default envelope, which reads as a failure with no detail.
    pub fn parse(payload_json: &str) -> Self {
        serde_json::from_str(payload_json).unwrap_or_default()
    }

    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }

    pub fn pr_url(&self) -> Option<&str> {
        self.metadata.get("prUrl").map(String::as_str).filter(|s| !s.is_empty())
    }
}

/// Keyword-based failure classification of a failed envelope.
///
/// A stopgap carried from the original system; richer classification is a
/// downstream concern.
pub fn classify_failure(envelope: &CompletionEnvelope) -> Option<FailureClass> {
    let text = format!("{} {}", envelope.summary, envelope.error).to_lowercase();
    if text.contains("envelope validation") {
        Some(FailureClass::EnvelopeValidation)
    } else if text.contains("timeout") || text.contains("cancelled") {
        Some(FailureClass::Timeout)
    } else {
        None
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
