// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics recorder seam.
//!
//! Components take a recorder explicitly; the no-op impl is always an
//! acceptable wiring choice.

/// Counter/gauge sink for orchestration metrics.
pub trait MetricsRecorder: Send + Sync + 'static {
    fn incr_counter(&self, name: &'static str, value: u64);
    fn set_gauge(&self, name: &'static str, value: f64);
}

/// Discards every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _value: u64) {}
    fn set_gauge(&self, _name: &'static str, _value: f64) {}
}
