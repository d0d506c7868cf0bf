// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime settings: the persisted document and its clamped projection.

use serde::{Deserialize, Serialize};

/// The settings document as persisted. Every field is optional; missing or
/// out-of-range values fall back to defaults when projected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SettingsDoc {
    pub scheduler_interval_seconds: Option<i64>,
    pub max_global_concurrent_runs: Option<i64>,
    pub per_project_concurrency_limit: Option<i64>,
    pub per_repo_concurrency_limit: Option<i64>,

    pub min_workers: Option<i64>,
    pub max_workers: Option<i64>,
    pub reserve_workers: Option<i64>,
    pub max_queue_depth: Option<i64>,
    pub queue_wait_timeout_seconds: Option<i64>,
    pub worker_image_policy: Option<String>,
    pub image_registry: Option<String>,
    pub canary_image: Option<String>,
    pub canary_percent: Option<i64>,
    pub max_concurrent_pulls: Option<i64>,
    pub max_concurrent_builds: Option<i64>,
    pub image_pull_timeout_seconds: Option<i64>,
    pub image_build_timeout_seconds: Option<i64>,
    pub image_cache_ttl_minutes: Option<i64>,
    pub max_worker_start_attempts_per_10min: Option<i64>,
    pub max_failed_starts_per_10min: Option<i64>,
    pub cooldown_minutes: Option<i64>,
    pub container_start_timeout_seconds: Option<i64>,
    pub container_stop_timeout_seconds: Option<i64>,
    pub health_probe_interval_seconds: Option<i64>,
    pub container_restart_limit: Option<i64>,
    pub unhealthy_action: Option<String>,
    pub drain_on_shutdown: Option<bool>,
    pub recycle_after_runs: Option<i64>,
    pub recycle_after_uptime_minutes: Option<i64>,
    pub worker_cpu_limit: Option<f64>,
    pub worker_memory_mb: Option<i64>,
    pub worker_pids_limit: Option<i64>,
    pub worker_fd_limit: Option<i64>,
    pub run_hard_timeout_seconds: Option<i64>,
    pub max_run_log_mb: Option<i64>,
    pub pressure_scaling_enabled: Option<bool>,
    pub pressure_cpu_threshold_percent: Option<f64>,
    pub pressure_memory_threshold_percent: Option<f64>,

    pub enable_auto_termination: Option<bool>,
    pub check_interval_seconds: Option<i64>,
    pub stale_run_threshold_minutes: Option<i64>,
    pub zombie_run_threshold_minutes: Option<i64>,
    pub max_run_age_hours: Option<i64>,
    pub force_kill_on_timeout: Option<bool>,
}

/// Immutable, clamped projection of [`SettingsDoc`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub scheduler_interval_seconds: u64,
    pub max_global_concurrent_runs: u32,
    pub per_project_concurrency_limit: u32,
    pub per_repo_concurrency_limit: u32,

    pub min_workers: u32,
    pub max_workers: u32,
    pub reserve_workers: u32,
    pub max_queue_depth: u32,
    pub queue_wait_timeout_seconds: u64,
    pub worker_image_policy: String,
    pub image_registry: Option<String>,
    pub canary_image: Option<String>,
    pub canary_percent: u8,
    pub max_concurrent_pulls: u32,
    pub max_concurrent_builds: u32,
    pub image_pull_timeout_seconds: u64,
    pub image_build_timeout_seconds: u64,
    pub image_cache_ttl_minutes: u64,
    pub max_worker_start_attempts_per_10min: u32,
    pub max_failed_starts_per_10min: u32,
    pub cooldown_minutes: u64,
    pub container_start_timeout_seconds: u64,
    pub container_stop_timeout_seconds: u64,
    pub health_probe_interval_seconds: u64,
    pub container_restart_limit: u32,
    pub unhealthy_action: String,
    pub drain_on_shutdown: bool,
    /// 0 disables run-count recycling.
    pub recycle_after_runs: u64,
    /// 0 disables uptime recycling.
    pub recycle_after_uptime_minutes: u64,
    pub worker_cpu_limit: f64,
    pub worker_memory_mb: u64,
    pub worker_pids_limit: u64,
    pub worker_fd_limit: u64,
    pub run_hard_timeout_seconds: u64,
    pub max_run_log_mb: u64,
    pub pressure_scaling_enabled: bool,
    pub pressure_cpu_threshold_percent: f64,
    pub pressure_memory_threshold_percent: f64,

    pub enable_auto_termination: bool,
    pub check_interval_seconds: u64,
    pub stale_run_threshold_minutes: u64,
    pub zombie_run_threshold_minutes: u64,
    pub max_run_age_hours: u64,
    pub force_kill_on_timeout: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        SettingsDoc::default().clamped()
    }
}

/// Positive value or `default` when unset/≤ 0.
fn pos_or(v: Option<i64>, default: u64) -> u64 {
    match v {
        Some(n) if n > 0 => n as u64,
        _ => default,
    }
}

/// Value clamped into `[min, max]`, or `default` when unset/≤ 0.
fn clamp_or(v: Option<i64>, default: u64, min: u64, max: u64) -> u64 {
    match v {
        Some(n) if n > 0 => (n as u64).clamp(min, max),
        _ => default,
    }
}

impl SettingsDoc {
    /// Project into [`RuntimeSettings`], applying the documented ranges.
    pub fn clamped(&self) -> RuntimeSettings {
        RuntimeSettings {
            // Floor of 2 seconds regardless of configuration.
            scheduler_interval_seconds: pos_or(self.scheduler_interval_seconds, 20).max(2),
            max_global_concurrent_runs: pos_or(self.max_global_concurrent_runs, 16) as u32,
            per_project_concurrency_limit: pos_or(self.per_project_concurrency_limit, 8) as u32,
            per_repo_concurrency_limit: pos_or(self.per_repo_concurrency_limit, 4) as u32,

            min_workers: pos_or(self.min_workers, 1) as u32,
            max_workers: clamp_or(self.max_workers, 8, 1, 256) as u32,
            reserve_workers: self
                .reserve_workers
                .map(|n| n.clamp(0, 128) as u32)
                .unwrap_or(0),
            max_queue_depth: clamp_or(self.max_queue_depth, 1000, 1, 50_000) as u32,
            queue_wait_timeout_seconds: clamp_or(self.queue_wait_timeout_seconds, 600, 5, 7200),
            worker_image_policy: self
                .worker_image_policy
                .clone()
                .unwrap_or_else(|| "pull".to_string()),
            image_registry: self.image_registry.clone().filter(|s| !s.is_empty()),
            canary_image: self.canary_image.clone().filter(|s| !s.is_empty()),
            canary_percent: self.canary_percent.map(|n| n.clamp(0, 100) as u8).unwrap_or(0),
            max_concurrent_pulls: pos_or(self.max_concurrent_pulls, 2) as u32,
            max_concurrent_builds: pos_or(self.max_concurrent_builds, 1) as u32,
            image_pull_timeout_seconds: pos_or(self.image_pull_timeout_seconds, 600),
            image_build_timeout_seconds: pos_or(self.image_build_timeout_seconds, 1800),
            image_cache_ttl_minutes: pos_or(self.image_cache_ttl_minutes, 240),
            max_worker_start_attempts_per_10min: pos_or(
                self.max_worker_start_attempts_per_10min,
                20,
            ) as u32,
            max_failed_starts_per_10min: pos_or(self.max_failed_starts_per_10min, 5) as u32,
            cooldown_minutes: pos_or(self.cooldown_minutes, 10),
            container_start_timeout_seconds: pos_or(self.container_start_timeout_seconds, 120),
            container_stop_timeout_seconds: pos_or(self.container_stop_timeout_seconds, 30),
            health_probe_interval_seconds: pos_or(self.health_probe_interval_seconds, 30),
            container_restart_limit: pos_or(self.container_restart_limit, 3) as u32,
            unhealthy_action: self
                .unhealthy_action
                .clone()
                .unwrap_or_else(|| "recycle".to_string()),
            drain_on_shutdown: self.drain_on_shutdown.unwrap_or(true),
            recycle_after_runs: self.recycle_after_runs.map(|n| n.max(0) as u64).unwrap_or(0),
            recycle_after_uptime_minutes: self
                .recycle_after_uptime_minutes
                .map(|n| n.max(0) as u64)
                .unwrap_or(0),
            worker_cpu_limit: match self.worker_cpu_limit {
                Some(v) if v > 0.0 => v,
                _ => 2.0,
            },
            worker_memory_mb: pos_or(self.worker_memory_mb, 4096),
            worker_pids_limit: pos_or(self.worker_pids_limit, 1024),
            worker_fd_limit: pos_or(self.worker_fd_limit, 4096),
            run_hard_timeout_seconds: clamp_or(self.run_hard_timeout_seconds, 7200, 30, 86_400),
            max_run_log_mb: pos_or(self.max_run_log_mb, 64),
            pressure_scaling_enabled: self.pressure_scaling_enabled.unwrap_or(false),
            pressure_cpu_threshold_percent: match self.pressure_cpu_threshold_percent {
                Some(v) if v > 0.0 => v.min(100.0),
                _ => 80.0,
            },
            pressure_memory_threshold_percent: match self.pressure_memory_threshold_percent {
                Some(v) if v > 0.0 => v.min(100.0),
                _ => 85.0,
            },

            enable_auto_termination: self.enable_auto_termination.unwrap_or(true),
            check_interval_seconds: pos_or(self.check_interval_seconds, 60),
            stale_run_threshold_minutes: pos_or(self.stale_run_threshold_minutes, 30),
            zombie_run_threshold_minutes: pos_or(self.zombie_run_threshold_minutes, 120),
            max_run_age_hours: pos_or(self.max_run_age_hours, 12),
            force_kill_on_timeout: self.force_kill_on_timeout.unwrap_or(true),
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
