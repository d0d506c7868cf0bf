// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Precedence: CLI flags, then environment (`GAFFER_STATE_DIR`,
//! `GAFFER_GATEWAY_URL`), then `config.toml` in the state directory, then
//! defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional keys in `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    gateway_url: Option<String>,
    log_filter: Option<String>,
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub gateway_url: String,
    pub log_filter: String,
}

impl Config {
    pub fn load(
        cli_state_dir: Option<PathBuf>,
        cli_gateway_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let state_dir = cli_state_dir
            .or_else(|| std::env::var_os("GAFFER_STATE_DIR").map(PathBuf::from))
            .unwrap_or_else(default_state_dir);

        let file = read_config_file(&state_dir.join("config.toml"))?;

        let gateway_url = cli_gateway_url
            .or_else(|| std::env::var("GAFFER_GATEWAY_URL").ok())
            .or(file.gateway_url)
            .unwrap_or_else(|| "ws://127.0.0.1:9500".to_string());

        let log_filter = file.log_filter.unwrap_or_else(|| "info".to_string());

        Ok(Self { state_dir, gateway_url, log_filter })
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join("store.snap")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("gfd.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir().map(|d| d.join("gaffer")).unwrap_or_else(|| PathBuf::from(".gaffer"))
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(source) => Err(ConfigError::Read { path: path.to_path_buf(), source }),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
