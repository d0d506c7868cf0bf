// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn cli_beats_env_and_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "gateway_url = \"ws://from-file:1\"\n",
    )
    .unwrap();
    std::env::set_var("GAFFER_GATEWAY_URL", "ws://from-env:2");

    let config = Config::load(
        Some(dir.path().to_path_buf()),
        Some("ws://from-cli:3".to_string()),
    )
    .unwrap();
    assert_eq!(config.gateway_url, "ws://from-cli:3");

    std::env::remove_var("GAFFER_GATEWAY_URL");
}

#[test]
#[serial]
fn env_beats_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "gateway_url = \"ws://from-file:1\"\n",
    )
    .unwrap();
    std::env::set_var("GAFFER_GATEWAY_URL", "ws://from-env:2");

    let config = Config::load(Some(dir.path().to_path_buf()), None).unwrap();
    assert_eq!(config.gateway_url, "ws://from-env:2");

    std::env::remove_var("GAFFER_GATEWAY_URL");
}

#[test]
#[serial]
fn file_and_defaults_fill_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "gateway_url = \"ws://fleet:9\"\nlog_filter = \"debug\"\n",
    )
    .unwrap();

    let config = Config::load(Some(dir.path().to_path_buf()), None).unwrap();
    assert_eq!(config.gateway_url, "ws://fleet:9");
    assert_eq!(config.log_filter, "debug");
    assert_eq!(config.store_path(), dir.path().join("store.snap"));
    assert_eq!(config.lock_path(), dir.path().join("gfd.lock"));
}

#[test]
#[serial]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(Some(dir.path().to_path_buf()), None).unwrap();
    assert_eq!(config.gateway_url, "ws://127.0.0.1:9500");
    assert_eq!(config.log_filter, "info");
}

#[test]
#[serial]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "gatway_url = \"typo\"\n").unwrap();
    assert!(Config::load(Some(dir.path().to_path_buf()), None).is_err());
}
