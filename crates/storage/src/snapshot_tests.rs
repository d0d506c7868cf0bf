// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_core::{Run, RunId};

#[test]
fn missing_snapshot_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");
    assert!(load_snapshot(&path).unwrap().is_none());
}

#[test]
fn save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");

    let mut state = Collections::default();
    let run = Run::builder().build();
    state.runs.insert(run.id.clone(), run);

    save_snapshot(&path, &state).unwrap();
    let loaded = load_snapshot(&path).unwrap().unwrap();
    assert!(loaded.runs.contains_key(&RunId::from_string("run-test")));
}

#[test]
fn rewrites_rotate_backups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");

    for i in 0..5u64 {
        let mut state = Collections::default();
        let id = RunId::from_string(format!("run-{i}"));
        state.runs.insert(id.clone(), Run::builder().id(id).build());
        save_snapshot(&path, &state).unwrap();
    }

    assert!(path.exists());
    assert!(path.with_extension("bak").exists());
    assert!(path.with_extension("bak.2").exists());
    assert!(path.with_extension("bak.3").exists());
    assert!(!path.with_extension("bak.4").exists());

    // Latest snapshot wins; the .bak holds the previous write.
    let latest = load_snapshot(&path).unwrap().unwrap();
    assert!(latest.runs.contains_key("run-4"));
    let prev = load_snapshot(&path.with_extension("bak")).unwrap().unwrap();
    assert!(prev.runs.contains_key("run-3"));
}
