// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for the JSON store.
//!
//! The full collection state is written as zstd-compressed JSON. Writes go
//! through a temp file and rename; the previous snapshot rotates into
//! `.bak`/`.bak.N` so a torn write never loses the last good state.

use crate::state::Collections;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;
const MAX_BAK_FILES: u32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    Version(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(rename = "v")]
    version: u32,
    state: Collections,
}

/// Load the snapshot at `path`, or `None` when no snapshot exists yet.
pub fn load_snapshot(path: &Path) -> Result<Option<Collections>, SnapshotError> {
    let compressed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let raw = zstd::decode_all(compressed.as_slice())?;
    let snapshot: Snapshot = serde_json::from_slice(&raw)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version(snapshot.version));
    }
    Ok(Some(snapshot.state))
}

/// Write `state` to `path` atomically, rotating the previous file into a
/// backup slot.
pub fn save_snapshot(path: &Path, state: &Collections) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let snapshot = Snapshot { version: SNAPSHOT_VERSION, state: state.clone() };
    let raw = serde_json::to_vec(&snapshot)?;
    let compressed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &compressed)?;

    if path.exists() {
        let _ = fs::rename(path, rotate_bak_path(path));
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups. The oldest is removed when the
/// limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
