// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merges per-lane unified diffs from parallel agent runs into one patch.
//!
//! Files touched by a single lane pass through untouched. Files touched by
//! several lanes merge only when every lane agrees on path metadata and no
//! two lanes' hunks cover intersecting new-file line ranges; otherwise the
//! file surfaces as a conflict record, never an error.

use gf_core::diff::{diff_stat_line, parse_patch, DiffFile, LaneDiff, MergeConflict, MergeOutcome};
use std::collections::BTreeMap;

/// Merge `lanes` into a single patch with conflict detection.
///
/// The outcome is independent of lane ordering: merged files and conflicts
/// come out sorted by path, and hunks within a merged file by
/// `(new_start, header)`.
pub fn merge_lane_diffs(lanes: &[LaneDiff]) -> MergeOutcome {
    // Group parsed files across lanes by case-insensitive path.
    let mut by_path: BTreeMap<String, Vec<(usize, DiffFile)>> = BTreeMap::new();
    for (lane_idx, lane) in lanes.iter().enumerate() {
        for file in parse_patch(&lane.diff_patch) {
            by_path
                .entry(file.path().to_lowercase())
                .or_default()
                .push((lane_idx, file));
        }
    }

    let mut outcome = MergeOutcome::default();
    let mut patch = String::new();

    for (_, mut entries) in by_path {
        // Deterministic order regardless of input lane permutation.
        entries.sort_by(|(_, a), (_, b)| {
            (&a.old_path, &a.new_path, &a.patch).cmp(&(&b.old_path, &b.new_path, &b.patch))
        });

        if entries.len() == 1 {
            let (_, file) = &entries[0];
            outcome.merged_files.push(file.path().to_string());
            outcome.additions += file.additions;
            outcome.deletions += file.deletions;
            patch.push_str(&file.patch);
            continue;
        }

        match merge_file(&entries) {
            Ok(merged) => {
                outcome.merged_files.push(merged.path);
                outcome.additions += merged.additions;
                outcome.deletions += merged.deletions;
                patch.push_str(&merged.patch);
            }
            Err(conflict) => outcome.conflicts.push(conflict),
        }
    }

    outcome.merged_files.sort();
    outcome.conflicts.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    outcome.merged_patch = patch;
    outcome.diff_stat =
        diff_stat_line(outcome.merged_files.len() as u64, outcome.additions, outcome.deletions);
    outcome
}

struct MergedFile {
    path: String,
    patch: String,
    additions: u64,
    deletions: u64,
}

fn merge_file(entries: &[(usize, DiffFile)]) -> Result<MergedFile, MergeConflict> {
    let display_path = entries[0].1.path().to_string();

    // A lane that only changed metadata has nothing to interleave.
    if entries.iter().any(|(_, f)| f.is_metadata_only()) {
        return Err(MergeConflict {
            file_path: display_path,
            reason: "unable to merge metadata-only patch".to_string(),
            hunk_headers: Vec::new(),
        });
    }

    // Path metadata must agree exactly across lanes.
    let (ref_old, ref_new) = (&entries[0].1.old_path, &entries[0].1.new_path);
    if entries.iter().any(|(_, f)| &f.old_path != ref_old || &f.new_path != ref_new) {
        return Err(MergeConflict {
            file_path: display_path,
            reason: "incompatible path metadata".to_string(),
            hunk_headers: Vec::new(),
        });
    }

    // Any cross-lane pair of hunks with intersecting new-line ranges is a
    // conflict. Collect every offending header so the record is stable under
    // lane permutation.
    let mut offending = Vec::new();
    for (i, (lane_a, file_a)) in entries.iter().enumerate() {
        for (lane_b, file_b) in entries.iter().skip(i + 1) {
            if lane_a == lane_b {
                continue;
            }
            for ha in &file_a.hunks {
                for hb in &file_b.hunks {
                    if ha.overlaps(hb) {
                        offending.push(ha.header.clone());
                        offending.push(hb.header.clone());
                    }
                }
            }
        }
    }
    if !offending.is_empty() {
        offending.sort();
        offending.dedup();
        return Err(MergeConflict {
            file_path: display_path,
            reason: "overlapping hunks".to_string(),
            hunk_headers: offending,
        });
    }

    // Extract each lane's hunk blocks from its patch text and re-emit them
    // ordered by (new_start, header) under a synthesized file header.
    let mut blocks: Vec<(u64, String, String)> = Vec::new();
    let mut additions = 0;
    let mut deletions = 0;
    for (_, file) in entries {
        let extracted = extract_hunk_blocks(&file.patch);
        if extracted.len() != file.hunks.len() {
            return Err(MergeConflict {
                file_path: display_path,
                reason: "failed to compose merged patch".to_string(),
                hunk_headers: Vec::new(),
            });
        }
        for (hunk, block) in file.hunks.iter().zip(extracted) {
            blocks.push((hunk.new_start, hunk.header.clone(), block));
        }
        additions += file.additions;
        deletions += file.deletions;
    }
    blocks.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let mut patch = String::new();
    patch.push_str(&format!("diff --git a/{display_path} b/{display_path}\n"));
    patch.push_str(&format!("--- {}\n", side_label('a', ref_old)));
    patch.push_str(&format!("+++ {}\n", side_label('b', ref_new)));
    for (_, _, block) in blocks {
        patch.push_str(&block);
    }

    Ok(MergedFile { path: display_path, patch, additions, deletions })
}

fn side_label(side: char, path: &str) -> String {
    if path == "/dev/null" {
        path.to_string()
    } else {
        format!("{side}/{path}")
    }
}

/// Pull raw `@@ …` blocks (header + body) out of a file's patch text.
fn extract_hunk_blocks(patch: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    for line in patch.lines() {
        if line.starts_with("@@ ") {
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(format!("{line}\n"));
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    if let Some(done) = current.take() {
        blocks.push(done);
    }
    blocks
}

#[cfg(test)]
#[path = "diff_merge_tests.rs"]
mod tests;
