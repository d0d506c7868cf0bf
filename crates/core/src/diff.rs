// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified-diff model: parsed patches, hunks, lane diffs, merge outcomes.
//!
//! The parser understands git-style unified diffs (`diff --git` file headers,
//! `@@` hunk headers). It is deliberately lenient: unknown header lines are
//! kept as file metadata, and a file with no hunks parses as metadata-only.

use crate::id::RunId;
use crate::task::HarnessKind;
use serde::{Deserialize, Serialize};

/// One `@@` hunk of a file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u64,
    pub old_count: u64,
    pub new_start: u64,
    pub new_count: u64,
    /// The full `@@ … @@ …` header line.
    pub header: String,
    /// Body lines (context/additions/deletions), without the header.
    pub body: Vec<String>,
}

impl Hunk {
    /// Inclusive range of new-file lines this hunk covers.
    pub fn new_range(&self) -> (u64, u64) {
        let end = self.new_start + self.new_count.saturating_sub(1).max(0);
        (self.new_start, end.max(self.new_start))
    }

    /// Whether the new-line ranges of two hunks intersect (inclusive).
    pub fn overlaps(&self, other: &Hunk) -> bool {
        let (a_lo, a_hi) = self.new_range();
        let (b_lo, b_hi) = other.new_range();
        a_lo <= b_hi && b_lo <= a_hi
    }

    /// The hunk re-serialized as patch text: header plus body.
    pub fn block(&self) -> String {
        let mut out = String::with_capacity(self.header.len() + 1);
        out.push_str(&self.header);
        out.push('\n');
        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// One file within a parsed diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFile {
    /// Path on the `a/` side (`/dev/null` for new files).
    pub old_path: String,
    /// Path on the `b/` side (`/dev/null` for deletions).
    pub new_path: String,
    pub hunks: Vec<Hunk>,
    pub additions: u64,
    pub deletions: u64,
    /// This file's slice of the original patch text.
    pub patch: String,
}

impl DiffFile {
    /// The path identifying this change: the new path unless deleted.
    pub fn path(&self) -> &str {
        if self.new_path == "/dev/null" {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    /// Metadata-only changes (mode, rename) carry no hunks.
    pub fn is_metadata_only(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// A single agent's unified diff in a parallel-agents workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneDiff {
    pub lane_label: String,
    pub harness: HarnessKind,
    pub run: RunId,
    pub succeeded: bool,
    pub summary: Option<String>,
    pub diff_stat: Option<String>,
    pub diff_patch: String,
}

/// A per-file conflict detected while merging lanes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub file_path: String,
    pub reason: String,
    /// Offending hunk headers, when the conflict is hunk-level.
    pub hunk_headers: Vec<String>,
}

/// Result of merging lane diffs into one patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub merged_patch: String,
    /// Paths that merged cleanly, sorted.
    pub merged_files: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub diff_stat: String,
    pub conflicts: Vec<MergeConflict>,
}

/// Parse a git-style unified diff into per-file changes.
///
/// Lines before the first `diff --git` are ignored. A file section with no
/// `@@` hunks is kept as metadata-only.
pub fn parse_patch(patch: &str) -> Vec<DiffFile> {
    let mut files = Vec::new();
    let mut current: Option<FileBuilder> = None;

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(done) = current.take() {
                files.push(done.finish());
            }
            current = Some(FileBuilder::new(line, rest));
            continue;
        }
        let Some(fb) = current.as_mut() else { continue };
        fb.push_line(line);
    }
    if let Some(done) = current.take() {
        files.push(done.finish());
    }
    files
}

struct FileBuilder {
    old_path: Option<String>,
    new_path: Option<String>,
    /// Fallback paths from the `diff --git a/… b/…` line.
    git_line_paths: Option<(String, String)>,
    hunks: Vec<Hunk>,
    in_hunk: bool,
    additions: u64,
    deletions: u64,
    patch: String,
}

impl FileBuilder {
    fn new(line: &str, rest: &str) -> Self {
        let mut patch = String::new();
        patch.push_str(line);
        patch.push('\n');
        Self {
            old_path: None,
            new_path: None,
            git_line_paths: split_git_paths(rest),
            hunks: Vec::new(),
            in_hunk: false,
            additions: 0,
            deletions: 0,
            patch,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.patch.push_str(line);
        self.patch.push('\n');

        if let Some(hunk) = parse_hunk_header(line) {
            self.hunks.push(hunk);
            self.in_hunk = true;
            return;
        }

        if !self.in_hunk {
            if let Some(p) = line.strip_prefix("--- ") {
                self.old_path = Some(strip_side(p));
            } else if let Some(p) = line.strip_prefix("+++ ") {
                self.new_path = Some(strip_side(p));
            }
            return;
        }

        // Hunk body line.
        if let Some(hunk) = self.hunks.last_mut() {
            hunk.body.push(line.to_string());
        }
        if line.starts_with('+') {
            self.additions += 1;
        } else if line.starts_with('-') {
            self.deletions += 1;
        }
    }

    fn finish(self) -> DiffFile {
        let (git_old, git_new) = self.git_line_paths.unwrap_or_default();
        DiffFile {
            old_path: self.old_path.unwrap_or(git_old),
            new_path: self.new_path.unwrap_or(git_new),
            hunks: self.hunks,
            additions: self.additions,
            deletions: self.deletions,
            patch: self.patch,
        }
    }
}

/// `a/path b/path` → `(path, path)`. Paths with spaces stay best-effort.
fn split_git_paths(rest: &str) -> Option<(String, String)> {
    let b_pos = rest.rfind(" b/")?;
    let a_part = &rest[..b_pos];
    let b_part = &rest[b_pos + 3..];
    let a_path = a_part.strip_prefix("a/").unwrap_or(a_part);
    Some((a_path.to_string(), b_part.to_string()))
}

/// `a/path` / `b/path` / `/dev/null`, trailing tab metadata stripped.
fn strip_side(p: &str) -> String {
    let p = p.split('\t').next().unwrap_or(p);
    if p == "/dev/null" {
        return p.to_string();
    }
    p.strip_prefix("a/").or_else(|| p.strip_prefix("b/")).unwrap_or(p).to_string()
}

/// Parse `@@ -old[,count] +new[,count] @@ …` into an empty-bodied [`Hunk`].
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ -")?;
    let at = rest.find(" @@")?;
    let ranges = &rest[..at];
    let (old_part, new_part) = ranges.split_once(" +")?;
    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;
    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        header: line.to_string(),
        body: Vec::new(),
    })
}

/// `start[,count]` with count defaulting to 1.
fn parse_range(s: &str) -> Option<(u64, u64)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Git-convention diffstat: `N file(s) changed, X insertion(s)(+),
/// Y deletion(s)(-)`, omitting zero components.
pub fn diff_stat_line(files: u64, additions: u64, deletions: u64) -> String {
    let plural = |n: u64, word: &str| {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    };
    let mut parts = vec![plural(files, "file") + " changed"];
    if additions > 0 {
        parts.push(format!("{}(+)", plural(additions, "insertion")));
    }
    if deletions > 0 {
        parts.push(format!("{}(-)", plural(deletions, "deletion")));
    }
    parts.join(", ")
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
