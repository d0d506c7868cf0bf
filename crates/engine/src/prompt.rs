// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered prompt composition.
//!
//! Layers, in order: enabled repository-collection instruction files
//! (priority-ordered), repository-embedded instruction files, task-scoped
//! instruction files, then the task's base prompt. Each section is delimited
//! by a labeled header so the harness can attribute guidance to its source.

use gf_core::{InstructionFile, Repository, Task};

/// Compose the dispatch prompt for `task` against `repo`.
pub fn build_layered_prompt(repo: &Repository, task: &Task) -> String {
    let mut out = String::new();

    let mut collection: Vec<&InstructionFile> =
        repo.collection_instructions.iter().filter(|f| f.enabled).collect();
    collection.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
    for file in collection {
        section(&mut out, "Repository collection", &file.name, &file.content);
    }

    let mut embedded: Vec<&InstructionFile> = repo.embedded_instructions.iter().collect();
    embedded.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
    for file in embedded {
        section(&mut out, "Repository", &file.name, &file.content);
    }

    let mut task_files: Vec<&InstructionFile> = task.instruction_files.iter().collect();
    task_files.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
    for file in task_files {
        section(&mut out, "Task", &file.name, &file.content);
    }

    if !task.prompt.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("### Prompt\n\n");
        out.push_str(&task.prompt);
    }
    out
}

fn section(out: &mut String, layer: &str, name: &str, content: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("### {layer} instructions: {name}\n\n"));
    out.push_str(content.trim_end());
    out.push('\n');
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
