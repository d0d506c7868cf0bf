// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_core::{RepoId, Task};

fn file(name: &str, content: &str, order: i32, enabled: bool) -> InstructionFile {
    InstructionFile {
        name: name.to_string(),
        content: content.to_string(),
        order,
        enabled,
    }
}

fn repo(collection: Vec<InstructionFile>, embedded: Vec<InstructionFile>) -> Repository {
    Repository {
        id: RepoId::from_string("rep-1"),
        project: None,
        name: "api".to_string(),
        git_url: "https://example.com/api.git".to_string(),
        collection_instructions: collection,
        embedded_instructions: embedded,
    }
}

#[test]
fn layers_compose_in_order_with_labeled_headers() {
    let repo = repo(
        vec![file("style", "tabs never", 1, true)],
        vec![file("arch", "hexagonal", 1, true)],
    );
    let task = Task::builder()
        .instruction_files(vec![file("focus", "only the parser", 1, true)])
        .prompt("fix the bug".to_string())
        .build();

    let prompt = build_layered_prompt(&repo, &task);
    let style = prompt.find("### Repository collection instructions: style").unwrap();
    let arch = prompt.find("### Repository instructions: arch").unwrap();
    let focus = prompt.find("### Task instructions: focus").unwrap();
    let base = prompt.find("### Prompt").unwrap();
    assert!(style < arch && arch < focus && focus < base);
    assert!(prompt.ends_with("fix the bug"));
}

#[test]
fn disabled_collection_files_are_skipped() {
    let repo = repo(
        vec![file("on", "keep", 1, true), file("off", "drop", 2, false)],
        Vec::new(),
    );
    let task = Task::builder().build();

    let prompt = build_layered_prompt(&repo, &task);
    assert!(prompt.contains("keep"));
    assert!(!prompt.contains("drop"));
}

#[test]
fn files_sort_by_order_field_within_a_layer() {
    let repo = repo(
        vec![file("second", "b", 5, true), file("first", "a", 1, true)],
        Vec::new(),
    );
    let task = Task::builder().build();

    let prompt = build_layered_prompt(&repo, &task);
    assert!(prompt.find("first").unwrap() < prompt.find("second").unwrap());
}

#[test]
fn empty_instructions_yield_bare_prompt() {
    let repo = repo(Vec::new(), Vec::new());
    let task = Task::builder().prompt("just do it".to_string()).build();
    let prompt = build_layered_prompt(&repo, &task);
    assert_eq!(prompt, "### Prompt\n\njust do it");
}
