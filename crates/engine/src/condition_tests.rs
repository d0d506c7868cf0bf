// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_core::{FailureClass, Run, RunState};

fn ctx_with<'a>(
    run: Option<&'a Run>,
    node: Option<&'a NodeInfo>,
    context: Option<&'a HashMap<String, String>>,
) -> EdgeContext<'a> {
    EdgeContext { run, node, context }
}

#[test]
fn empty_condition_passes() {
    assert!(evaluate_condition("", &EdgeContext::default()));
    assert!(evaluate_condition("   ", &EdgeContext::default()));
}

#[yare::parameterized(
    missing_op      = { "run.state" },
    unknown_op      = { "run.state ~= failed" },
    unknown_field   = { "run.nope == 1" },
    missing_entity  = { "node.state == done" },
    bare_unknown    = { "missing == 1" },
)]
fn unparseable_or_unresolvable_fails_closed(condition: &str) {
    let run = Run::builder().build();
    let ctx = ctx_with(Some(&run), None, None);
    assert!(!evaluate_condition(condition, &ctx));
}

#[test]
fn run_fields_resolve() {
    let run = Run::builder()
        .state(RunState::Failed)
        .attempt(2u32)
        .summary(Some("flaky".to_string()))
        .failure_class(Some(FailureClass::Timeout))
        .build();
    let ctx = ctx_with(Some(&run), None, None);

    assert!(evaluate_condition("run.state == failed", &ctx));
    assert!(evaluate_condition("run.state == FAILED", &ctx));
    assert!(evaluate_condition("run.attempt >= 2", &ctx));
    assert!(evaluate_condition("run.attempt < 3", &ctx));
    assert!(evaluate_condition("run.summary != ''", &ctx));
    assert!(evaluate_condition("run.failureClass == timeout", &ctx));
    assert!(evaluate_condition("run.failure_class == timeout", &ctx));
}

#[test]
fn node_fields_resolve() {
    let node = NodeInfo {
        state: "completed".to_string(),
        summary: String::new(),
        attempt: 1,
        node_type: "agent".to_string(),
    };
    let ctx = ctx_with(None, Some(&node), None);

    assert!(evaluate_condition("node.state == Completed", &ctx));
    assert!(evaluate_condition("node.type != shell", &ctx));
    assert!(evaluate_condition("node.attempt <= 1", &ctx));
}

#[test]
fn context_names_resolve_with_or_without_prefix() {
    let mut map = HashMap::new();
    map.insert("retries".to_string(), "3".to_string());
    map.insert("branch".to_string(), "main".to_string());
    let ctx = ctx_with(None, None, Some(&map));

    assert!(evaluate_condition("context.retries > 2", &ctx));
    assert!(evaluate_condition("retries > 2", &ctx));
    assert!(evaluate_condition("branch == 'main'", &ctx));
    assert!(evaluate_condition("branch == \"MAIN\"", &ctx));
}

#[yare::parameterized(
    within_tolerance  = { "score == 0.30003", true },
    outside_tolerance = { "score == 0.3002", false },
    ne_respects_it    = { "score != 0.30003", false },
    ordering          = { "score > 0.2", true },
)]
fn numeric_comparison_uses_absolute_tolerance(condition: &str, expect: bool) {
    let mut map = HashMap::new();
    map.insert("score".to_string(), "0.3".to_string());
    let ctx = ctx_with(None, None, Some(&map));
    assert_eq!(evaluate_condition(condition, &ctx), expect);
}

#[test]
fn ordering_on_strings_is_unsupported() {
    let mut map = HashMap::new();
    map.insert("branch".to_string(), "main".to_string());
    let ctx = ctx_with(None, None, Some(&map));
    assert!(!evaluate_condition("branch > alpha", &ctx));
}

#[test]
fn literal_with_spaces_compares_whole() {
    let mut map = HashMap::new();
    map.insert("status".to_string(), "needs review".to_string());
    let ctx = ctx_with(None, None, Some(&map));
    assert!(evaluate_condition("status == 'needs review'", &ctx));
}
