// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn labels_cover_run_task_repo_and_optional_project() {
    let labels = container_labels(
        &RunId::from_string("run-1"),
        &TaskId::from_string("tsk-1"),
        &RepoId::from_string("rep-1"),
        None,
    );
    assert_eq!(labels["orchestrator.run-id"], "run-1");
    assert_eq!(labels["orchestrator.task-id"], "tsk-1");
    assert_eq!(labels["orchestrator.repo-id"], "rep-1");
    assert!(!labels.contains_key("orchestrator.project-id"));

    let labels = container_labels(
        &RunId::from_string("run-1"),
        &TaskId::from_string("tsk-1"),
        &RepoId::from_string("rep-1"),
        Some(&ProjectId::from_string("prj-1")),
    );
    assert_eq!(labels["orchestrator.project-id"], "prj-1");
}

#[test]
fn dispatch_request_serializes_for_the_wire() {
    let request = DispatchRequest {
        run: RunId::from_string("run-1"),
        task: TaskId::from_string("tsk-1"),
        repo: RepoId::from_string("rep-1"),
        project: None,
        harness: HarnessKind::new("claude-code"),
        command: "agent run".to_string(),
        prompt: "p".to_string(),
        execution_timeout_secs: 60,
        attempt: 1,
        sandbox: SandboxProfile::default(),
        artifacts: ArtifactPolicy::default(),
        git_url: "https://example.com/repo.git".to_string(),
        artifact_path: "/artifacts".to_string(),
        labels: Default::default(),
        env: Default::default(),
    };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["run"], "run-1");
    assert_eq!(json["harness"], "claude-code");
}
