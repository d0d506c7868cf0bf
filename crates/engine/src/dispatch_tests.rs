// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_adapters::{FakeProvisioner, FakeWorkerRpc, PassthroughCipher, RuntimeProvisioner};
use gf_core::{
    FakeClock, Heartbeat, InstructionFile, NoopMetrics, ProjectId, RepoId, RuntimeState,
    SecretRecord, SettingsDoc, TaskId,
};
use gf_storage::MemoryStore;

struct Rig {
    store: Arc<MemoryStore>,
    rpc: Arc<FakeWorkerRpc>,
    pool: Arc<WorkerPool<FakeClock>>,
    routes: Arc<RouteTable>,
    dispatcher: RunDispatcher<FakeClock>,
}

async fn rig_with(doc: SettingsDoc) -> Rig {
    let store = Arc::new(MemoryStore::new());
    store.put_settings(doc).await.unwrap();
    let provisioner = Arc::new(FakeProvisioner::new());
    let rpc = Arc::new(FakeWorkerRpc::new());
    let clock = FakeClock::new();
    let publisher = StatusPublisher::new();
    let settings = Arc::new(SettingsProvider::new(
        Arc::clone(&store) as Arc<dyn Store>,
        clock.clone(),
    ));
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&store) as Arc<dyn Store>,
        provisioner as Arc<dyn RuntimeProvisioner>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        Arc::clone(&settings),
        publisher.clone(),
        Arc::new(NoopMetrics),
        clock.clone(),
    ));
    let routes = Arc::new(RouteTable::new());
    let dispatcher = RunDispatcher::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        Arc::clone(&pool),
        settings,
        publisher,
        Arc::clone(&routes),
        Arc::new(PassthroughCipher),
        Arc::new(NoopMetrics),
        clock,
    );
    Rig { store, rpc, pool, routes, dispatcher }
}

async fn rig() -> Rig {
    let rig = rig_with(SettingsDoc {
        min_workers: Some(2),
        max_workers: Some(4),
        ..Default::default()
    })
    .await;
    // Bring two workers to Ready.
    rig.pool.ensure_minimum_workers().await.unwrap();
    for w in rig.store.list_workers().await.unwrap() {
        rig.pool
            .report_heartbeat(Heartbeat {
                worker: w.id.clone(),
                host_name: "host".to_string(),
                active_slots: 0,
                max_slots: 1,
                timestamp_ms: 0,
            })
            .await
            .unwrap();
    }
    rig
}

async fn seed(rig: &Rig) -> (Repository, Task, Run) {
    let repo = Repository {
        id: RepoId::from_string("rep-1"),
        project: None,
        name: "api".to_string(),
        git_url: "https://example.com/api.git".to_string(),
        collection_instructions: Vec::new(),
        embedded_instructions: Vec::new(),
    };
    rig.store.upsert_repository(repo.clone()).await.unwrap();
    let task = Task::builder().repo(repo.id.clone()).build();
    rig.store.upsert_task(task.clone()).await.unwrap();
    let run = Run::builder().id(RunId::fresh()).task(task.id.clone()).repo(repo.id.clone()).build();
    rig.store.create_run(run.clone()).await.unwrap();
    (repo, task, run)
}

#[tokio::test]
async fn accepted_dispatch_marks_run_started_and_registers_route() {
    let rig = rig().await;
    let (repo, task, run) = seed(&rig).await;

    assert!(rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());

    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::Running);
    assert!(stored.started_at.is_some());
    assert!(rig.routes.lookup(&run.id).is_some());

    let requests = rig.rpc.dispatch_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].run, run.id);
    assert_eq!(requests[0].labels["orchestrator.run-id"], run.id.as_str());
    assert_eq!(requests[0].git_url, repo.git_url);
}

#[tokio::test]
async fn approval_profile_short_circuits_before_placement() {
    let rig = rig().await;
    let (repo, mut task, run) = seed(&rig).await;
    task.approval = ApprovalProfile::RequireApproval;

    assert!(rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::PendingApproval);
    assert!(rig.rpc.dispatch_requests().is_empty());
}

#[tokio::test]
async fn global_limit_defers_without_rpc() {
    let rig = rig_with(SettingsDoc {
        max_global_concurrent_runs: Some(1),
        min_workers: Some(1),
        ..Default::default()
    })
    .await;
    let (repo, task, run) = seed(&rig).await;

    // One already-running run saturates the global cap.
    let mut other = Run::builder().id(RunId::from_string("run-other")).build();
    other.state = RunState::Running;
    rig.store.with_state(|s| s.runs.insert(other.id.clone(), other));

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
    assert!(rig.rpc.dispatch_requests().is_empty());
}

#[tokio::test]
async fn repo_limit_defers_run() {
    let rig = rig_with(SettingsDoc {
        per_repo_concurrency_limit: Some(1),
        min_workers: Some(1),
        ..Default::default()
    })
    .await;
    let (repo, task, run) = seed(&rig).await;

    let mut other = Run::builder()
        .id(RunId::from_string("run-other"))
        .repo(repo.id.clone())
        .task(TaskId::from_string("tsk-other"))
        .build();
    other.state = RunState::Running;
    rig.store.with_state(|s| s.runs.insert(other.id.clone(), other));

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
    assert!(rig.rpc.dispatch_requests().is_empty());
}

#[tokio::test]
async fn project_limit_counts_sibling_repos() {
    let rig = rig_with(SettingsDoc {
        per_project_concurrency_limit: Some(1),
        min_workers: Some(1),
        max_workers: Some(4),
        ..Default::default()
    })
    .await;
    rig.pool.ensure_minimum_workers().await.unwrap();
    for w in rig.store.list_workers().await.unwrap() {
        rig.pool
            .report_heartbeat(Heartbeat {
                worker: w.id.clone(),
                host_name: "host".to_string(),
                active_slots: 0,
                max_slots: 1,
                timestamp_ms: 0,
            })
            .await
            .unwrap();
    }

    let project = ProjectId::from_string("prj-1");
    let sibling = Repository {
        id: RepoId::from_string("rep-sibling"),
        project: Some(project.clone()),
        name: "sibling".to_string(),
        git_url: String::new(),
        collection_instructions: Vec::new(),
        embedded_instructions: Vec::new(),
    };
    rig.store.upsert_repository(sibling.clone()).await.unwrap();
    let (_, task, run) = seed(&rig).await;
    let mut repo = rig.store.get_repository(&RepoId::from_string("rep-1")).await.unwrap();
    repo.project = Some(project.clone());
    rig.store.upsert_repository(repo.clone()).await.unwrap();

    let mut other = Run::builder()
        .id(RunId::from_string("run-other"))
        .repo(sibling.id.clone())
        .task(TaskId::from_string("tsk-other"))
        .build();
    other.state = RunState::Running;
    rig.store.with_state(|s| s.runs.insert(other.id.clone(), other));

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
}

#[tokio::test]
async fn task_concurrency_limit_applies_when_positive() {
    let rig = rig().await;
    let (repo, mut task, run) = seed(&rig).await;
    task.concurrency_limit = 1;
    rig.store.upsert_task(task.clone()).await.unwrap();

    let mut other = Run::builder()
        .id(RunId::from_string("run-other"))
        .task(task.id.clone())
        .repo(repo.id.clone())
        .build();
    other.state = RunState::Running;
    rig.store.with_state(|s| s.runs.insert(other.id.clone(), other));

    // Repo limit default is 4, so only the task limit can defer this.
    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
}

#[tokio::test]
async fn rejection_fails_run_and_creates_finding() {
    let rig = rig().await;
    let (repo, task, run) = seed(&rig).await;
    rig.rpc.reject_dispatches("image not present");

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());

    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::Failed);
    assert_eq!(stored.failure_class, Some(FailureClass::DispatchRejected));
    assert_eq!(stored.summary.as_deref(), Some("image not present"));
    assert!(stored.check_terminal_invariant());

    let findings = rig.store.list_findings().await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].run, run.id);

    // The reserved worker went back to Ready.
    let workers = rig.store.list_workers().await.unwrap();
    assert!(workers.iter().all(|w| w.state == RuntimeState::Ready));
}

#[tokio::test]
async fn transport_failure_leaves_run_queued() {
    let rig = rig().await;
    let (repo, task, run) = seed(&rig).await;
    rig.rpc.fail_dispatches("connection refused");

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
    assert!(rig.store.list_findings().await.unwrap().is_empty());
    let workers = rig.store.list_workers().await.unwrap();
    assert!(workers.iter().all(|w| w.state == RuntimeState::Ready));
}

#[tokio::test]
async fn no_ready_worker_defers_run() {
    let rig = rig_with(SettingsDoc { min_workers: Some(0), ..Default::default() }).await;
    let (repo, task, run) = seed(&rig).await;

    assert!(!rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    assert_eq!(rig.store.get_run(&run.id).await.unwrap().state, RunState::Queued);
}

#[tokio::test]
async fn secrets_map_to_canonical_env_names() {
    let rig = rig().await;
    let (repo, task, run) = seed(&rig).await;
    for (provider, value) in
        [("github", "gh-tok"), ("claude-code", "sk-ant"), ("acme", "xyz")]
    {
        rig.store
            .upsert_secret(SecretRecord {
                repo: repo.id.clone(),
                provider: provider.to_string(),
                encrypted_value: value.to_string(),
            })
            .await
            .unwrap();
    }

    assert!(rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    let request = rig.rpc.dispatch_requests().remove(0);
    assert_eq!(request.env["GH_TOKEN"], "gh-tok");
    assert_eq!(request.env["GITHUB_TOKEN"], "gh-tok");
    assert_eq!(request.env["ANTHROPIC_API_KEY"], "sk-ant");
    assert_eq!(request.env["SECRET_ACME"], "xyz");
}

#[tokio::test]
async fn harness_settings_become_harness_env() {
    let rig = rig().await;
    let (repo, mut task, run) = seed(&rig).await;
    task.harness_settings.insert("model".to_string(), "opus".to_string());
    task.harness_settings.insert("max-tokens".to_string(), "32000".to_string());

    assert!(rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    let request = rig.rpc.dispatch_requests().remove(0);
    assert_eq!(request.env["HARNESS_MODEL"], "opus");
    assert_eq!(request.env["HARNESS_MAX_TOKENS"], "32000");
}

#[tokio::test]
async fn layered_prompt_rides_in_the_request() {
    let rig = rig().await;
    let (mut repo, mut task, run) = seed(&rig).await;
    repo.collection_instructions.push(InstructionFile {
        name: "style".to_string(),
        content: "no tabs".to_string(),
        order: 1,
        enabled: true,
    });
    task.prompt = "fix it".to_string();

    assert!(rig.dispatcher.dispatch(&repo, &task, &run).await.unwrap());
    let request = rig.rpc.dispatch_requests().remove(0);
    assert!(request.prompt.contains("no tabs"));
    assert!(request.prompt.ends_with("fix it"));
}

#[tokio::test]
async fn dispatch_next_queued_picks_oldest_run() {
    let rig = rig().await;
    let (_, task, first_run) = seed(&rig).await;

    let mut younger = Run::builder()
        .id(RunId::from_string("run-younger"))
        .task(task.id.clone())
        .repo(task.repo.clone())
        .build();
    younger.created_at = first_run.created_at + chrono::Duration::seconds(60);
    rig.store.create_run(younger).await.unwrap();

    assert!(rig.dispatcher.dispatch_next_queued_run_for_task(&task.id).await.unwrap());
    assert_eq!(rig.store.get_run(&first_run.id).await.unwrap().state, RunState::Running);
    assert_eq!(
        rig.store.get_run(&RunId::from_string("run-younger")).await.unwrap().state,
        RunState::Queued
    );
}

#[tokio::test]
async fn cancel_swallows_rpc_failures() {
    let rig = rig().await;
    rig.dispatcher.cancel(&RunId::from_string("run-any")).await;
    assert!(rig
        .rpc
        .calls()
        .iter()
        .any(|c| matches!(c, gf_adapters::RpcCall::Cancel { .. })));
}
