// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_adapters::{
    FakeProvisioner, FakeWorkerRpc, PassthroughCipher, RuntimeProvisioner, SecretCipher,
};
use gf_core::{
    FailureClass, FakeClock, Heartbeat, MetricsRecorder, NoopMetrics, RepoId, Repository,
    RetryPolicy, RunId, SettingsDoc, Task, TaskId,
};
use gf_storage::MemoryStore;

struct Rig {
    store: Arc<MemoryStore>,
    rpc: Arc<FakeWorkerRpc>,
    listener: WorkerEventListener<FakeClock>,
    routes: Arc<RouteTable>,
    shutdown: CancellationToken,
}

async fn rig() -> Rig {
    let store = Arc::new(MemoryStore::new());
    store
        .put_settings(SettingsDoc { min_workers: Some(2), max_workers: Some(4), ..Default::default() })
        .await
        .unwrap();
    let provisioner = Arc::new(FakeProvisioner::new());
    let rpc = Arc::new(FakeWorkerRpc::new());
    let clock = FakeClock::new();
    let publisher = StatusPublisher::new();
    let settings = Arc::new(crate::settings::SettingsProvider::new(
        Arc::clone(&store) as Arc<dyn Store>,
        clock.clone(),
    ));
    let pool = Arc::new(crate::pool::WorkerPool::new(
        Arc::clone(&store) as Arc<dyn Store>,
        provisioner as Arc<dyn RuntimeProvisioner>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        Arc::clone(&settings),
        publisher.clone(),
        Arc::new(NoopMetrics) as Arc<dyn MetricsRecorder>,
        clock.clone(),
    ));
    pool.ensure_minimum_workers().await.unwrap();
    for w in store.list_workers().await.unwrap() {
        pool.report_heartbeat(Heartbeat {
            worker: w.id.clone(),
            host_name: "host".to_string(),
            active_slots: 0,
            max_slots: 1,
            timestamp_ms: 0,
        })
        .await
        .unwrap();
    }
    let routes = Arc::new(RouteTable::new());
    let dispatcher = Arc::new(RunDispatcher::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        pool,
        Arc::clone(&settings),
        publisher.clone(),
        Arc::clone(&routes),
        Arc::new(PassthroughCipher) as Arc<dyn SecretCipher>,
        Arc::new(NoopMetrics) as Arc<dyn MetricsRecorder>,
        clock.clone(),
    ));
    let projector = Arc::new(RunViewProjector::new(Arc::clone(&store) as Arc<dyn Store>));
    let listener = WorkerEventListener::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&rpc) as Arc<dyn WorkerRpc>,
        dispatcher,
        projector,
        publisher,
        Arc::clone(&routes),
        clock,
    );
    Rig { store, rpc, listener, routes, shutdown: CancellationToken::new() }
}

async fn seed_running_run(rig: &Rig, retry: RetryPolicy, attempt: u32) -> Run {
    let repo = Repository {
        id: RepoId::from_string("rep-1"),
        project: None,
        name: "api".to_string(),
        git_url: "https://example.com/api.git".to_string(),
        collection_instructions: Vec::new(),
        embedded_instructions: Vec::new(),
    };
    rig.store.upsert_repository(repo).await.unwrap();
    let task = Task::builder().repo(RepoId::from_string("rep-1")).retry(retry).build();
    rig.store.upsert_task(task.clone()).await.unwrap();

    let mut run = Run::builder()
        .id(RunId::fresh())
        .task(task.id.clone())
        .repo(task.repo.clone())
        .attempt(attempt)
        .build();
    run.state = RunState::Running;
    run.started_at = Some(run.created_at);
    rig.store.with_state(|s| s.runs.insert(run.id.clone(), run.clone()));
    rig.routes.register(run.id.clone(), "http://worker:7070");
    run
}

fn completed_event(run: &RunId, payload: &str) -> WorkerStreamEvent {
    WorkerStreamEvent {
        kind: "completed".to_string(),
        run: run.clone(),
        message: String::new(),
        timestamp_ms: 0,
        payload_json: Some(payload.to_string()),
    }
}

#[tokio::test]
async fn successful_completion_closes_run_and_route() {
    let rig = rig().await;
    let run = seed_running_run(&rig, RetryPolicy::default(), 1).await;

    rig.listener
        .handle_event(
            completed_event(
                &run.id,
                r#"{"status":"succeeded","summary":"all green","metadata":{"prUrl":"https://pr/9"}}"#,
            ),
            &rig.shutdown,
        )
        .await
        .unwrap();

    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::Succeeded);
    assert_eq!(stored.summary.as_deref(), Some("all green"));
    assert_eq!(stored.pr_url.as_deref(), Some("https://pr/9"));
    assert!(stored.check_terminal_invariant());
    assert!(rig.routes.lookup(&run.id).is_none());
    assert!(rig.store.list_findings().await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_classifies_by_keyword_and_creates_finding() {
    let rig = rig().await;
    let run = seed_running_run(
        &rig,
        RetryPolicy { max_attempts: 1, base_backoff_secs: 10, multiplier: 2.0 },
        1,
    )
    .await;

    rig.listener
        .handle_event(
            completed_event(
                &run.id,
                r#"{"status":"failed","summary":"oops","error":"timeout hit"}"#,
            ),
            &rig.shutdown,
        )
        .await
        .unwrap();

    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::Failed);
    assert_eq!(stored.failure_class, Some(FailureClass::Timeout));

    let findings = rig.store.list_findings().await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].run, run.id);
    assert_eq!(findings[0].failure_class, Some(FailureClass::Timeout));
}

#[tokio::test(start_paused = true)]
async fn failure_schedules_retry_with_backoff() {
    let rig = rig().await;
    let run = seed_running_run(
        &rig,
        RetryPolicy { max_attempts: 3, base_backoff_secs: 10, multiplier: 2.0 },
        1,
    )
    .await;

    rig.listener
        .handle_event(
            completed_event(&run.id, r#"{"status":"failed","summary":"oops","error":"boom"}"#),
            &rig.shutdown,
        )
        .await
        .unwrap();

    // Paused tokio time auto-advances through the 10s backoff.
    for _ in 0..50 {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    let requests = rig.rpc.dispatch_requests();
    assert_eq!(requests.len(), 1, "fresh attempt should have been dispatched");
    assert_eq!(requests[0].attempt, 2);
    assert_eq!(requests[0].task, run.task);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_do_not_retry() {
    let rig = rig().await;
    let run = seed_running_run(
        &rig,
        RetryPolicy { max_attempts: 3, base_backoff_secs: 1, multiplier: 2.0 },
        3,
    )
    .await;

    rig.listener
        .handle_event(
            completed_event(&run.id, r#"{"status":"failed","summary":"still broken"}"#),
            &rig.shutdown,
        )
        .await
        .unwrap();

    for _ in 0..20 {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    assert!(rig.rpc.dispatch_requests().is_empty());
    // The finding still lands.
    assert_eq!(rig.store.list_findings().await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_completion_is_ignored() {
    let rig = rig().await;
    let run = seed_running_run(&rig, RetryPolicy::default(), 1).await;
    let event = completed_event(&run.id, r#"{"status":"succeeded","summary":"ok"}"#);

    rig.listener.handle_event(event.clone(), &rig.shutdown).await.unwrap();
    rig.listener.handle_event(event, &rig.shutdown).await.unwrap();

    let stored = rig.store.get_run(&run.id).await.unwrap();
    assert_eq!(stored.state, RunState::Succeeded);
    assert!(rig.store.list_findings().await.unwrap().is_empty());
}

#[tokio::test]
async fn log_chunks_are_not_persisted() {
    let rig = rig().await;
    let run = seed_running_run(&rig, RetryPolicy::default(), 1).await;

    rig.listener
        .handle_event(
            WorkerStreamEvent {
                kind: "log_chunk".to_string(),
                run: run.id.clone(),
                message: "building...".to_string(),
                timestamp_ms: 5,
                payload_json: None,
            },
            &rig.shutdown,
        )
        .await
        .unwrap();

    assert_eq!(rig.store.next_event_sequence(&run.id).await.unwrap(), 1);
}

#[tokio::test]
async fn other_kinds_persist_as_structured_events() {
    let rig = rig().await;
    let run = seed_running_run(&rig, RetryPolicy::default(), 1).await;

    for (i, kind) in ["agent_started", "tool_use"].iter().enumerate() {
        rig.listener
            .handle_event(
                WorkerStreamEvent {
                    kind: kind.to_string(),
                    run: run.id.clone(),
                    message: format!("event {i}"),
                    timestamp_ms: i as u64,
                    payload_json: Some(r#"{"category":"tool","toolName":"bash"}"#.to_string()),
                },
                &rig.shutdown,
            )
            .await
            .unwrap();
    }

    let events = rig.store.list_structured_events(&run.id, 10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sequence, 1);
    assert_eq!(events[1].sequence, 2);
    assert_eq!(events[0].event_type, "agent_started");
    assert_eq!(events[0].category.as_deref(), Some("tool"));
}

#[tokio::test(start_paused = true)]
async fn run_loop_reconnects_after_stream_drop() {
    let rig = rig().await;
    let listener = Arc::new(rig.listener);
    let shutdown = rig.shutdown.clone();
    let worker = Arc::clone(&listener);
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });

    // Wait for the first subscription.
    for _ in 0..50 {
        if rig.rpc.subscriber_count() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(rig.rpc.subscriber_count(), 1);

    // Drop the stream; the loop resubscribes after ~2s.
    rig.rpc.drop_stream();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        if rig.rpc.subscriber_count() == 1 {
            break;
        }
    }
    assert_eq!(rig.rpc.subscriber_count(), 1);

    // Shutdown ends the loop cleanly.
    shutdown.cancel();
    handle.await.unwrap();
}
