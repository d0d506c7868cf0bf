// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_core::{FakeClock, RunId, RunState, WorkKind};

fn snapshot(id: &str, state: WorkState, percent: Option<u8>, message: Option<&str>) -> WorkSnapshot {
    WorkSnapshot {
        id: WorkId::from_string(id),
        kind: WorkKind::Other,
        operation_key: id.to_string(),
        state,
        percent,
        message: message.map(str::to_string),
        started_at_ms: 0,
        updated_at_ms: 0,
        error_code: None,
        error_message: None,
        critical: false,
    }
}

fn sentinel(n: u64) -> StatusEvent {
    StatusEvent::RunLogChunk {
        run: RunId::from_string("run-sentinel"),
        message: n.to_string(),
        timestamp_ms: n,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<StatusEvent>) -> StatusEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for status event")
        .expect("publisher dropped")
}

#[tokio::test]
async fn publisher_fans_out_to_all_subscribers() {
    let publisher = StatusPublisher::new();
    let mut a = publisher.subscribe();
    let mut b = publisher.subscribe();

    publisher.publish(StatusEvent::RunStatus {
        run: RunId::from_string("run-1"),
        state: RunState::Running,
        summary: None,
    });

    for rx in [&mut a, &mut b] {
        match next_event(rx).await {
            StatusEvent::RunStatus { run, state, .. } => {
                assert_eq!(run, "run-1");
                assert_eq!(state, RunState::Running);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn relay_always_publishes_state_changes() {
    let publisher = StatusPublisher::new();
    let mut rx = publisher.subscribe();
    let clock = FakeClock::new();
    let relay = WorkRelay::new(publisher.clone(), clock.clone());

    relay.observe(&snapshot("bgw-1", WorkState::Pending, None, None));
    relay.observe(&snapshot("bgw-1", WorkState::Running, None, None));
    // No clock advance: throttle would block these if they were state
    // changes subject to it.
    relay.observe(&snapshot("bgw-1", WorkState::Succeeded, None, None));

    for expected in [WorkState::Pending, WorkState::Running, WorkState::Succeeded] {
        match next_event(&mut rx).await {
            StatusEvent::WorkUpdated { snapshot } => assert_eq!(snapshot.state, expected),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn relay_throttles_progress_updates_to_fifteen_seconds() {
    let publisher = StatusPublisher::new();
    let mut rx = publisher.subscribe();
    let clock = FakeClock::new();
    let relay = WorkRelay::new(publisher.clone(), clock.clone());

    relay.observe(&snapshot("bgw-1", WorkState::Running, Some(5), None));
    // Bucket change within the throttle window: suppressed.
    clock.advance(Duration::from_secs(5));
    relay.observe(&snapshot("bgw-1", WorkState::Running, Some(25), None));
    // Past the window: the next bucket change goes out.
    clock.advance(Duration::from_secs(15));
    relay.observe(&snapshot("bgw-1", WorkState::Running, Some(45), None));
    publisher.publish(sentinel(1));

    match next_event(&mut rx).await {
        StatusEvent::WorkUpdated { snapshot } => assert_eq!(snapshot.percent, Some(5)),
        other => panic!("unexpected event {other:?}"),
    }
    match next_event(&mut rx).await {
        StatusEvent::WorkUpdated { snapshot } => assert_eq!(snapshot.percent, Some(45)),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, StatusEvent::RunLogChunk { .. }));
}

#[tokio::test]
async fn relay_drops_unchanged_updates() {
    let publisher = StatusPublisher::new();
    let mut rx = publisher.subscribe();
    let clock = FakeClock::new();
    let relay = WorkRelay::new(publisher.clone(), clock.clone());

    relay.observe(&snapshot("bgw-1", WorkState::Running, Some(10), Some("working")));
    clock.advance(Duration::from_secs(60));
    // Same state, same bucket, same message: dropped despite the window.
    relay.observe(&snapshot("bgw-1", WorkState::Running, Some(12), Some("working")));
    publisher.publish(sentinel(1));

    match next_event(&mut rx).await {
        StatusEvent::WorkUpdated { snapshot } => assert_eq!(snapshot.percent, Some(10)),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, StatusEvent::RunLogChunk { .. }));
}

#[tokio::test]
async fn message_change_republishes_after_throttle() {
    let publisher = StatusPublisher::new();
    let mut rx = publisher.subscribe();
    let clock = FakeClock::new();
    let relay = WorkRelay::new(publisher.clone(), clock.clone());

    relay.observe(&snapshot("bgw-1", WorkState::Running, None, Some("cloning")));
    clock.advance(Duration::from_secs(16));
    relay.observe(&snapshot("bgw-1", WorkState::Running, None, Some("checking out")));

    match next_event(&mut rx).await {
        StatusEvent::WorkUpdated { snapshot } => {
            assert_eq!(snapshot.message.as_deref(), Some("cloning"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    match next_event(&mut rx).await {
        StatusEvent::WorkUpdated { snapshot } => {
            assert_eq!(snapshot.message.as_deref(), Some("checking out"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}
