// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gf_core::FakeClock;
use gf_storage::MemoryStore;

fn coordinator(store: &Arc<MemoryStore>, clock: &FakeClock) -> LeaseCoordinator<FakeClock> {
    LeaseCoordinator::new(Arc::clone(store) as Arc<dyn Store>, clock.clone())
}

#[tokio::test]
async fn two_owners_exclude_each_other_until_ttl() {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let a = coordinator(&store, &clock);
    let b = coordinator(&store, &clock);

    let guard = a.try_acquire("scheduler", Duration::from_secs(30)).await.unwrap();
    assert!(guard.is_some());
    assert!(b.try_acquire("scheduler", Duration::from_secs(30)).await.unwrap().is_none());

    // TTL elapses; the other owner can take over even without a release.
    clock.advance(Duration::from_secs(31));
    std::mem::forget(guard);
    assert!(b.try_acquire("scheduler", Duration::from_secs(30)).await.unwrap().is_some());
}

#[tokio::test]
async fn same_owner_reacquires_its_own_lease() {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let a = coordinator(&store, &clock);

    let first = a.try_acquire("leader", Duration::from_secs(30)).await.unwrap();
    assert!(first.is_some());
    clock.advance(Duration::from_secs(10));
    let again = a.try_acquire("leader", Duration::from_secs(30)).await.unwrap();
    assert!(again.is_some());
    std::mem::forget((first, again));
}

#[tokio::test]
async fn drop_releases_for_the_next_owner() {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let a = coordinator(&store, &clock);
    let b = coordinator(&store, &clock);

    let guard = a.try_acquire("leader", Duration::from_secs(3600)).await.unwrap();
    drop(guard);
    // Release is spawned; give it a scheduling turn.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(b.try_acquire("leader", Duration::from_secs(30)).await.unwrap().is_some());
}

#[tokio::test]
async fn distinct_names_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let a = coordinator(&store, &clock);
    let b = coordinator(&store, &clock);

    let g1 = a.try_acquire("scheduler", Duration::from_secs(30)).await.unwrap();
    let g2 = b.try_acquire("reconciler", Duration::from_secs(30)).await.unwrap();
    assert!(g1.is_some() && g2.is_some());
    std::mem::forget((g1, g2));
}
