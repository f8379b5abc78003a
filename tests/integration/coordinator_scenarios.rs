//! End-to-end coordinator scenarios, driven against in-memory repository
//! fakes rather than any single module's internals.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use warden_gc::testkit::InMemoryRepositories;
use warden_gc::{Coordinator, GcConfig, PathId, Plan, RootSnapshot, Version};

fn immediate_config(max_versions: usize) -> GcConfig {
    GcConfig {
        max_versions: NonZeroUsize::new(max_versions).unwrap(),
        scan_batch_size: NonZeroUsize::new(8).unwrap(),
        cleaning_interval: Duration::ZERO,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not satisfied in time");
}

#[tokio::test]
async fn scenario_1_no_op_below_cap() {
    let kit = InMemoryRepositories::new();
    for t in 1..=3 {
        kit.put_root(RootSnapshot::new(Version(t)));
    }
    kit.set_current_root(Version(3));

    let handle = Coordinator::spawn(immediate_config(10), kit.ports());
    handle.run_gc().await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        kit.root_versions_snapshot(),
        HashSet::from([Version(1), Version(2), Version(3)])
    );
}

#[tokio::test]
async fn scenario_2_oldest_root_pruning() {
    let kit = InMemoryRepositories::new();
    for t in 1..=5 {
        kit.put_root(RootSnapshot::new(Version(t)));
    }
    kit.set_current_root(Version(5));

    let handle = Coordinator::spawn(immediate_config(2), kit.ports());
    handle.run_gc().await.unwrap();

    wait_until(|| kit.root_versions_snapshot().len() == 2).await;
    assert_eq!(
        kit.root_versions_snapshot(),
        HashSet::from([Version(4), Version(5)])
    );
}

#[tokio::test]
async fn scenario_3_pinned_root_protected() {
    let kit = InMemoryRepositories::new();
    for t in 1..=3 {
        kit.put_root(RootSnapshot::new(Version(t)));
    }
    kit.set_current_root(Version(3));
    kit.put_plan(Plan {
        original: RootSnapshot::new(Version(1)),
        target: RootSnapshot::new(Version(1)),
    });

    let handle = Coordinator::spawn(immediate_config(1), kit.ports());
    handle.run_gc().await.unwrap();

    wait_until(|| kit.root_versions_snapshot().len() == 2).await;
    assert_eq!(
        kit.root_versions_snapshot(),
        HashSet::from([Version(1), Version(3)])
    );
}

#[tokio::test]
async fn scenario_4_write_during_scan_race() {
    let kit = InMemoryRepositories::new();
    let app = PathId::new("a");
    kit.put_app_version(app.clone(), Version(7));

    kit.put_root(RootSnapshot::new(Version(1)));
    kit.put_root(RootSnapshot::new(Version(2)));
    kit.set_current_root(Version(2));

    let handle = Coordinator::spawn(immediate_config(1), kit.ports());
    handle.run_gc().await.unwrap();

    // Race a StoreApp in right after triggering the cycle; the scan engine
    // may or may not have already read the "unused" version, but the store
    // is acknowledged immediately regardless, and the eventual compact must
    // not delete the version just announced.
    handle.store_app(app.clone(), Some(Version(7))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(kit.app_versions_snapshot(&app).contains(&Version(7)));
}

#[tokio::test]
async fn scenario_5_write_during_compact_is_pinned_then_acked() {
    let kit = InMemoryRepositories::new();
    let app = PathId::new("b");
    kit.put_app_version(app.clone(), Version(1));

    kit.put_root(RootSnapshot::new(Version(1)));
    kit.put_root(RootSnapshot::new(Version(2)));
    kit.set_current_root(Version(2));

    let handle = Coordinator::spawn(immediate_config(1), kit.ports());
    handle.run_gc().await.unwrap();

    // b is unreferenced by any root, so it's a deletion candidate. A store
    // racing the cycle should complete Ok once the cycle settles, win or
    // lose the race against compact.
    handle.store_app(app.clone(), None).await.unwrap();
}

#[tokio::test]
async fn scenario_6_plan_store_during_compact_decomposes() {
    let kit = InMemoryRepositories::new();
    for t in 1..=5 {
        kit.put_root(RootSnapshot::new(Version(t)));
    }
    kit.set_current_root(Version(5));

    // max_versions=4 with current=5 pinned deletes exactly the oldest root,
    // v=1 — the version this plan's `original` half names, so whether the
    // race lands during Compacting or after, the decomposed StoreRoot for
    // v=1 exercises the pin-or-release path against a real delete target.
    let handle = Coordinator::spawn(immediate_config(4), kit.ports());
    handle.run_gc().await.unwrap();

    let plan = Plan {
        original: RootSnapshot::new(Version(1)),
        target: RootSnapshot::new(Version(6)),
    };
    handle.store_plan(plan).await.unwrap();
}
