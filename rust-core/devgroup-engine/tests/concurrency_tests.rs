// SPDX-License-Identifier: PMPL-1.0-or-later
//! Concurrency tests for group mutations.
//!
//! Concurrent writers of one group are serialized by its lock, so the final
//! membership always matches whichever rule was committed last.

use std::collections::BTreeSet;
use std::sync::Arc;

use devgroup_engine::{row, DeviceId, EngineConfig, GroupEngine, NewGroup, RelationSchema};
use devgroup_rules::Value;
use devgroup_storage::InMemoryBackend;

async fn engine_with_devices(count: i64) -> Arc<GroupEngine<InMemoryBackend>> {
    let engine = GroupEngine::new(InMemoryBackend::new(), EngineConfig::default()).unwrap();
    let rel = engine.relations();
    rel.define_relation(RelationSchema::new("devices", ["device_id", "rack"]))
        .await
        .unwrap();
    for id in 1..=count {
        rel.insert_row(
            "devices",
            row([("device_id", Value::Int(id)), ("rack", Value::Int(id % 4))]),
        )
        .await
        .unwrap();
    }
    Arc::new(engine)
}

fn expected_for_rack(count: u64, rack: u64) -> BTreeSet<DeviceId> {
    (1..=count).filter(|id| id % 4 == rack).map(DeviceId).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_set_rule_leaves_consistent_membership() {
    let engine = engine_with_devices(40).await;
    let g = engine.create(NewGroup::new("rack", "0")).await.unwrap().group_id;

    let mut handles = Vec::new();
    for round in 0..16u64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let rack = round % 4;
            engine
                .set_rule(g, &format!("devices.rack = {rack}"))
                .await
                .map(|_| rack)
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rule = engine.get_rule(g).await.unwrap();
    let rack: u64 = rule
        .rsplit(' ')
        .next()
        .and_then(|r| r.parse().ok())
        .unwrap();
    assert_eq!(engine.members_of(g).await.unwrap(), expected_for_rack(40, rack));
    assert!(!engine.get(g).await.unwrap().stale);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_ids() {
    let engine = engine_with_devices(8).await;

    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .create(NewGroup::new(format!("g{i}"), "devices.rack = 1"))
                .await
                .unwrap()
                .group_id
        }));
    }
    let mut ids = BTreeSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()));
    }
    assert_eq!(ids.len(), 12);

    let listed = engine.list().await.unwrap();
    assert_eq!(listed.len(), 12);
    assert!(listed.iter().all(|g| g.member_count == 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_groups_proceed_in_parallel() {
    let engine = engine_with_devices(20).await;
    let a = engine.create(NewGroup::new("a", "0")).await.unwrap().group_id;
    let b = engine.create(NewGroup::new("b", "0")).await.unwrap().group_id;

    let (ra, rb) = tokio::join!(
        engine.set_rule(a, "devices.rack = 2"),
        engine.set_rule(b, "devices.rack = 3"),
    );
    assert_eq!(ra.unwrap().member_count, 5);
    assert_eq!(rb.unwrap().member_count, 5);
    assert_eq!(engine.members_of(a).await.unwrap(), expected_for_rack(20, 2));
    assert_eq!(engine.members_of(b).await.unwrap(), expected_for_rack(20, 3));
}
