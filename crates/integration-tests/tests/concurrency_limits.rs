//! Hierarchical concurrency limits: queue, environment, project, task and organization

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{env, harness, harness_at, temp_database};
use runqueue_core::application::{PriorityStrategy, RunQueueOptions};
use runqueue_core::domain::{AbortReason, CapacityDefaults, ClaimedMessage, DequeueResult};

/// Claim until the queue aborts; returns the claims and the abort reason
async fn drain(h: &common::Harness, consumer_id: &str) -> (Vec<ClaimedMessage>, AbortReason) {
    let mut claimed = Vec::new();
    loop {
        match h.poll(consumer_id).await {
            DequeueResult::Claimed(message) => claimed.push(*message),
            DequeueResult::Abort(reason) => return (claimed, reason),
        }
    }
}

#[tokio::test]
async fn test_queue_limit_caps_running_messages() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue
        .update_queue_concurrency_limit(&e, "emails", 2)
        .await
        .unwrap();

    for i in 0..5 {
        h.enqueue(&e, &format!("run_{}", i), "emails", 100 - i).await;
    }

    let (claimed, reason) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 2);
    assert_eq!(reason, AbortReason::NoCapacity);
    assert_eq!(h.run_queue.length_of_queue(&e, "emails", None).await.unwrap(), 3);

    let overview = h.run_queue.concurrency_overview(&e).await.unwrap();
    assert_eq!(overview.queues[0].limit, 2);
    assert_eq!(overview.queues[0].running, 2);
    assert_eq!(overview.queues[0].queued, 3);
}

#[tokio::test]
async fn test_queue_without_limit_follows_environment_limit() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue.update_env_concurrency_limit(&e, 3).await.unwrap();

    for i in 0..4 {
        h.enqueue(&e, &format!("a_{}", i), "emails", 50).await;
        h.enqueue(&e, &format!("b_{}", i), "reports", 50).await;
    }

    // Both queues together stop at the environment limit
    let (claimed, reason) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 3);
    assert_eq!(reason, AbortReason::NoCapacity);

    let overview = h.run_queue.concurrency_overview(&e).await.unwrap();
    assert_eq!(overview.env_current, 3);
    assert_eq!(overview.env_limit, 3);
    assert!(overview.queues.iter().all(|q| q.limit == 3));
}

#[tokio::test]
async fn test_removed_queue_limit_falls_back_to_environment() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue
        .update_queue_concurrency_limit(&e, "emails", 1)
        .await
        .unwrap();
    for i in 0..3 {
        h.enqueue(&e, &format!("run_{}", i), "emails", 10).await;
    }

    let (claimed, _) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 1);

    h.run_queue
        .remove_queue_concurrency_limit(&e, "emails")
        .await
        .unwrap();
    let (claimed, reason) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 2);
    assert_eq!(reason, AbortReason::NoCandidates);
}

#[tokio::test]
async fn test_default_environment_limit_is_ten() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    for i in 0..12 {
        h.enqueue(&e, &format!("run_{}", i), &format!("q{}", i % 3), 10).await;
    }

    let (claimed, reason) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 10);
    assert_eq!(reason, AbortReason::NoCapacity);
}

#[tokio::test]
async fn test_org_limit_spans_environments() {
    let h = harness().await;
    let a = env("env_a", "org_1");
    let b = env("env_b", "org_1");
    let other = env("env_c", "org_2");
    h.run_queue.update_org_concurrency_limit("org_1", 3).await.unwrap();

    for i in 0..5 {
        h.enqueue(&a, &format!("a_{}", i), "emails", 100).await;
        h.enqueue(&b, &format!("b_{}", i), "emails", 100).await;
    }

    let (claimed_org_1, reason) = drain(&h, "c1").await;
    assert_eq!(claimed_org_1.len(), 3);
    assert_eq!(reason, AbortReason::NoCapacity);
    assert_eq!(h.run_queue.current_concurrency_of_org("org_1").await.unwrap(), 3);

    // Another organization is not held back by org_1's limit
    h.enqueue(&other, "c_0", "emails", 1).await;
    let claimed = h.claim("c1").await;
    assert_eq!(claimed.payload.run_id, "c_0");

    // Releasing one org_1 claim frees exactly one slot
    h.run_queue
        .acknowledge(&claimed_org_1[0].claim_token)
        .await
        .unwrap();
    let (more, reason) = drain(&h, "c1").await;
    assert_eq!(more.len(), 1);
    assert_eq!(more[0].payload.org_id, "org_1");
    assert_eq!(reason, AbortReason::NoCapacity);
}

#[tokio::test]
async fn test_org_at_one_of_two_admits_exactly_one_more() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue.update_org_concurrency_limit("org_1", 2).await.unwrap();
    h.run_queue.update_env_concurrency_limit(&e, 5).await.unwrap();
    for queue in ["queue_a", "queue_b", "queue_c"] {
        h.run_queue
            .update_queue_concurrency_limit(&e, queue, 5)
            .await
            .unwrap();
    }

    // The organization already runs one message
    h.enqueue(&e, "c_0", "queue_c", 1_000).await;
    assert_eq!(h.claim("c1").await.payload.run_id, "c_0");
    assert_eq!(h.run_queue.current_concurrency_of_org("org_1").await.unwrap(), 1);

    // A: three messages waiting 100s, B: one message waiting 5s
    for i in 0..3 {
        h.enqueue(&e, &format!("a_{}", i), "queue_a", 100_000).await;
    }
    h.enqueue(&e, "b_0", "queue_b", 5_000).await;

    let second = h.claim("c1").await;
    assert!(
        second.payload.queue == "queue_a" || second.payload.queue == "queue_b",
        "unexpected queue {}",
        second.payload.queue
    );
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));

    assert_eq!(h.run_queue.current_concurrency_of_org("org_1").await.unwrap(), 2);
    let waiting = h.run_queue.length_of_queue(&e, "queue_a", None).await.unwrap()
        + h.run_queue.length_of_queue(&e, "queue_b", None).await.unwrap();
    assert_eq!(waiting, 3);
}

#[tokio::test]
async fn test_task_limit_caps_across_queues() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue
        .update_task_concurrency_limit(&e, common::TASK, 1)
        .await
        .unwrap();

    h.enqueue(&e, "run_1", "emails", 30).await;
    h.enqueue(&e, "run_2", "reports", 20).await;

    let first = h.claim("c1").await;
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));

    h.run_queue.acknowledge(&first.claim_token).await.unwrap();
    let second = h.claim("c1").await;
    assert_ne!(second.payload.run_id, first.payload.run_id);
}

#[tokio::test]
async fn test_project_limit() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue.update_project_concurrency_limit(&e, 2).await.unwrap();
    for i in 0..4 {
        h.enqueue(&e, &format!("run_{}", i), "emails", 10).await;
    }

    let (claimed, reason) = drain(&h, "c1").await;
    assert_eq!(claimed.len(), 2);
    assert_eq!(reason, AbortReason::NoCapacity);
    assert_eq!(h.run_queue.current_concurrency_of_project(&e).await.unwrap(), 2);
}

#[tokio::test]
async fn test_disabled_org_is_never_served() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.enqueue(&e, "run_1", "emails", 10).await;

    h.run_queue
        .set_org_concurrency_disabled("org_1", true)
        .await
        .unwrap();
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));
    assert!(h.run_queue.concurrency_overview(&e).await.unwrap().org_disabled);

    h.run_queue
        .set_org_concurrency_disabled("org_1", false)
        .await
        .unwrap();
    assert_eq!(h.claim("c1").await.payload.run_id, "run_1");
}

#[tokio::test]
async fn test_release_frees_capacity_for_the_next_claim() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.run_queue
        .update_queue_concurrency_limit(&e, "emails", 1)
        .await
        .unwrap();
    h.enqueue(&e, "run_1", "emails", 20).await;
    h.enqueue(&e, "run_2", "emails", 10).await;

    let first = h.claim("c1").await;
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));

    h.run_queue.acknowledge(&first.claim_token).await.unwrap();
    assert_eq!(h.claim("c1").await.payload.run_id, "run_2");
}

#[tokio::test]
async fn test_concurrent_consumers_never_exceed_limits() {
    let (url, cleanup) = temp_database("limits");
    let options = RunQueueOptions {
        capacity_defaults: CapacityDefaults {
            env_limit: 4,
            ..CapacityDefaults::default()
        },
        ..RunQueueOptions::default()
    };
    let h = Arc::new(harness_at(&url, 8, PriorityStrategy::weighted(Some(3)), options).await);

    let a = env("env_a", "org_1");
    let b = env("env_b", "org_2");
    for i in 0..20 {
        h.enqueue(&a, &format!("a_{}", i), &format!("q{}", i % 4), 100).await;
        h.enqueue(&b, &format!("b_{}", i), "emails", 100).await;
    }
    h.run_queue
        .update_queue_concurrency_limit(&b, "emails", 2)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..16 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let consumer = format!("consumer_{}", worker);
            let mut claimed = Vec::new();
            for _ in 0..4 {
                if let DequeueResult::Claimed(message) = h.poll(&consumer).await {
                    claimed.push(message.payload.run_id.clone());
                }
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    // No message handed out twice
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), all.len());

    let from_a = all.iter().filter(|id| id.starts_with("a_")).count();
    let from_b = all.iter().filter(|id| id.starts_with("b_")).count();
    assert_eq!(from_a, 4);
    assert_eq!(from_b, 2);
    assert_eq!(h.run_queue.current_concurrency_of_environment(&a).await.unwrap(), 4);
    assert_eq!(
        h.run_queue
            .current_concurrency_of_queue(&b, "emails", None)
            .await
            .unwrap(),
        2
    );

    drop(h);
    for path in cleanup {
        let _ = std::fs::remove_file(path);
    }
}
