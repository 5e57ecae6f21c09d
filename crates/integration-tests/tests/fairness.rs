//! Fair lane selection across tenants

mod common;

use std::collections::HashMap;

use common::{env, harness, harness_with};
use runqueue_core::application::{PriorityStrategy, RunQueueOptions};
use runqueue_core::domain::{AbortReason, DequeueResult};

#[tokio::test]
async fn test_weighted_selection_serves_every_tenant() {
    let h = harness().await;
    let big = env("env_big", "org_big");
    let small = env("env_small", "org_small");

    // A deep backlog next to a small one
    for i in 0..60 {
        h.enqueue(&big, &format!("big_{}", i), "jobs", 1_000).await;
    }
    for i in 0..10 {
        h.enqueue(&small, &format!("small_{}", i), "jobs", 1_000).await;
    }

    let mut served: HashMap<String, usize> = HashMap::new();
    for _ in 0..40 {
        let claimed = h.claim("c1").await;
        *served.entry(claimed.payload.org_id.clone()).or_default() += 1;
        h.run_queue.acknowledge(&claimed.claim_token).await.unwrap();
        h.clock.advance(10);
    }

    let small_served = served.get("org_small").copied().unwrap_or(0);
    let big_served = served.get("org_big").copied().unwrap_or(0);
    assert_eq!(small_served + big_served, 40);
    assert!(small_served > 0, "small tenant starved: {:?}", served);
    assert!(big_served > 0, "big tenant starved: {:?}", served);
}

#[tokio::test]
async fn test_oldest_first_picks_the_longest_waiting_lane() {
    let h = harness_with(PriorityStrategy::oldest_first(), RunQueueOptions::default()).await;
    let a = env("env_a", "org_1");
    let b = env("env_b", "org_2");
    let c = env("env_c", "org_3");

    h.enqueue(&a, "run_a", "jobs", 1_000).await;
    h.enqueue(&b, "run_b", "jobs", 5_000).await;
    h.enqueue(&c, "run_c", "jobs", 3_000).await;

    let order: Vec<String> = {
        let mut order = Vec::new();
        for _ in 0..3 {
            let claimed = h.claim("c1").await;
            order.push(claimed.payload.run_id.clone());
        }
        order
    };
    assert_eq!(order, vec!["run_b", "run_c", "run_a"]);
}

#[tokio::test]
async fn test_full_lane_is_skipped_for_one_with_headroom() {
    let h = harness_with(PriorityStrategy::oldest_first(), RunQueueOptions::default()).await;
    let a = env("env_a", "org_1");
    let b = env("env_b", "org_2");
    h.run_queue
        .update_queue_concurrency_limit(&a, "jobs", 1)
        .await
        .unwrap();

    // env_a is older but can only run one at a time
    h.enqueue(&a, "a_1", "jobs", 9_000).await;
    h.enqueue(&a, "a_2", "jobs", 8_000).await;
    h.enqueue(&b, "b_1", "jobs", 1_000).await;

    assert_eq!(h.claim("c1").await.payload.run_id, "a_1");
    assert_eq!(h.claim("c1").await.payload.run_id, "b_1");
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));
}

#[tokio::test]
async fn test_cursor_sweeps_past_a_blocked_window() {
    let options = RunQueueOptions {
        queue_selection_count: 2,
        ..RunQueueOptions::default()
    };
    let h = harness_with(PriorityStrategy::oldest_first(), options).await;

    // Six tenants; the two oldest lanes sit at the front of the parent index but are blocked
    let envs: Vec<_> = (0..6)
        .map(|i| env(&format!("env_{}", i), &format!("org_{}", i)))
        .collect();
    for (i, e) in envs.iter().enumerate() {
        h.enqueue(e, &format!("run_{}", i), "jobs", 10_000 - i as i64 * 1_000)
            .await;
    }
    for e in &envs[..2] {
        h.run_queue
            .update_queue_concurrency_limit(e, "jobs", 0)
            .await
            .unwrap();
    }

    // First window holds only blocked lanes
    assert_eq!(h.poll("c1").await, DequeueResult::Abort(AbortReason::NoCapacity));

    // The cursor moved on, so the next poll reaches the following window
    let claimed = h.claim("c1").await;
    assert_eq!(claimed.payload.run_id, "run_2");

    // A different consumer keeps its own cursor and starts at the front again
    assert_eq!(h.poll("c2").await, DequeueResult::Abort(AbortReason::NoCapacity));

    // Sweeping covers every unblocked lane
    let mut rest = Vec::new();
    for _ in 0..10 {
        if let DequeueResult::Claimed(message) = h.poll("c1").await {
            rest.push(message.payload.run_id.clone());
        }
    }
    rest.sort();
    assert_eq!(rest, vec!["run_3", "run_4", "run_5"]);
}

#[tokio::test]
async fn test_age_bias_favours_long_waiting_lane() {
    let h = harness_with(PriorityStrategy::weighted(Some(11)), RunQueueOptions::default()).await;
    let old = env("env_old", "org_old");
    let fresh = env("env_fresh", "org_fresh");

    for i in 0..200 {
        h.enqueue(&old, &format!("old_{}", i), "jobs", 600_000).await;
        h.enqueue(&fresh, &format!("fresh_{}", i), "jobs", 1_000).await;
    }

    let mut old_served = 0;
    for _ in 0..100 {
        let claimed = h.claim("c1").await;
        if claimed.payload.org_id == "org_old" {
            old_served += 1;
        }
        h.run_queue.acknowledge(&claimed.claim_token).await.unwrap();
    }

    // The old lane weighs about twice the fresh one
    assert!(old_served > 50, "old lane served {} of 100", old_served);
}
