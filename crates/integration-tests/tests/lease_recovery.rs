//! Lease expiry, reaping and maintenance

mod common;

use std::time::Duration;

use common::{env, harness, temp_database};
use runqueue_core::application::{
    shutdown_channel, ClaimReaper, PriorityStrategy, RunQueueOptions,
};
use runqueue_core::error::AppError;
use runqueue_core::port::MaintenanceConfig;

const LEASE_MS: u64 = 30_000;

async fn short_lease_harness() -> common::Harness {
    common::harness_with(
        PriorityStrategy::oldest_first(),
        RunQueueOptions {
            lease_ms: LEASE_MS,
            ..RunQueueOptions::default()
        },
    )
    .await
}

#[tokio::test]
async fn test_expired_claim_is_reaped_and_redelivered() {
    let h = short_lease_harness().await;
    let e = env("env_a", "org_1");
    h.enqueue(&e, "run_1", "emails", 10).await;

    let first = h.claim("c1").await;
    let reaper = ClaimReaper::new(h.run_queue.clone(), None, Some(10));

    // Lease still running
    assert_eq!(reaper.reap_once().await.unwrap(), 0);

    h.clock.advance(LEASE_MS as i64);
    assert_eq!(h.run_queue.list_expired_claims(10).await.unwrap().len(), 1);
    assert_eq!(reaper.reap_once().await.unwrap(), 1);

    // Capacity is back and the message is visible again
    assert_eq!(h.run_queue.current_concurrency_of_environment(&e).await.unwrap(), 0);
    let second = h.claim("c1").await;
    assert_eq!(second.payload.run_id, "run_1");
    assert_eq!(second.attempt, 2);

    // The consumer that lost its lease cannot settle it any more
    let err = h.run_queue.acknowledge(&first.claim_token).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyReleased(_)), "got {:?}", err);
    h.run_queue.acknowledge(&second.claim_token).await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_keeps_claim_alive() {
    let h = short_lease_harness().await;
    let e = env("env_a", "org_1");
    h.enqueue(&e, "run_1", "emails", 10).await;
    let claimed = h.claim("c1").await;
    let reaper = ClaimReaper::new(h.run_queue.clone(), None, None);

    for _ in 0..3 {
        h.clock.advance(LEASE_MS as i64 / 2);
        h.run_queue.heartbeat(&claimed.claim_token, None).await.unwrap();
        assert_eq!(reaper.reap_once().await.unwrap(), 0);
    }

    h.run_queue.acknowledge(&claimed.claim_token).await.unwrap();
}

#[tokio::test]
async fn test_reaper_drains_in_batches() {
    let h = short_lease_harness().await;
    let e = env("env_a", "org_1");
    for i in 0..7 {
        h.enqueue(&e, &format!("run_{}", i), &format!("q{}", i), 10).await;
    }
    for _ in 0..7 {
        h.claim("c1").await;
    }

    h.clock.advance(LEASE_MS as i64 + 1);
    let reaper = ClaimReaper::new(h.run_queue.clone(), None, Some(3));
    assert_eq!(reaper.reap_once().await.unwrap(), 7);
    assert_eq!(h.run_queue.length_of_env_queue(&e).await.unwrap(), 7);
}

#[tokio::test]
async fn test_reaper_loop_stops_on_shutdown() {
    let (url, cleanup) = temp_database("reaper");
    let h = common::harness_at(
        &url,
        4,
        PriorityStrategy::oldest_first(),
        RunQueueOptions {
            lease_ms: LEASE_MS,
            ..RunQueueOptions::default()
        },
    )
    .await;
    let e = env("env_a", "org_1");
    h.enqueue(&e, "run_1", "emails", 10).await;
    h.claim("c1").await;
    h.clock.advance(LEASE_MS as i64);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let reaper = ClaimReaper::new(
        h.run_queue.clone(),
        Some(Duration::from_millis(20)),
        None,
    );
    let handle = tokio::spawn(reaper.run(shutdown_rx));

    // Give the loop a few ticks to release the claim
    let mut released = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if h.run_queue.current_concurrency_of_environment(&e).await.unwrap() == 0 {
            released = true;
            break;
        }
    }
    assert!(released, "reaper loop never released the expired claim");

    shutdown_tx.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("reaper did not stop")
        .unwrap();

    drop(h);
    for path in cleanup {
        let _ = std::fs::remove_file(path);
    }
}

#[tokio::test]
async fn test_maintenance_collects_released_claims() {
    let h = harness().await;
    let e = env("env_a", "org_1");
    h.enqueue(&e, "run_1", "emails", 10).await;
    h.enqueue(&e, "run_2", "emails", 5).await;

    let done = h.claim("c1").await;
    h.run_queue.acknowledge(&done.claim_token).await.unwrap();
    let _running = h.claim("c1").await;

    let stats = h.maintenance.get_stats().await.unwrap();
    assert_eq!(stats.pending_messages, 0);
    assert_eq!(stats.live_claims, 1);
    assert_eq!(stats.released_claims, 1);
    assert_eq!(stats.running_lane_count, 1);

    // Not old enough yet
    let config = MaintenanceConfig {
        released_claim_retention_hours: 1,
        ..MaintenanceConfig::default()
    };
    assert_eq!(h.maintenance.gc_released_claims(1).await.unwrap(), 0);

    h.clock.advance(2 * 60 * 60 * 1000);
    let report = h.maintenance.run_full_maintenance(&config).await.unwrap();
    assert_eq!(report.deleted_claims, 1);
    assert_eq!(report.reconciled_members, 0);

    assert_eq!(report.stats.released_claims, 0);
    assert_eq!(report.stats.live_claims, 1);
}
