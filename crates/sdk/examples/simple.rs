//! Simple SDK Example
//!
//! Enqueues a message, claims it, heartbeats once and acknowledges it.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package runqueue-daemon
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --package runqueue-sdk --example simple
//!    ```

use runqueue_sdk::{AuthenticatedEnvironment, EnvironmentType, MessagePayload, RunQueueClient};
use std::time::{SystemTime, UNIX_EPOCH};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Run Queue SDK - Simple Example");
    println!("==============================\n");

    // 1. Connect to daemon
    println!("1. Connecting to daemon...");
    let client = RunQueueClient::connect("http://127.0.0.1:9640").await?;
    println!("   ✓ Connected\n");

    // 2. Enqueue a message
    println!("2. Enqueuing a message...");
    let env = AuthenticatedEnvironment::new(
        "env_example",
        EnvironmentType::Development,
        "org_example",
        "proj_example",
    )?;
    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64;
    let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
    let payload = MessagePayload::new(&run_id, "send-email", &env, "emails", now_ms);

    let enqueued = client.enqueue(&env, payload).await?;
    println!("   ✓ Message enqueued:");
    println!("     - Run ID: {}", enqueued.run_id);
    println!("     - Lane: {}\n", enqueued.queue_key);

    // 3. Claim it
    println!("3. Dequeuing...");
    let response = client.dequeue_from_environment(&env, "example-consumer").await?;
    let Some(message) = response.message else {
        println!("   ⚠ Nothing claimed ({:?})", response.abort_reason);
        return Ok(());
    };
    println!("   ✓ Claimed {} (attempt {})", message.payload.run_id, message.attempt);
    println!("     - Lease expires at: {}\n", message.lease_expires_at);

    // 4. Keep the lease alive while "working"
    println!("4. Heartbeat...");
    let heartbeat = client.heartbeat(&message.claim_token, Some(60_000)).await?;
    println!("   ✓ Lease extended to {}\n", heartbeat.lease_expires_at);

    // 5. Done
    println!("5. Acknowledging...");
    let ack = client.ack(&message.claim_token).await?;
    println!("   ✓ Acknowledged: {}", ack.acknowledged);

    let overview = client.concurrency(&env).await?;
    println!(
        "\nEnvironment {}: {}/{} running",
        overview.environment_id, overview.env_current, overview.env_limit
    );

    println!("\n✓ Example completed successfully!");

    Ok(())
}
