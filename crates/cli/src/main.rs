//! Run queue CLI - command-line interface for the run queue daemon

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use runqueue_core::domain::{AuthenticatedEnvironment, EnvironmentType, MessagePayload};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9640";

#[derive(Parser)]
#[command(name = "runqueue")]
#[command(about = "Multi-tenant run queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "RUNQUEUE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

/// Tenant environment the command acts for
#[derive(Args, Debug, Clone)]
struct EnvArgs {
    /// Environment ID
    #[arg(long = "env", env = "RUNQUEUE_ENV_ID")]
    env_id: Option<String>,

    /// Environment type (DEVELOPMENT, STAGING, PRODUCTION, PREVIEW)
    #[arg(long, env = "RUNQUEUE_ENV_TYPE", default_value = "DEVELOPMENT", value_parser = parse_env_type)]
    env_type: EnvironmentType,

    /// Organization ID
    #[arg(long, env = "RUNQUEUE_ORG_ID")]
    org: Option<String>,

    /// Project ID
    #[arg(long, env = "RUNQUEUE_PROJECT_ID")]
    project: Option<String>,
}

fn parse_env_type(s: &str) -> Result<EnvironmentType, String> {
    s.to_ascii_uppercase().parse().map_err(|e| format!("{}", e))
}

impl EnvArgs {
    fn environment(&self) -> Result<AuthenticatedEnvironment> {
        let env_id = self.env_id.as_deref().context("--env is required")?;
        let org = self.org.as_deref().context("--org is required")?;
        let project = self.project.as_deref().context("--project is required")?;
        Ok(AuthenticatedEnvironment::new(
            env_id,
            self.env_type,
            org,
            project,
        )?)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LimitScope {
    Queue,
    Environment,
    Project,
    Task,
    Organization,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a message
    Enqueue {
        #[command(flatten)]
        env: EnvArgs,

        /// Task identifier
        #[arg(short, long)]
        task: String,

        /// Logical queue name
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Run ID (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Concurrency key (splits the queue into lanes)
        #[arg(long)]
        concurrency_key: Option<String>,

        /// Delay before the message becomes visible
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },

    /// Claim one message
    Dequeue {
        #[command(flatten)]
        env: EnvArgs,

        /// Shared parent queue key (instead of an environment)
        #[arg(long, conflicts_with_all = ["env_id", "org", "project"])]
        parent_queue: Option<String>,

        /// Consumer ID (owns the scan cursor)
        #[arg(short, long, default_value = "runqueue-cli")]
        consumer: String,
    },

    /// Acknowledge a claim
    Ack {
        claim_token: String,
    },

    /// Negatively acknowledge a claim
    Nack {
        claim_token: String,

        /// Retry delay
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Drop the message instead of retrying
        #[arg(long)]
        abandon: bool,
    },

    /// Extend a claim's lease
    Heartbeat {
        claim_token: String,

        #[arg(long)]
        extend_ms: Option<u64>,
    },

    /// Set, remove or disable concurrency limits
    Limit {
        #[arg(value_enum)]
        scope: LimitScope,

        #[command(flatten)]
        env: EnvArgs,

        /// New limit; omit on the queue scope to remove the limit
        #[arg(short, long)]
        limit: Option<u32>,

        /// Queue name (queue scope)
        #[arg(short, long)]
        queue: Option<String>,

        /// Task identifier (task scope)
        #[arg(short, long)]
        task: Option<String>,

        /// Disable or re-enable an organization
        #[arg(long)]
        disabled: Option<bool>,
    },

    /// Show running and queued counts of an environment
    Concurrency {
        #[command(flatten)]
        env: EnvArgs,
    },

    /// Show system status
    Status,

    /// Run maintenance operations
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct EnqueueResult {
    run_id: String,
    queue_key: String,
}

#[derive(Deserialize, Tabled)]
struct QueueRow {
    queue: String,
    queued: u64,
    running: u64,
    limit: u32,
    #[tabled(display_with = "display_age")]
    oldest_age_ms: Option<u64>,
}

fn display_age(age: &Option<u64>) -> String {
    match age {
        Some(ms) => format!("{:.1}s", *ms as f64 / 1000.0),
        None => "-".to_string(),
    }
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn now_millis() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64)
}

fn limit_target(
    scope: LimitScope,
    env: &EnvArgs,
    queue: Option<String>,
    task: Option<String>,
) -> Result<serde_json::Value> {
    Ok(match scope {
        LimitScope::Queue => json!({
            "scope": "queue",
            "environment": env.environment()?,
            "queue": queue.context("--queue is required for the queue scope")?,
        }),
        LimitScope::Environment => json!({
            "scope": "environment",
            "environment": env.environment()?,
        }),
        LimitScope::Project => json!({
            "scope": "project",
            "environment": env.environment()?,
        }),
        LimitScope::Task => json!({
            "scope": "task",
            "environment": env.environment()?,
            "task_identifier": task.context("--task is required for the task scope")?,
        }),
        LimitScope::Organization => json!({
            "scope": "organization",
            "org_id": env.org.clone().context("--org is required")?,
        }),
    })
}

fn mb(bytes: &serde_json::Value) -> f64 {
    bytes.as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            env,
            task,
            queue,
            run_id,
            concurrency_key,
            delay_ms,
        } => {
            let environment = env.environment()?;
            let run_id = run_id.unwrap_or_else(|| format!("run_{}", uuid::Uuid::new_v4().simple()));
            let mut payload = MessagePayload::new(
                run_id,
                task,
                &environment,
                queue,
                now_millis()? + delay_ms as i64,
            );
            payload.concurrency_key = concurrency_key;
            payload.validate()?;

            let params = json!({
                "environment": environment,
                "payload": payload,
            });

            let result = call_rpc(&cli.rpc_url, "queue.enqueue.v1", params).await?;
            let enqueue_result: EnqueueResult = serde_json::from_value(result)?;

            println!("{}", "✓ Message enqueued successfully".green().bold());
            println!();

            let table = Table::new(vec![enqueue_result]).to_string();
            println!("{}", table);
        }

        Commands::Dequeue {
            env,
            parent_queue,
            consumer,
        } => {
            let params = match parent_queue {
                Some(parent_queue) => json!({
                    "consumer_id": consumer,
                    "parent_queue": parent_queue,
                }),
                None => json!({
                    "consumer_id": consumer,
                    "environment": env.environment()?,
                }),
            };

            let result = call_rpc(&cli.rpc_url, "queue.dequeue.v1", params).await?;

            match result.get("message") {
                Some(message) => {
                    println!("{}", "✓ Message claimed".green().bold());
                    println!("  {} {}", "Claim token:".bold(), message["claimToken"]);
                    println!("  {} {}", "Run ID:".bold(), message["payload"]["runId"]);
                    println!("  {} {}", "Lane:".bold(), message["queueKey"]);
                    println!("  {} {}", "Attempt:".bold(), message["attempt"]);
                    println!("  {} {}", "Lease expires:".bold(), message["leaseExpiresAt"]);
                }
                None => {
                    let reason = result["abort_reason"].as_str().unwrap_or("unknown");
                    println!("{}", format!("○ Nothing claimed ({})", reason).yellow());
                }
            }
        }

        Commands::Ack { claim_token } => {
            let params = json!({ "claim_token": claim_token });
            let result = call_rpc(&cli.rpc_url, "queue.ack.v1", params).await?;

            println!(
                "{}",
                format!("✓ Run {} acknowledged", result["run_id"]).green().bold()
            );
        }

        Commands::Nack {
            claim_token,
            delay_ms,
            abandon,
        } => {
            let options = if abandon {
                json!({ "action": "abandon" })
            } else {
                json!({ "action": "retry", "delay_ms": delay_ms })
            };
            let params = json!({ "claim_token": claim_token, "options": options });
            let result = call_rpc(&cli.rpc_url, "queue.nack.v1", params).await?;

            match result["outcome"]["outcome"].as_str() {
                Some("requeued") => println!(
                    "{}",
                    format!(
                        "✓ Requeued (attempt {}, visible at {})",
                        result["outcome"]["attempt"], result["outcome"]["visible_at"]
                    )
                    .green()
                    .bold()
                ),
                _ => println!("{}", "✓ Message abandoned".green().bold()),
            }
        }

        Commands::Heartbeat {
            claim_token,
            extend_ms,
        } => {
            let params = json!({ "claim_token": claim_token, "extend_ms": extend_ms });
            let result = call_rpc(&cli.rpc_url, "queue.heartbeat.v1", params).await?;

            println!(
                "{}",
                format!("✓ Lease extended to {}", result["lease_expires_at"])
                    .green()
                    .bold()
            );
        }

        Commands::Limit {
            scope,
            env,
            limit,
            queue,
            task,
            disabled,
        } => {
            let params = json!({
                "target": limit_target(scope, &env, queue, task)?,
                "limit": limit,
                "disabled": disabled,
            });
            let result = call_rpc(&cli.rpc_url, "admin.limits.v1", params).await?;

            let limit = match result["limit"].as_u64() {
                Some(limit) => limit.to_string(),
                None => "none".to_string(),
            };
            println!(
                "{}",
                format!("✓ {} limit: {}", result["scope"].as_str().unwrap_or("?"), limit)
                    .green()
                    .bold()
            );
            if let Some(disabled) = result["disabled"].as_bool() {
                println!("  {} {}", "Disabled:".bold(), disabled);
            }
        }

        Commands::Concurrency { env } => {
            let params = json!({ "environment": env.environment()? });
            let result = call_rpc(&cli.rpc_url, "admin.concurrency.v1", params).await?;

            println!(
                "{}",
                format!("Environment {}", result["environment_id"]).cyan().bold()
            );
            println!(
                "  {} {}/{}",
                "Running:".bold(),
                result["env_current"],
                result["env_limit"]
            );
            if result["org_disabled"].as_bool().unwrap_or(false) {
                println!("  {} {}", "Organization:".bold(), "DISABLED".red());
            }
            println!();

            let rows: Vec<QueueRow> = serde_json::from_value(result["queues"].clone())?;
            if rows.is_empty() {
                println!("{}", "No queues".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Status => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Pending:".bold(), stats["pending_messages"]);
                    println!("  {} {}", "Claimed:".bold(), stats["live_claims"]);
                    println!("  {} {}", "Released:".bold(), stats["released_claims"]);
                    println!("  {} {}", "Parent queues:".bold(), stats["parent_queue_count"]);
                    println!("  {} {}", "Running lanes:".bold(), stats["running_lane_count"]);
                    println!();
                    println!("  {} {:.2} MB", "DB Size:".bold(), mb(&stats["db_size_bytes"]));
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Maintenance { force_vacuum } => {
            println!("{}", "Running maintenance...".cyan().bold());
            println!();

            if force_vacuum {
                println!("  {} Force VACUUM enabled", "•".bold());
            }

            let params = json!({ "force_vacuum": force_vacuum });

            match call_rpc(&cli.rpc_url, "admin.maintenance.v1", params).await {
                Ok(result) => {
                    println!("  ✓ Maintenance completed");
                    println!();
                    if result["vacuum_run"].as_bool().unwrap_or(false) {
                        println!("  {} VACUUM executed", "✓".green());
                    } else {
                        println!("  ○ VACUUM skipped (not needed)");
                    }
                    println!(
                        "  {} {} released claims deleted",
                        "✓".green(),
                        result["claims_deleted"]
                    );
                    println!(
                        "  {} {} leaked concurrency members dropped",
                        "✓".green(),
                        result["members_reconciled"]
                    );
                    println!();
                    let size_before_mb = mb(&result["db_size_before"]);
                    let size_after_mb = mb(&result["db_size_after"]);
                    println!(
                        "  {} {:.2} MB → {:.2} MB",
                        "DB Size:".bold(),
                        size_before_mb,
                        size_after_mb
                    );
                }
                Err(e) => {
                    println!("  {} Maintenance failed: {}", "✗".red(), e);
                }
            }
        }
    }

    Ok(())
}
