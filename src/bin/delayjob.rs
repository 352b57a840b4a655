//! delayjob CLI: operator interface to a job database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use delayjob::config::Config;
use delayjob::model::{NO_JOB_ID, NO_TIMEOUT, Payload, now_millis};
use delayjob::telemetry::{TelemetryConfig, init_telemetry};
use delayjob::{
    HandlerRegistry, JobBuilder, JobHandler, JobStore, JsonCodec, Scheduler, SqliteJobStore,
};
use opentelemetry::KeyValue;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "delayjob", about = "Durable delayed-job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler with the built-in handlers until Ctrl-C
    Serve,
    /// Persist a job for the serve process to pick up
    Schedule {
        /// Handler identifier
        handler: String,
        /// Job id, scoped to the handler
        #[arg(long, default_value_t = NO_JOB_ID, allow_hyphen_values = true)]
        id: i64,
        /// Delay before the first attempt, in milliseconds
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        delay: i64,
        /// Retries after a failed attempt
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        retries: i32,
        /// Delay before each retry, in milliseconds
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        retry_delay: i64,
        /// Absolute timeout, epoch milliseconds
        #[arg(long, default_value_t = NO_TIMEOUT, allow_hyphen_values = true)]
        timeout_at: i64,
        /// Replace pending jobs with the same handler and id
        #[arg(long)]
        replace: bool,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// List pending jobs in due order
    List,
    /// Remove pending jobs by handler and id
    Remove {
        handler: String,
        #[arg(allow_hyphen_values = true)]
        id: i64,
    },
}

/// Context handed to handlers in the serve process.
struct Host {
    started_at: DateTime<Utc>,
}

/// Logs the payload. Never fails.
struct LogHandler;

#[async_trait]
impl JobHandler<Host> for LogHandler {
    async fn perform_job(&self, host: &Host, payload: &Payload) -> bool {
        let uptime_s = (Utc::now() - host.started_at).num_seconds();
        info!(uptime_s, %payload, "log job");
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Schedule {
            handler,
            id,
            delay,
            retries,
            retry_delay,
            timeout_at,
            replace,
            payload,
        } => {
            let payload: Payload = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };
            let job = JobBuilder::new(handler, payload)
                .with_id(id)
                .with_delay(delay)?
                .with_retry_count(retries)?
                .with_retry_delay(retry_delay)?
                .with_timeout(timeout_at)?
                .replace_previous(replace);
            cmd_schedule(&config, job)
        }
        Command::List => cmd_list(&config),
        Command::Remove { handler, id } => cmd_remove(&config, &handler, id),
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "delayjob".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = Arc::new(SqliteJobStore::open(&config.db_path)?);
    let registry: HandlerRegistry<Host> = HandlerRegistry::empty().register("log", LogHandler);
    let scheduler = Scheduler::new(store, registry, config.scheduler());

    scheduler.initialize(Host {
        started_at: Utc::now(),
    })?;
    info!(db = %config.db_path.display(), "serving");

    // Rows scheduled by other processes are only seen by a sweep.
    let mut poll = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                delayjob::telemetry::metrics::wakeups().add(1, &[KeyValue::new("trigger", "poll")]);
                if let Err(e) = scheduler.run_due_jobs(now_millis()) {
                    error!("poll sweep error: {e}");
                }
            }
        }
    }

    scheduler.shutdown();
    Ok(())
}

fn cmd_schedule(config: &Config, job: JobBuilder) -> anyhow::Result<()> {
    let job = job.build();
    let store = SqliteJobStore::open(&config.db_path)?;

    if job.replace_previous() {
        let replaced = store.delete_by_handler_and_id(job.handler(), job.job_id())?;
        if replaced > 0 {
            println!("Replaced {replaced} pending job(s)");
        }
    }

    let row = job.to_row(now_millis(), &JsonCodec)?;
    store.insert(&row)?;
    println!(
        "Scheduled {} #{} due {}",
        row.handler,
        row.job_id,
        format_millis(row.due_at)
    );
    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = SqliteJobStore::open(&config.db_path)?;
    let rows = store.list()?;

    if rows.is_empty() {
        println!("No pending jobs.");
        return Ok(());
    }

    println!("{:<20}  {:<10}  DUE", "HANDLER", "ID");
    println!("{}", "-".repeat(60));
    for row in &rows {
        println!(
            "{:<20}  {:<10}  {}",
            row.handler,
            row.job_id,
            format_millis(row.due_at)
        );
    }

    println!("\n{} job(s)", rows.len());
    Ok(())
}

fn cmd_remove(config: &Config, handler: &str, id: i64) -> anyhow::Result<()> {
    let store = SqliteJobStore::open(&config.db_path)?;
    let removed = store.delete_by_handler_and_id(handler, id)?;
    println!("Removed {removed} pending job(s)");
    Ok(())
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}
