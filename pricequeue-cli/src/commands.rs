//! CLI command definitions and dispatch.
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, TimeDelta};
use clap::{Args, Parser, Subcommand};
use pricequeue::{
    api,
    backoff::{BackoffStrategy, Jitter, RetryPolicy},
    job::{builder::EnqueueOptions, query::ListQuery, JobId, JobStatus, JobType},
    schedule::DispatchSchedule,
    tasks, Dispatcher, JobQueue,
};
use pricequeue_sqlx::PgBackend;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::{config::AppConfig, loader::ScriptPriceLoader};

/// Operates the market data job queue.
#[derive(Debug, Parser)]
#[command(name = "pricequeue", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file, `pricequeue.toml` is read when present
    #[arg(short, long)]
    pub config: Option<String>,

    /// Overrides the configured database url
    #[arg(long)]
    pub database_url: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply the database schema
    Migrate,
    /// Enqueue a job
    Enqueue(EnqueueArgs),
    /// List jobs, most recent first
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        job_type: Option<JobType>,
        #[arg(long, default_value_t = ListQuery::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Show a single job
    Show { job_id: i32 },
    /// Claim and execute the next eligible job
    Process {
        /// Seconds before the job is failed with a timeout, defaults to the configured value
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Delete a pending or failed job
    Delete { job_id: i32 },
    /// Hold a pending job back from dispatch
    Pause { job_id: i32 },
    /// Make a paused job eligible again
    Resume { job_id: i32 },
    /// Print queue statistics
    Stats,
    /// Process jobs on a cron schedule until interrupted
    Run {
        /// Cron expression with a seconds field, e.g. "0 * * * * *"
        #[arg(long)]
        cron: String,
        /// Maximum number of jobs processed per tick
        #[arg(long, default_value_t = 1)]
        batch_size: usize,
    },
    /// Handle one JSON request read from stdin
    Api,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// stock_load, portfolio_load or data_chunk
    pub job_type: JobType,
    /// Ticker symbol, repeat for a portfolio
    #[arg(long = "symbol", required = true)]
    pub symbols: Vec<String>,
    #[arg(long)]
    pub start_date: Option<NaiveDate>,
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,
    #[arg(long, default_value_t = EnqueueOptions::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u16,
}

impl EnqueueArgs {
    fn payload(&self) -> serde_json::Value {
        json!({
            "symbols": self.symbols,
            "start_date": self.start_date,
            "end_date": self.end_date,
        })
    }

    fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            max_attempts: self.max_attempts,
            ..Default::default()
        }
    }
}

struct Services {
    config: AppConfig,
    queue: JobQueue<PgBackend>,
    dispatcher: Dispatcher<PgBackend>,
}

impl Services {
    async fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let backend = PgBackend::connect(&config.database_url, config.max_connections)
            .await
            .context("Failed to connect to the database")?;
        let loader = ScriptPriceLoader::new(&config.loader_program, &config.loader_script);
        let dispatcher = Dispatcher::new(backend.clone(), tasks::registry(loader))
            .with_retry_policy(retry_policy(&config));
        Ok(Self {
            queue: JobQueue::new(backend),
            dispatcher,
            config,
        })
    }

    fn timeout(&self, seconds: Option<u64>) -> Duration {
        Duration::from_secs(seconds.unwrap_or(self.config.default_timeout_seconds))
    }
}

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    match config.retry_backoff_seconds {
        Some(seconds) => {
            let base = i64::try_from(seconds)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX);
            RetryPolicy::with_backoff(
                BackoffStrategy::exponential(base)
                    .with_max(TimeDelta::hours(6))
                    .with_jitter(Jitter::Relative(0.1)),
            )
        }
        None => RetryPolicy::immediate(),
    }
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    pub async fn execute(self, mut config: AppConfig) -> anyhow::Result<()> {
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        let ctx = Services::connect(config).await?;

        match self.command {
            Command::Migrate => {
                ctx.queue.backend().migrate().await?;
                print(&json!({ "migrated": true }))
            }
            Command::Enqueue(args) => {
                let job_id = ctx
                    .queue
                    .enqueue(args.job_type.as_str(), args.payload(), args.options())
                    .await?;
                print(&json!({ "job_id": job_id }))
            }
            Command::List {
                status,
                job_type,
                limit,
            } => {
                let query = ListQuery {
                    status,
                    job_type,
                    limit,
                };
                print(&ctx.queue.list_jobs(&query).await?)
            }
            Command::Show { job_id } => print(&ctx.queue.get_job(JobId::from(job_id)).await?),
            Command::Process { timeout } => {
                let outcome = ctx
                    .dispatcher
                    .process_next_job(ctx.timeout(timeout))
                    .await?;
                print(&outcome)
            }
            Command::Delete { job_id } => {
                ctx.queue.delete_job(JobId::from(job_id)).await?;
                print(&json!({ "job_id": job_id }))
            }
            Command::Pause { job_id } => {
                ctx.queue.pause_job(JobId::from(job_id)).await?;
                print(&json!({ "job_id": job_id }))
            }
            Command::Resume { job_id } => {
                ctx.queue.resume_job(JobId::from(job_id)).await?;
                print(&json!({ "job_id": job_id }))
            }
            Command::Stats => print(&ctx.queue.statistics().await?),
            Command::Run { cron, batch_size } => {
                let handle = DispatchSchedule::parse(ctx.dispatcher.clone(), &cron)?
                    .with_timeout(ctx.timeout(None))
                    .with_batch_size(batch_size)
                    .spawn();
                tracing::info!(%cron, "Dispatch schedule started");
                tokio::signal::ctrl_c().await?;
                tracing::info!("Shutting down");
                handle.graceful_shutdown().await?;
                Ok(())
            }
            Command::Api => {
                let mut request = String::new();
                tokio::io::stdin().read_to_string(&mut request).await?;
                let response = api::handle_json(&ctx.queue, &ctx.dispatcher, &request).await;
                let success = response.is_success();
                print(response.body())?;
                if !success {
                    anyhow::bail!("Request failed with status {}", response.status_code());
                }
                Ok(())
            }
        }
    }
}
