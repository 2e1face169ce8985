//! sixtask - background job scheduler and weighted worker pool.
//!
//! Main entry point for the sixtask CLI.

mod cli;
mod jobs;
mod logging;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use sixtask_config::{Config, ConfigLoader};
use sixtask_cron::{DayMatching, Schedule};
use sixtask_daemon::{DaemonError, Engine, RunMode};
use sixtask_scheduler::Timezone;
use sixtask_workqueue::{Job, JobOptions, QueueError};

use crate::cli::{Cli, Commands, CronAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `cron next` needs neither config nor logging
    if let Commands::Cron { action } = &cli.command {
        return cron_command(action);
    }

    let config = ConfigLoader::load_or_default(cli.config.as_deref())
        .context("loading configuration")?;
    logging::init_tracing(&config.logging)?;
    info!("Starting sixtask v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run => run(config, RunMode::All).await,
        Commands::Worker => run(config, RunMode::Worker).await,
        Commands::Scheduler => run(config, RunMode::Scheduler).await,
        Commands::Enqueue {
            job_type,
            queue,
            payload,
            dedup_key,
            timeout_secs,
        } => {
            let options = JobOptions {
                dedup_key,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            enqueue(config, job_type, queue, payload, options).await
        }
        Commands::Schedules => list_schedules(config).await,
        Commands::Cron { .. } => Ok(()),
    }
}

/// Run until a termination signal. A forced shutdown exits with status 1.
async fn run(config: Config, mode: RunMode) -> anyhow::Result<()> {
    let engine = Engine::from_config(config, jobs::handlers()).await?;
    info!(
        "Engine ready: {} schedule(s), {} worker(s), queues {:?}",
        engine.registry().len(),
        engine.config().worker.concurrency,
        engine.config().worker.queues
    );

    match engine.run_until_signal(mode).await {
        Ok(report) => {
            info!("Stopped cleanly in {:?}", report.elapsed);
            Ok(())
        }
        Err(err @ DaemonError::ShutdownTimeout { .. }) => {
            error!("{}", err);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

async fn enqueue(
    config: Config,
    job_type: String,
    queue: String,
    payload: String,
    options: JobOptions,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&payload).context("payload must be valid JSON")?;
    let job = Job::json(job_type, &payload)?.with_options(options);

    let engine = Engine::from_config(config, jobs::handlers()).await?;
    match engine.client().enqueue(job, &queue).await {
        Ok(id) => {
            println!("{}", id);
            Ok(())
        }
        Err(QueueError::DuplicateJob(key)) => {
            warn!("A job with dedup key '{}' is still live, nothing enqueued", key);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn list_schedules(config: Config) -> anyhow::Result<()> {
    let engine = Engine::from_config(config, jobs::handlers()).await?;
    for entry in engine.registry().entries() {
        let next = entry
            .next_fire
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{}\t{} -> {}\tnext: {}",
            entry.id, entry.expression, entry.job_type, entry.queue, next
        );
    }
    Ok(())
}

fn cron_command(action: &CronAction) -> anyhow::Result<()> {
    match action {
        CronAction::Next {
            expression,
            count,
            and_days,
        } => {
            let matching = if *and_days {
                DayMatching::And
            } else {
                DayMatching::Or
            };
            let schedule = Schedule::parse_with(expression, matching)?;

            let now = Timezone::Utc.now();
            let mut t = now;
            for _ in 0..*count {
                match schedule.next_fire_after(t, now) {
                    Some(next) => {
                        println!("{}", next);
                        t = next;
                    }
                    None => break,
                }
            }
            Ok(())
        }
    }
}
