//! CLI definition for sixtask.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// sixtask CLI.
#[derive(Parser)]
#[command(name = "sixtask")]
#[command(about = "Background job scheduler and weighted worker pool")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SIXTASK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler and the worker pool until a termination signal
    Run,

    /// Run only the worker pool
    Worker,

    /// Run only the scheduler
    Scheduler,

    /// Enqueue a single job
    Enqueue {
        /// Job type handlers are looked up by
        #[arg(long)]
        job_type: String,

        /// Target queue
        #[arg(long, default_value = "default")]
        queue: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Reject the job while another with this key is live
        #[arg(long)]
        dedup_key: Option<String>,

        /// Per-job timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Cron expression utilities
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// List schedules from the configuration with their next fire time
    Schedules,
}

#[derive(Subcommand)]
pub(crate) enum CronAction {
    /// Print upcoming fire times of an expression
    Next {
        /// Cron spec, macro or `@every` interval
        expression: String,

        /// How many fire times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Require both day-of-month and day-of-week to match
        #[arg(long)]
        and_days: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "sixtask",
            "enqueue",
            "--job-type",
            "cleanup",
            "--queue",
            "planilhas",
            "--dedup-key",
            "nightly",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue {
                job_type,
                queue,
                payload,
                dedup_key,
                timeout_secs,
            } => {
                assert_eq!(job_type, "cleanup");
                assert_eq!(queue, "planilhas");
                assert_eq!(payload, "{}");
                assert_eq!(dedup_key.as_deref(), Some("nightly"));
                assert_eq!(timeout_secs, None);
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_parse_cron_next_with_global_config() {
        let cli = Cli::try_parse_from([
            "sixtask",
            "cron",
            "next",
            "*/15 * * * *",
            "-n",
            "3",
            "--config",
            "x.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Cron {
                action: CronAction::Next { expression, count, and_days },
            } => {
                assert_eq!(expression, "*/15 * * * *");
                assert_eq!(count, 3);
                assert!(!and_days);
            }
            _ => panic!("expected cron next"),
        }
    }
}
