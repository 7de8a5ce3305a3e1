//! CLI for Herald operators.
//!
//! Talks to a running daemon over its `/admin` HTTP API: queue statistics,
//! job retries and removal, pausing, and recovery of overdue or missed posts.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use herald_queue::{JobState, QueuedJob};
use miette::{IntoDiagnostic, Result};

mod client;

use client::AdminClient;

/// CLI for Herald operators.
#[derive(Parser)]
#[command(name = "herald-admin", about = "Operate a Herald daemon")]
struct Cli {
    /// Daemon API URL
    #[arg(long, env = "HERALD_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show job counts and the most recent jobs per state
    Stats {
        /// Jobs to show per state
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Re-enqueue jobs for scheduled posts that lost theirs
    Initialize,
    /// Enqueue recovery for posts past their publish time
    CheckOverdue,
    /// List scheduled posts without a job
    CheckMissed,
    /// Give a failed job a fresh set of attempts
    RetryJob {
        /// Job id (e.g. publish:<post id>)
        job_id: String,
    },
    /// Remove a job that is not running
    RemoveJob {
        /// Job id
        job_id: String,
    },
    /// Remove old jobs in one state
    Clean {
        /// waiting, completed or failed
        #[arg(long, default_value = "completed")]
        state: JobState,
        /// Only jobs older than this many seconds
        #[arg(long, default_value = "86400")]
        max_age: u64,
        /// Remove at most this many jobs (0 = no limit)
        #[arg(long, default_value = "0")]
        max_count: usize,
    },
    /// Stop handing out jobs
    Pause,
    /// Resume handing out jobs
    Resume,
    /// Give up on a post without publishing it
    MarkFailed {
        /// Post id
        post_id: String,
        /// Reason stored on every unpublished destination
        #[arg(long)]
        reason: String,
    },
    /// Move a post to a new publish time
    Reschedule {
        /// Post id
        post_id: String,
        /// New time (RFC 3339, must be in the future)
        #[arg(long)]
        at: DateTime<Utc>,
    },
}

fn display_job(job: &QueuedJob) {
    let when = match job.state {
        JobState::Waiting => format!("runs {}", job.run_at.format("%Y-%m-%d %H:%M:%S UTC")),
        JobState::Active => match job.started_at {
            Some(at) => format!("started {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => "running".to_string(),
        },
        JobState::Completed | JobState::Failed => match job.finished_at {
            Some(at) => format!("finished {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => String::new(),
        },
    };

    println!(
        "  {} [attempt {}/{}] {}",
        job.id, job.attempts, job.max_attempts, when
    );
    if let Some(error) = &job.last_error {
        println!("    Error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = AdminClient::new(&cli.url);

    match cli.command {
        Commands::Stats { limit } => {
            let stats = client.stats(limit).await.into_diagnostic()?;

            println!(
                "Queue{}: {} waiting, {} active, {} completed, {} failed",
                if stats.counts.paused { " (paused)" } else { "" },
                stats.counts.waiting,
                stats.counts.active,
                stats.counts.completed,
                stats.counts.failed,
            );

            for state in JobState::ALL {
                let jobs = stats.jobs.get(state);
                if jobs.is_empty() {
                    continue;
                }
                println!("\n{} (latest {}):", state, jobs.len());
                for job in jobs {
                    display_job(job);
                }
            }
        }
        Commands::Initialize => {
            let report = client.initialize().await.into_diagnostic()?;
            println!(
                "Enqueued {} job(s); {} post(s) already had one.",
                report.scheduled_count, report.already_queued
            );
        }
        Commands::CheckOverdue => {
            let report = client.check_overdue().await.into_diagnostic()?;
            match report.job_id {
                Some(job_id) => println!(
                    "{} overdue post(s), recovering in job {}.",
                    report.post_count, job_id
                ),
                None => println!("No overdue posts."),
            }
        }
        Commands::CheckMissed => {
            let report = client.check_missed().await.into_diagnostic()?;
            if report.missed_count == 0 {
                println!("No missed posts.");
                return Ok(());
            }

            println!("{} scheduled post(s) without a job:", report.missed_count);
            for post in &report.missed {
                match post.scheduled_at {
                    Some(at) => println!("  {} (due {})", post.post_id, at.to_rfc3339()),
                    None => println!("  {}", post.post_id),
                }
            }
            println!("\nRun `herald-admin initialize` and `herald-admin check-overdue` to recover them.");
        }
        Commands::RetryJob { job_id } => {
            let job = client.retry_job(&job_id).await.into_diagnostic()?;
            println!("Retrying {} at {}.", job.id, job.run_at.to_rfc3339());
        }
        Commands::RemoveJob { job_id } => {
            client.remove_job(&job_id).await.into_diagnostic()?;
            println!("Removed {}.", job_id);
        }
        Commands::Clean {
            state,
            max_age,
            max_count,
        } => {
            let cleaned = client
                .clean(state, max_age, max_count)
                .await
                .into_diagnostic()?;
            println!("Removed {} {} job(s).", cleaned.removed.len(), state);
        }
        Commands::Pause => {
            client.pause().await.into_diagnostic()?;
            println!("Queue paused.");
        }
        Commands::Resume => {
            client.resume().await.into_diagnostic()?;
            println!("Queue resumed.");
        }
        Commands::MarkFailed { post_id, reason } => {
            client
                .mark_failed(&post_id, &reason)
                .await
                .into_diagnostic()?;
            println!("Marked {} as failed.", post_id);
        }
        Commands::Reschedule { post_id, at } => {
            let outcome = client.reschedule(&post_id, at).await.into_diagnostic()?;
            match outcome.old_time {
                Some(old) => println!(
                    "Moved {} from {} to {} (job {}).",
                    post_id,
                    old.to_rfc3339(),
                    outcome.new_time.to_rfc3339(),
                    outcome.job_id
                ),
                None => println!(
                    "Scheduled {} for {} (job {}).",
                    post_id,
                    outcome.new_time.to_rfc3339(),
                    outcome.job_id
                ),
            }
        }
    }

    Ok(())
}
