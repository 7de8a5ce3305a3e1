//! Daemon command for running Herald's delivery pipeline.
//!
//! The daemon runs three tasks over one shared set of services:
//! - the HTTP API (clients and operators)
//! - the publication worker (consumes due jobs)
//! - the overdue sweeper (re-enqueues posts whose jobs were lost)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use herald_publisher::HttpPublisher;
use herald_queue::{DelayQueue, MemoryDelayQueue, QueueConfig, SystemClock};
use herald_scheduler::{
    Admin, Context, OverdueSweeper, PublicationWorker, RemoteMaintenance, Scheduler,
    SchedulerConfig,
};
use herald_store::FilePostStore;
use herald_web::AppState;
use miette::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Default API listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub store_path: PathBuf,
    pub publisher_url: String,
    pub listen_addr: SocketAddr,
    /// Jobs published in parallel (default 4).
    pub worker_concurrency: Option<usize>,
    /// Seconds between overdue sweeps (default 60).
    pub sweep_interval: Option<u64>,
    /// Lead time in seconds below which a publish time gets a warning (default 300).
    pub min_lead_time: Option<u64>,
    /// Attempts per job (default 3).
    pub max_attempts: Option<u32>,
    /// First retry delay in seconds (default 30).
    pub backoff_base: Option<u64>,
    pub allow_past_schedules: bool,
}

impl DaemonConfig {
    fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            min_lead_time: self
                .min_lead_time
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_lead_time),
            allow_past_schedules: self.allow_past_schedules,
            worker_concurrency: self
                .worker_concurrency
                .unwrap_or(defaults.worker_concurrency)
                .max(1),
            sweep_interval: self
                .sweep_interval
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval)
                .max(Duration::from_secs(1)),
        }
    }

    fn queue_config(&self) -> QueueConfig {
        let defaults = QueueConfig::default();
        QueueConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff_base: self
                .backoff_base
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_base),
            backoff_max: defaults.backoff_max,
        }
    }
}

/// Run the daemon until ctrl-c.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let scheduler_config = config.scheduler_config();
    let queue_config = config.queue_config();

    if scheduler_config.allow_past_schedules {
        warn!("past publish times are accepted; do not use this in production");
    }

    let store = FilePostStore::open(&config.store_path)
        .await
        .map_err(|e| miette::miette!("failed to open post store: {}", e))?;
    let queue = Arc::new(MemoryDelayQueue::new(queue_config));
    let publisher = Arc::new(HttpPublisher::new(&config.publisher_url));

    let ctx = Context::new(Arc::new(store), queue.clone(), Arc::new(SystemClock));
    let scheduler = Scheduler::new(ctx.clone(), scheduler_config.clone());
    let sweeper = OverdueSweeper::new(ctx.clone(), scheduler.clone(), scheduler_config.clone());
    let worker = Arc::new(PublicationWorker::new(
        ctx.clone(),
        publisher.clone(),
        scheduler_config,
    ));

    // The queue is in-memory, so every start is a cold start
    recover_on_start(&scheduler, &sweeper).await;

    let state = Arc::new(AppState {
        admin: Admin::new(queue.clone(), scheduler.clone(), sweeper.clone()),
        remote: RemoteMaintenance::new(ctx, publisher),
        scheduler,
    });

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let sweeper_rx = shutdown_rx.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_rx).await });

    let mut server_rx = shutdown_rx;
    let server_result = herald_web::run_server(state, config.listen_addr, async move {
        while !*server_rx.borrow() {
            if server_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    // The server only returns early on error; stop everything else with it
    if let Err(e) = &server_result {
        error!(error = %e, "API server failed");
    }
    let _ = shutdown_tx.send(true);

    let _ = worker_handle.await;
    let _ = sweeper_handle.await;
    queue.close().await;

    server_result.map_err(|e| miette::miette!("API server failed: {}", e))?;

    info!("daemon shut down gracefully");
    Ok(())
}

/// Reconcile the store with an empty queue: report orphans, re-enqueue
/// future posts and recover overdue ones.
async fn recover_on_start(scheduler: &Scheduler, sweeper: &OverdueSweeper) {
    match sweeper.check_missed().await {
        Ok(report) if report.missed_count > 0 => {
            info!(missed = report.missed_count, "found scheduled posts without jobs");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to check for missed posts"),
    }

    if let Err(e) = scheduler.initialize().await {
        error!(error = %e, "failed to restore scheduled jobs");
    }

    if let Err(e) = sweeper.check_overdue().await {
        error!(error = %e, "failed to enqueue overdue recovery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DaemonConfig {
        DaemonConfig {
            store_path: PathBuf::from("posts.json"),
            publisher_url: "http://localhost:9000".to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.parse().unwrap(),
            worker_concurrency: None,
            sweep_interval: None,
            min_lead_time: None,
            max_attempts: None,
            backoff_base: None,
            allow_past_schedules: false,
        }
    }

    #[test]
    fn test_defaults() {
        let config = config();

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.min_lead_time, Duration::from_secs(300));
        assert_eq!(scheduler.worker_concurrency, 4);
        assert_eq!(scheduler.sweep_interval, Duration::from_secs(60));
        assert!(!scheduler.allow_past_schedules);

        let queue = config.queue_config();
        assert_eq!(queue.max_attempts, 3);
        assert_eq!(queue.backoff_base, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_are_clamped() {
        let config = DaemonConfig {
            worker_concurrency: Some(0),
            sweep_interval: Some(0),
            max_attempts: Some(0),
            backoff_base: Some(5),
            min_lead_time: Some(60),
            ..config()
        };

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.worker_concurrency, 1);
        assert_eq!(scheduler.sweep_interval, Duration::from_secs(1));
        assert_eq!(scheduler.min_lead_time, Duration::from_secs(60));

        let queue = config.queue_config();
        assert_eq!(queue.max_attempts, 1);
        assert_eq!(queue.backoff_base, Duration::from_secs(5));
    }
}
