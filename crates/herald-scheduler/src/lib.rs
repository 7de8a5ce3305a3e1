//! Scheduling and delivery pipeline for Herald.
//!
//! This crate turns "publish this post at T" into a queue job and makes sure
//! the post is eventually published or clearly marked failed:
//! - [`Scheduler`] validates times and keeps queue jobs in step with post status
//! - [`PublicationWorker`] consumes due jobs and fans out to every destination
//! - [`OverdueSweeper`] recovers posts whose jobs were lost or delayed
//! - [`Admin`] exposes queue operations and stats to operators
//! - [`RemoteMaintenance`] edits or retracts posts that are already live

mod admin;
mod config;
mod context;
mod error;
mod locks;
mod remote;
mod scheduler;
mod sweeper;
mod types;
mod worker;

pub use admin::{Admin, CleanRequest, QueueStats, StateJobs};
pub use config::{
    DEFAULT_MIN_LEAD_TIME, DEFAULT_SWEEP_INTERVAL, DEFAULT_WORKER_CONCURRENCY, SchedulerConfig,
};
pub use context::Context;
pub use error::SchedulerError;
pub use locks::PostLocks;
pub use remote::{ContentUpdate, MaintenanceReport, RemoteMaintenance};
pub use scheduler::Scheduler;
pub use sweeper::{MissedPost, MissedReport, OverdueReport, OverdueSweeper};
pub use types::{
    CreatedPost, InitializeReport, JobPayload, NewDestination, NewPost, PublicationReport,
    PublishOutcome, RECOVERY_JOB_ID, RescheduleOutcome, ScheduleValidation, SkipReason,
    UnscheduleOutcome, publish_job_id,
};
pub use worker::PublicationWorker;
