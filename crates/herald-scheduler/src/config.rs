//! Scheduler configuration.

use std::time::Duration;

/// Times closer than this produce a validation warning.
pub const DEFAULT_MIN_LEAD_TIME: Duration = Duration::from_secs(5 * 60);

/// Jobs processed in parallel by one worker.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// How often the sweeper looks for overdue posts.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Settings shared by the scheduling services.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_lead_time: Duration,
    /// Accept publish times in the past. For debugging only.
    pub allow_past_schedules: bool,
    pub worker_concurrency: usize,
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_lead_time: DEFAULT_MIN_LEAD_TIME,
            allow_past_schedules: false,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
