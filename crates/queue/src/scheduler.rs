//! Scheduled jobs for periodic maintenance tasks.

#![allow(missing_docs)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use lounge_common::Config;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    /// Expire active polls whose deadline passed without their timer firing.
    SweepExpiredPolls,
    /// Flag offline participants that have no live connection.
    ReapStalePresence,
}

impl ScheduledJob {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SweepExpiredPolls => "sweep_expired_polls",
            Self::ReapStalePresence => "reap_stale_presence",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for the poll reconciliation sweep (default: 30 seconds).
    pub poll_sweep_interval: Duration,
    /// Interval for the stale presence reaper (default: 1 hour).
    pub presence_reap_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_sweep_interval: Duration::from_secs(30),
            presence_reap_interval: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    /// Intervals from the application configuration. Zero means default.
    #[must_use]
    pub fn from_app_config(config: &Config) -> Self {
        let defaults = Self::default();
        let secs_or = |secs: u64, fallback: Duration| {
            if secs == 0 {
                fallback
            } else {
                Duration::from_secs(secs)
            }
        };
        Self {
            poll_sweep_interval: secs_or(
                config.polls.sweep_interval_secs,
                defaults.poll_sweep_interval,
            ),
            presence_reap_interval: secs_or(
                config.rooms.reaper_interval_secs,
                defaults.presence_reap_interval,
            ),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Expire overdue polls. Returns how many were expired.
    async fn sweep_expired_polls(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;

    /// Reap stale presence. Returns how many participants were flagged offline.
    async fn reap_stale_presence(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;
}

/// Spawn one interval loop per job. Abort the returned handles to stop.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_job(
            ScheduledJob::SweepExpiredPolls,
            config.poll_sweep_interval,
            Arc::clone(&executor),
        ),
        spawn_job(
            ScheduledJob::ReapStalePresence,
            config.presence_reap_interval,
            executor,
        ),
    ]
}

fn spawn_job<E: JobExecutor + 'static>(
    job: ScheduledJob,
    every: Duration,
    executor: Arc<E>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let result = match job {
                ScheduledJob::SweepExpiredPolls => executor.sweep_expired_polls().await,
                ScheduledJob::ReapStalePresence => executor.reap_stale_presence().await,
            };
            match result {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(job = job.name(), count, "Scheduled job done");
                    }
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Scheduled job failed");
                }
            }
        }
    })
}
