//! Interval scheduling with cooperative cancellation.
//!
//! Each job runs on its own task: once on start, then again one interval after
//! the previous run completed. Runs of the same job never overlap; a slow run
//! pushes the next one back instead.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::runner::RunResult;
use crate::error::Result;
use crate::telemetry::JobMetrics;

/// A unit of recurring work.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    /// Perform one full run. An `Err` means the run was aborted.
    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult>;
}

/// When a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSchedule {
    /// Pause between the end of one run and the start of the next
    pub interval: Duration,
    /// Whether to run immediately on start
    pub run_immediately: bool,
}

impl IntervalSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            run_immediately: false,
        }
    }

    pub fn with_immediate(mut self) -> Self {
        self.run_immediately = true;
        self
    }
}

/// Counters for one scheduled job.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStats {
    /// Runs that returned a result (including cancelled ones)
    pub runs: Arc<AtomicU64>,
    /// Runs aborted by an error
    pub failed_runs: Arc<AtomicU64>,
    pub items_succeeded: Arc<AtomicU64>,
    pub items_failed: Arc<AtomicU64>,
}

impl ScheduleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn failed_runs(&self) -> u64 {
        self.failed_runs.load(Ordering::Relaxed)
    }

    pub fn items_succeeded(&self) -> u64 {
        self.items_succeeded.load(Ordering::Relaxed)
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &Result<RunResult>) {
        match outcome {
            Ok(result) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                self.items_succeeded
                    .fetch_add(result.succeeded, Ordering::Relaxed);
                self.items_failed.fetch_add(result.failed, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed_runs.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Run a job once, logging and recording metrics for the outcome.
pub async fn execute(job: &dyn ScheduledJob, cancel: &CancellationToken) -> Result<RunResult> {
    let outcome = job.run_once(cancel).await;
    match &outcome {
        Ok(result) => JobMetrics::record_run(result),
        Err(err) => {
            err.log();
            error!(job = job.name(), error = %err, "Job run aborted");
            JobMetrics::record_run_error(job.name());
        }
    }
    outcome
}

/// Run `job` now and then every `interval` until `cancel` fires.
pub async fn run_scheduled(job: &dyn ScheduledJob, cancel: &CancellationToken, interval: Duration) {
    run_with_schedule(
        job,
        cancel,
        IntervalSchedule::new(interval).with_immediate(),
        &ScheduleStats::new(),
    )
    .await;
}

/// Scheduling loop. Returns as soon as `cancel` fires; the cancellation branch
/// is polled before the timer so no run starts after shutdown.
pub async fn run_with_schedule(
    job: &dyn ScheduledJob,
    cancel: &CancellationToken,
    schedule: IntervalSchedule,
    stats: &ScheduleStats,
) {
    info!(
        job = job.name(),
        interval_secs = schedule.interval.as_secs(),
        "Scheduling job"
    );

    if schedule.run_immediately && !cancel.is_cancelled() {
        stats.record(&execute(job, cancel).await);
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(job = job.name(), "Job scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(schedule.interval) => {}
        }

        stats.record(&execute(job, cancel).await);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of recurring jobs, started together and stopped together.
pub struct JobScheduler {
    entries: Vec<(Arc<dyn ScheduledJob>, IntervalSchedule)>,
    shutdown: CancellationToken,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Use an existing token as the parent of every job's token.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            entries: Vec::new(),
            shutdown,
        }
    }

    pub fn schedule_interval(&mut self, job: Arc<dyn ScheduledJob>, schedule: IntervalSchedule) {
        self.entries.push((job, schedule));
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(job, _)| job.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn one task per job.
    pub fn start(self) -> SchedulerHandle {
        let mut tasks = Vec::with_capacity(self.entries.len());
        let mut stats = HashMap::with_capacity(self.entries.len());

        for (job, schedule) in self.entries {
            let name = job.name().to_string();
            let job_stats = ScheduleStats::new();
            let cancel = self.shutdown.child_token();
            let task_stats = job_stats.clone();

            let task = tokio::spawn(async move {
                run_with_schedule(job.as_ref(), &cancel, schedule, &task_stats).await;
            });

            stats.insert(name.clone(), job_stats);
            tasks.push((name, task));
        }

        info!(jobs = tasks.len(), "Job scheduler started");

        SchedulerHandle {
            shutdown: self.shutdown,
            tasks,
            stats,
        }
    }
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    stats: HashMap<String, ScheduleStats>,
}

impl SchedulerHandle {
    /// Signal every job to stop. In-flight runs stop at their next
    /// cancellation check and still report what they did.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self, job: &str) -> Option<&ScheduleStats> {
        self.stats.get(job)
    }

    /// Wait for every job task to finish.
    pub async fn join(self) {
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, outcome) in names.iter().zip(join_all(handles).await) {
            if let Err(err) = outcome {
                warn!(job = %name, error = %err, "Job task ended abnormally");
            }
        }
        info!("Job scheduler stopped");
    }
}
