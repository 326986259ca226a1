//! The batch engine.
//!
//! [`BatchRunner::run`] drives a [`CursorFetcher`] to exhaustion, hands each
//! item to an [`ItemProcessor`] strictly in fetch order, and accumulates a
//! [`RunResult`]. Per-item failures are counted; only store errors during
//! count/fetch abort the run. Cancellation is checked before every fetch and
//! every item, and inside every wait, and yields the partial result.
//!
//! Records a job writes usually leave the unprocessed set, so the runner
//! re-reads from the same offset and only steps over records it has already
//! handled in this run. Each record is processed at most once per run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::cursor::{Cursor, CursorFetcher, WorkItem};
use super::rate_gate::RateGate;
use super::retry::{call_with_retry, Attempted, RetryPolicy};
use crate::error::Result;
use crate::services::ExternalCallError;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Operational knobs for one job's runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Items per fetch
    pub batch_size: u32,
    /// External calls per second, 0 disables pacing
    pub rate_limit: f64,
    /// Count only: no fetch, no external call, no write
    pub dry_run: bool,
    /// Stop after this many batches in one run
    pub max_batches: Option<u32>,
    pub retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            rate_limit: 0.0,
            dry_run: false,
            max_batches: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunnerConfig {
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_rate_limit(mut self, calls_per_second: f64) -> Self {
        self.rate_limit = calls_per_second;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_batches(mut self, max_batches: u32) -> Self {
        self.max_batches = Some(max_batches);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Result
// ═══════════════════════════════════════════════════════════════════════════════

/// Plain counters, used for per-content-type breakdowns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total_found: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Summary of one invocation of a job.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub job: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// The run stopped early because its token fired
    pub cancelled: bool,
    pub total_found: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Domain counters such as `approved` or `abandoned`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tallies: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<String, RunCounts>,
}

impl RunResult {
    pub fn new(job: impl Into<String>, dry_run: bool) -> Self {
        Self {
            job: job.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            cancelled: false,
            total_found: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            tallies: BTreeMap::new(),
            breakdown: BTreeMap::new(),
        }
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            total_found: self.total_found,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
        }
    }

    /// Items that reached a terminal outcome in this run.
    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn tally(&self, key: &str) -> u64 {
        self.tallies.get(key).copied().unwrap_or(0)
    }

    pub fn add_tally(&mut self, key: &str, n: u64) {
        *self.tallies.entry(key.to_string()).or_insert(0) += n;
    }

    /// Fold a sub-run into this one and record it under `label`.
    pub fn absorb(&mut self, label: impl Into<String>, other: RunResult) {
        self.total_found += other.total_found;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.cancelled |= other.cancelled;
        for (key, n) in &other.tallies {
            self.add_tally(key, *n);
        }
        self.breakdown.insert(label.into(), other.counts());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Final status label for logs and metrics.
    pub fn status(&self) -> &'static str {
        if self.dry_run {
            "dry_run"
        } else if self.cancelled {
            "cancelled"
        } else if self.failed > 0 {
            "partial"
        } else {
            "ok"
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Item Processing
// ═══════════════════════════════════════════════════════════════════════════════

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed,
    Skipped,
    /// Counted as skipped, and the rest of the run is deferred to the next tick.
    Deferred,
    /// Not counted; the run stops.
    Cancelled,
}

/// Handed to every [`ItemProcessor::process`] call.
pub struct ItemContext<'a> {
    job: &'a str,
    gate: &'a RateGate,
    retry: &'a RetryPolicy,
    cancel: &'a CancellationToken,
    tallies: &'a Mutex<BTreeMap<String, u64>>,
}

impl<'a> ItemContext<'a> {
    /// Make a paced, retried external call.
    pub async fn call<T, F, Fut>(&self, call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, ExternalCallError>> + Send,
        T: Send,
    {
        call_with_retry(self.gate, self.retry, self.cancel, call).await
    }

    /// Bump a domain counter on the run result.
    pub fn tally(&self, key: &str) {
        *self.tallies.lock().entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn job(&self) -> &str {
        self.job
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Per-item domain logic: call the external service, write the result.
#[async_trait]
pub trait ItemProcessor<I: WorkItem>: Send + Sync {
    async fn process(&self, item: &I, ctx: &ItemContext<'_>) -> ItemOutcome;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives one fetcher/processor pair. Owns the job's [`RateGate`], so the pace
/// holds across runs and across content types of the same job.
#[derive(Debug)]
pub struct BatchRunner {
    job: String,
    config: RunnerConfig,
    gate: RateGate,
}

impl BatchRunner {
    pub fn new(job: impl Into<String>, config: RunnerConfig) -> Self {
        let gate = RateGate::new(config.rate_limit);
        Self {
            job: job.into(),
            config,
            gate,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Only count/fetch failures are errors. Cancellation returns `Ok` with
    /// `cancelled` set.
    pub async fn run<F, P>(
        &self,
        cancel: &CancellationToken,
        fetcher: &F,
        processor: &P,
    ) -> Result<RunResult>
    where
        F: CursorFetcher,
        P: ItemProcessor<F::Item>,
    {
        let mut result = RunResult::new(&self.job, self.config.dry_run);

        result.total_found = fetcher.count().await?;
        if result.total_found == 0 {
            debug!(job = %self.job, "Nothing to process");
            result.finish();
            return Ok(result);
        }

        if self.config.dry_run {
            info!(
                job = %self.job,
                total_found = result.total_found,
                "Dry run, skipping processing"
            );
            result.finish();
            return Ok(result);
        }

        info!(
            job = %self.job,
            total_found = result.total_found,
            batch_size = self.config.batch_size,
            "Starting run"
        );

        let tallies = Mutex::new(BTreeMap::new());
        let ctx = ItemContext {
            job: &self.job,
            gate: &self.gate,
            retry: &self.config.retry,
            cancel,
            tallies: &tallies,
        };

        let mut cursor = Cursor::new(self.config.batch_size);
        let mut batches = 0u32;
        let mut handled: HashSet<String> = HashSet::new();

        'batches: loop {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if self.config.max_batches.is_some_and(|max| batches >= max) {
                debug!(job = %self.job, batches, "Batch cap reached");
                break;
            }

            let batch = fetcher.fetch(cursor.limit, cursor.offset).await?;
            batches += 1;
            debug!(
                job = %self.job,
                offset = cursor.offset,
                batch_len = batch.len(),
                "Fetched batch"
            );
            if batch.is_empty() {
                break;
            }

            // Records handled earlier in this run that are still in the set.
            let mut retained = 0usize;
            for item in &batch {
                if handled.contains(item.id()) {
                    retained += 1;
                    continue;
                }
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'batches;
                }
                handled.insert(item.id().to_string());

                match processor.process(item, &ctx).await {
                    ItemOutcome::Succeeded => result.succeeded += 1,
                    ItemOutcome::Failed => result.failed += 1,
                    ItemOutcome::Skipped => result.skipped += 1,
                    ItemOutcome::Deferred => {
                        result.skipped += 1;
                        info!(
                            job = %self.job,
                            item_id = item.id(),
                            "Deferring remaining items to the next run"
                        );
                        break 'batches;
                    }
                    ItemOutcome::Cancelled => {
                        result.cancelled = true;
                        break 'batches;
                    }
                }
            }

            cursor.advance(retained);
            if cursor.is_last_batch(batch.len()) {
                break;
            }
        }

        result.tallies = tallies.into_inner();
        result.finish();

        info!(
            job = %self.job,
            total_found = result.total_found,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            cancelled = result.cancelled,
            "Run finished"
        );

        Ok(result)
    }
}
