//! Stale content sweep.
//!
//! Three independent set-based updates share one tick: warn authors of
//! approaches nearing abandonment, abandon the ones past the limit, then mark
//! long-idle open posts dormant. A failing step is logged and counted; the
//! following steps still run. A dry run counts the rows each step would touch
//! and writes nothing.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::runner::RunResult;
use super::scheduler::ScheduledJob;
use crate::error::Result;

pub const JOB_NAME: &str = "stale_content";

/// Age limits for the three steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleThresholds {
    /// Approaches idle this long get a warning notification
    pub warn_after: Duration,
    /// Approaches idle this long are abandoned
    pub abandon_after: Duration,
    /// Open posts without approaches this old become dormant
    pub dormant_after: Duration,
}

impl Default for StaleThresholds {
    fn default() -> Self {
        Self {
            warn_after: Duration::from_secs(23 * 86_400),
            abandon_after: Duration::from_secs(30 * 86_400),
            dormant_after: Duration::from_secs(60 * 86_400),
        }
    }
}

#[async_trait]
pub trait StaleContentStore: Send + Sync {
    /// Notify authors of approaches idle between `warn_after` and
    /// `abandon_after` that have not been warned yet. Returns notifications sent.
    async fn warn_approaching_abandonment(
        &self,
        warn_after: Duration,
        abandon_after: Duration,
    ) -> Result<u64>;

    /// Move idle `starting`/`working` approaches to `abandoned`.
    async fn abandon_stale_approaches(&self, older_than: Duration) -> Result<u64>;

    /// Move open posts with no approaches to `dormant`.
    async fn mark_dormant_posts(&self, older_than: Duration) -> Result<u64>;

    /// Approaches [`warn_approaching_abandonment`](Self::warn_approaching_abandonment) would notify about.
    async fn count_approaching_abandonment(
        &self,
        warn_after: Duration,
        abandon_after: Duration,
    ) -> Result<u64>;

    async fn count_stale_approaches(&self, older_than: Duration) -> Result<u64>;

    async fn count_dormant_posts(&self, older_than: Duration) -> Result<u64>;
}

/// Counts from one sweep. A failed step leaves its count at zero. In a dry
/// run these are the rows that would have been touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StaleContentResult {
    pub warned: u64,
    pub abandoned: u64,
    pub dormant: u64,
    /// Steps that returned an error
    pub errors: u64,
}

impl StaleContentResult {
    pub fn touched(&self) -> u64 {
        self.warned + self.abandoned + self.dormant
    }

    fn into_run_result(self, cancelled: bool, dry_run: bool) -> RunResult {
        let mut run = RunResult::new(JOB_NAME, dry_run);
        run.total_found = self.touched();
        if !dry_run {
            run.succeeded = self.touched();
        }
        run.failed = self.errors;
        run.cancelled = cancelled;
        run.add_tally("warned", self.warned);
        run.add_tally("abandoned", self.abandoned);
        run.add_tally("dormant", self.dormant);
        run.finish();
        run
    }
}

pub struct StaleContentJob {
    store: Arc<dyn StaleContentStore>,
    thresholds: StaleThresholds,
    dry_run: bool,
}

impl StaleContentJob {
    pub fn new(store: Arc<dyn StaleContentStore>, thresholds: StaleThresholds) -> Self {
        Self {
            store,
            thresholds,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn thresholds(&self) -> &StaleThresholds {
        &self.thresholds
    }

    /// Run the three steps in order. Never fails as a whole.
    pub async fn sweep(&self, cancel: &CancellationToken) -> (StaleContentResult, bool) {
        let mut result = StaleContentResult::default();
        let t = self.thresholds;

        if cancel.is_cancelled() {
            return (result, true);
        }
        let warned = if self.dry_run {
            self.store
                .count_approaching_abandonment(t.warn_after, t.abandon_after)
                .await
        } else {
            self.store
                .warn_approaching_abandonment(t.warn_after, t.abandon_after)
                .await
        };
        match warned {
            Ok(n) => result.warned = n,
            Err(err) => {
                error!(job = JOB_NAME, step = "warn", error = %err, "Failed to send stale warnings");
                result.errors += 1;
            }
        }

        if cancel.is_cancelled() {
            return (result, true);
        }
        let abandoned = if self.dry_run {
            self.store.count_stale_approaches(t.abandon_after).await
        } else {
            self.store.abandon_stale_approaches(t.abandon_after).await
        };
        match abandoned {
            Ok(n) => result.abandoned = n,
            Err(err) => {
                error!(job = JOB_NAME, step = "abandon", error = %err, "Failed to abandon approaches");
                result.errors += 1;
            }
        }

        if cancel.is_cancelled() {
            return (result, true);
        }
        let dormant = if self.dry_run {
            self.store.count_dormant_posts(t.dormant_after).await
        } else {
            self.store.mark_dormant_posts(t.dormant_after).await
        };
        match dormant {
            Ok(n) => result.dormant = n,
            Err(err) => {
                error!(job = JOB_NAME, step = "dormant", error = %err, "Failed to mark dormant posts");
                result.errors += 1;
            }
        }

        if result.touched() > 0 {
            info!(
                job = JOB_NAME,
                warned = result.warned,
                abandoned = result.abandoned,
                dormant = result.dormant,
                dry_run = self.dry_run,
                "Stale content sweep"
            );
        }
        (result, false)
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        let (result, cancelled) = self.sweep(cancel).await;
        Ok(result.into_run_result(cancelled, self.dry_run))
    }
}

#[async_trait]
impl ScheduledJob for StaleContentJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.run(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = StaleThresholds::default();
        assert_eq!(t.abandon_after - t.warn_after, Duration::from_secs(7 * 86_400));
        assert!(t.dormant_after > t.abandon_after);
    }

    #[test]
    fn test_result_maps_to_tallies() {
        let result = StaleContentResult {
            warned: 2,
            abandoned: 0,
            dormant: 1,
            errors: 1,
        };
        let run = result.into_run_result(false, false);
        assert_eq!(run.tally("warned"), 2);
        assert_eq!(run.tally("abandoned"), 0);
        assert_eq!(run.tally("dormant"), 1);
        assert_eq!(run.failed, 1);
        assert_eq!(run.status(), "partial");
    }

    #[test]
    fn test_dry_run_result_only_counts() {
        let result = StaleContentResult {
            warned: 3,
            abandoned: 1,
            dormant: 0,
            errors: 0,
        };
        let run = result.into_run_result(false, true);
        assert_eq!(run.total_found, 4);
        assert_eq!(run.succeeded, 0);
        assert_eq!(run.tally("warned"), 3);
        assert_eq!(run.status(), "dry_run");
    }
}
