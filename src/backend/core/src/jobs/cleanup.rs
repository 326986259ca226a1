//! Hourly removal of expired, unused claim tokens.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::runner::RunResult;
use super::scheduler::ScheduledJob;
use crate::error::Result;

pub const JOB_NAME: &str = "cleanup";

#[async_trait]
pub trait ClaimTokenStore: Send + Sync {
    /// Delete tokens past `expires_at` that were never used.
    async fn delete_expired_tokens(&self) -> Result<u64>;

    async fn count_expired_tokens(&self) -> Result<u64>;
}

pub struct CleanupJob {
    store: Arc<dyn ClaimTokenStore>,
    dry_run: bool,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn ClaimTokenStore>) -> Self {
        Self {
            store,
            dry_run: false,
        }
    }

    /// Count expired tokens instead of deleting them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        let mut run = RunResult::new(JOB_NAME, self.dry_run);
        if cancel.is_cancelled() {
            run.cancelled = true;
            run.finish();
            return Ok(run);
        }

        if self.dry_run {
            run.total_found = self.store.count_expired_tokens().await?;
            info!(job = JOB_NAME, expired = run.total_found, "Dry run, skipping cleanup");
            run.finish();
            return Ok(run);
        }

        let deleted = self.store.delete_expired_tokens().await?;
        if deleted > 0 {
            info!(job = JOB_NAME, deleted, "Cleaned up expired claim tokens");
        }

        run.total_found = deleted;
        run.succeeded = deleted;
        run.add_tally("deleted", deleted);
        run.finish();
        Ok(run)
    }
}

#[async_trait]
impl ScheduledJob for CleanupJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.run(cancel).await
    }
}
