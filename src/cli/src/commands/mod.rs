//! One-shot job commands.
//!
//! Every command builds its job from the loaded configuration plus flag
//! overrides, runs it once against the database and prints the run summary.

pub mod cleanup;
pub mod embeddings;
pub mod moderation;
pub mod stale;
pub mod translation;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sweeper_core::config::Config;
use sweeper_core::db::{Database, PgJobStore};
use sweeper_core::jobs::{execute, RunnerConfig, ScheduledJob};

use crate::output::{self, OutputFormat};

/// Load configuration from `path`, or from the environment alone.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(&path.to_string_lossy()),
        None => Config::load(),
    };
    config.context("failed to load configuration")
}

/// Flag overrides shared by the batch commands.
pub(crate) fn apply_overrides(
    mut runner: RunnerConfig,
    batch_size: Option<u32>,
    rate_limit: Option<f64>,
    dry_run: Option<bool>,
) -> RunnerConfig {
    if let Some(batch_size) = batch_size {
        runner = runner.with_batch_size(batch_size);
    }
    if let Some(rate_limit) = rate_limit {
        runner = runner.with_rate_limit(rate_limit);
    }
    if let Some(dry_run) = dry_run {
        runner = runner.with_dry_run(dry_run);
    }
    runner
}

/// An open database connection plus the output format.
pub struct Session {
    pub db: Database,
    pub store: Arc<PgJobStore>,
    pub format: OutputFormat,
}

impl Session {
    pub async fn connect(config: &Config, format: OutputFormat) -> Result<Self> {
        let db = Database::new(&config.database)
            .await
            .context("failed to connect to database")?;
        let store = Arc::new(PgJobStore::new(&db));
        Ok(Self { db, store, format })
    }

    /// Run `job` once. Ctrl-C stops it after the current item and the partial
    /// summary is still printed.
    pub async fn run(&self, job: &dyn ScheduledJob) -> Result<()> {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(cancel_on_interrupt(cancel.clone()));

        let outcome = execute(job, &cancel).await;
        watcher.abort();

        let result = outcome.with_context(|| format!("{} run failed", job.name()))?;
        output::print_run_result(&result, self.format)
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        output::print_warning("Interrupt received, stopping after the current item");
        cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_touch_given_flags() {
        let base = RunnerConfig::default().with_batch_size(50).with_rate_limit(2.0);

        let unchanged = apply_overrides(base.clone(), None, None, None);
        assert_eq!(unchanged, base);

        let changed = apply_overrides(base, Some(10), Some(0.5), Some(true));
        assert_eq!(changed.batch_size, 10);
        assert_eq!(changed.rate_limit, 0.5);
        assert!(changed.dry_run);
    }
}
