//! Expired claim token cleanup.

use anyhow::Result;
use clap::Args;

use sweeper_core::config::Config;
use sweeper_core::jobs::CleanupJob;

use super::Session;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct CleanupArgs {
    /// Count expired tokens without deleting them
    #[arg(long)]
    pub(crate) dry_run: bool,
}

pub async fn execute(args: CleanupArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let dry_run = args.dry_run || config.jobs.cleanup.dry_run;

    let session = Session::connect(config, format).await?;
    let job = CleanupJob::new(session.store.clone()).with_dry_run(dry_run);
    let outcome = session.run(&job).await;
    session.close().await;
    outcome
}
