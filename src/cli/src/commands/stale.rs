//! Stale content sweep.

use anyhow::Result;
use clap::Args;

use sweeper_core::config::Config;
use sweeper_core::jobs::StaleContentJob;

use super::Session;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct StaleArgs {
    /// Count what each step would touch without writing
    #[arg(long)]
    pub(crate) dry_run: bool,
}

pub async fn execute(args: StaleArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let thresholds = config.jobs.stale.thresholds()?;
    let dry_run = args.dry_run || config.jobs.stale.dry_run;

    let session = Session::connect(config, format).await?;
    let job = StaleContentJob::new(session.store.clone(), thresholds).with_dry_run(dry_run);
    let outcome = session.run(&job).await;
    session.close().await;
    outcome
}
