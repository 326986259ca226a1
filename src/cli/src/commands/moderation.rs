//! Moderation of posts that are already open.

use anyhow::Result;
use clap::{ArgAction, Args};
use std::sync::Arc;

use sweeper_core::config::Config;
use sweeper_core::jobs::ModerationJob;
use sweeper_core::services::GroqModerator;

use super::{apply_overrides, Session};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ModerateArgs {
    /// Posts per fetch
    #[arg(long)]
    pub(crate) batch_size: Option<u32>,

    /// Moderation calls per second
    #[arg(long)]
    pub(crate) rate_limit: Option<f64>,

    /// Only count open posts. Pass `--dry-run false` to apply verdicts
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub(crate) dry_run: bool,
}

pub async fn execute(args: ModerateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let runner = apply_overrides(
        config.jobs.moderation.runner_config(),
        args.batch_size,
        args.rate_limit,
        Some(args.dry_run),
    );
    if runner.dry_run {
        output::print_info("Dry run, pass --dry-run false to reject or keep posts");
    }
    let moderator = Arc::new(GroqModerator::from_config(&config.services)?);

    let session = Session::connect(config, format).await?;
    let job = ModerationJob::new(session.store.clone(), moderator, runner);
    let outcome = session.run(&job).await;
    session.close().await;
    outcome
}
