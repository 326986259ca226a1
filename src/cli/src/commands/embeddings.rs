//! Embedding backfill command.

use anyhow::Result;
use clap::Args;

use sweeper_core::config::Config;
use sweeper_core::jobs::{ContentType, EmbeddingBackfillJob};
use sweeper_core::services;

use super::{apply_overrides, Session};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct BackfillArgs {
    /// Comma-separated content types: posts, answers, approaches
    #[arg(long, value_name = "TYPES")]
    pub(crate) content_types: Option<String>,

    /// Records per fetch
    #[arg(long)]
    pub(crate) batch_size: Option<u32>,

    /// Embedding calls per second (0 disables pacing)
    #[arg(long)]
    pub(crate) rate_limit: Option<f64>,

    /// Count what would be embedded without calling the embedder
    #[arg(long)]
    pub(crate) dry_run: bool,
}

pub async fn execute(args: BackfillArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let settings = &config.jobs.embedding;
    let runner = apply_overrides(
        settings.runner_config(),
        args.batch_size,
        args.rate_limit,
        args.dry_run.then_some(true),
    );
    let content_types = match &args.content_types {
        Some(list) => ContentType::parse_list(list)?,
        None => settings.content_types()?,
    };
    let embedder = services::embedder_from_config(&config.services)?;

    let session = Session::connect(config, format).await?;
    let job = EmbeddingBackfillJob::new(session.store.clone(), embedder, runner, content_types);
    let outcome = session.run(&job).await;
    session.close().await;
    outcome
}
