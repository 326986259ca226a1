//! Translation of non-English drafts.

use anyhow::Result;
use clap::Args;
use std::sync::Arc;

use sweeper_core::config::Config;
use sweeper_core::jobs::{SpawnModerationTrigger, TranslationJob};
use sweeper_core::services::{GroqModerator, GroqTranslator, ModerationTrigger, NoopTrigger};

use super::{apply_overrides, Session};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct TranslateArgs {
    /// Drafts per fetch
    #[arg(long)]
    pub(crate) batch_size: Option<u32>,

    /// Count drafts needing translation without translating
    #[arg(long)]
    pub(crate) dry_run: bool,
}

pub async fn execute(args: TranslateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let runner = apply_overrides(
        config.jobs.translation.runner_config(),
        args.batch_size,
        None,
        args.dry_run.then_some(true),
    );
    let translator = Arc::new(GroqTranslator::from_config(&config.services)?);
    let moderator = Arc::new(GroqModerator::from_config(&config.services)?);

    let session = Session::connect(config, format).await?;
    let spawn = Arc::new(SpawnModerationTrigger::new(session.store.clone(), moderator));
    let trigger: Arc<dyn ModerationTrigger> = if runner.dry_run {
        Arc::new(NoopTrigger)
    } else {
        spawn.clone()
    };

    let job = TranslationJob::new(session.store.clone(), translator, trigger, runner);
    let outcome = session.run(&job).await;
    spawn.drain().await;
    session.close().await;
    outcome
}
