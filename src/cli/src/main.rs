//! Sweeper CLI - run the batch jobs once, by hand.
//!
//! Provides commands for embedding backfill, moderation, translation, the
//! stale content sweep and claim token cleanup.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cleanup, embeddings, moderation, stale, translation};
use output::OutputFormat;
use sweeper_core::telemetry::init_logging;

/// Sweeper - Recurring Batch Job Engine CLI
#[derive(Parser)]
#[command(
    name = "sweeper",
    version,
    about = "Sweeper - Recurring Batch Job Engine",
    long_about = "Runs one sweep of a batch job against the configured database and prints what it did.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file; SWEEPER__* environment variables override it
    #[arg(short, long, global = true, env = "SWEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate embeddings for records that have none
    BackfillEmbeddings(embeddings::BackfillArgs),

    /// Moderate posts that are already open
    ModerateExisting(moderation::ModerateArgs),

    /// Translate non-English drafts and re-submit them to moderation
    Translate(translation::TranslateArgs),

    /// Warn, abandon and mark dormant stale content
    StaleSweep(stale::StaleArgs),

    /// Delete expired, unused claim tokens
    Cleanup(cleanup::CleanupArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = commands::load_config(cli.config.as_deref())?;
    config.logging.stderr = true;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging, &config.environment)?;

    let format = cli.output;
    match cli.command {
        Commands::BackfillEmbeddings(args) => embeddings::execute(args, &config, format).await,
        Commands::ModerateExisting(args) => moderation::execute(args, &config, format).await,
        Commands::Translate(args) => translation::execute(args, &config, format).await,
        Commands::StaleSweep(args) => stale::execute(args, &config, format).await,
        Commands::Cleanup(args) => cleanup::execute(args, &config, format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_moderate_existing_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["sweeper", "moderate-existing"]).unwrap();
        let Commands::ModerateExisting(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(args.dry_run);

        let cli =
            Cli::try_parse_from(["sweeper", "moderate-existing", "--dry-run", "false"]).unwrap();
        let Commands::ModerateExisting(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(!args.dry_run);
    }

    #[test]
    fn test_backfill_flags() {
        let cli = Cli::try_parse_from([
            "sweeper",
            "-o",
            "json",
            "backfill-embeddings",
            "--content-types",
            "posts,answers",
            "--batch-size",
            "25",
            "--dry-run",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        let Commands::BackfillEmbeddings(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(args.content_types.as_deref(), Some("posts,answers"));
        assert_eq!(args.batch_size, Some(25));
        assert!(args.dry_run);
    }

    #[test]
    fn test_sweeps_accept_dry_run() {
        let cli = Cli::try_parse_from(["sweeper", "stale-sweep", "--dry-run"]).unwrap();
        let Commands::StaleSweep(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(args.dry_run);

        let cli = Cli::try_parse_from(["sweeper", "cleanup"]).unwrap();
        let Commands::Cleanup(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(!args.dry_run);
    }
}
