//! Sweeper Server - Main entry point
//!
//! Runs every enabled job on its interval until SIGINT/SIGTERM.

use std::sync::Arc;

use sweeper_core::{
    config::Config,
    db::{Database, PgJobStore},
    jobs::{
        CleanupJob, EmbeddingBackfillJob, IntervalSchedule, JobScheduler, ModerationJob,
        SpawnModerationTrigger, StaleContentJob, TranslationJob,
    },
    services::{self, GroqModerator, GroqTranslator},
    telemetry::{init_logging, init_metrics},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("SWEEPER_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    init_logging(&config.logging, &config.environment)?;
    init_metrics(&config.metrics)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting Sweeper Server"
    );

    let db = Database::new(&config.database).await?;
    tracing::info!("Connected to database");
    let store = Arc::new(PgJobStore::new(&db));

    let jobs = &config.jobs;
    let mut scheduler = JobScheduler::new();
    let mut triggers = Vec::new();

    if jobs.cleanup.enabled {
        scheduler.schedule_interval(
            Arc::new(CleanupJob::new(store.clone()).with_dry_run(jobs.cleanup.dry_run)),
            IntervalSchedule::new(jobs.cleanup.interval).with_immediate(),
        );
    }

    if jobs.stale.enabled {
        scheduler.schedule_interval(
            Arc::new(
                StaleContentJob::new(store.clone(), jobs.stale.thresholds()?)
                    .with_dry_run(jobs.stale.dry_run),
            ),
            IntervalSchedule::new(jobs.stale.interval).with_immediate(),
        );
    }

    if jobs.embedding.enabled {
        match services::embedder_from_config(&config.services) {
            Ok(embedder) => scheduler.schedule_interval(
                Arc::new(EmbeddingBackfillJob::new(
                    store.clone(),
                    embedder,
                    jobs.embedding.runner_config(),
                    jobs.embedding.content_types()?,
                )),
                IntervalSchedule::new(jobs.embedding.interval).with_immediate(),
            ),
            Err(err) => tracing::warn!(error = %err, "Embedding backfill disabled"),
        }
    }

    if config.services.groq_api_key.is_empty() {
        if jobs.moderation.enabled || jobs.translation.enabled {
            tracing::warn!("No Groq API key configured, moderation and translation disabled");
        }
    } else {
        let moderator = Arc::new(GroqModerator::from_config(&config.services)?);

        if jobs.moderation.enabled {
            scheduler.schedule_interval(
                Arc::new(ModerationJob::new(
                    store.clone(),
                    moderator.clone(),
                    jobs.moderation.runner_config(),
                )),
                IntervalSchedule::new(jobs.moderation.interval).with_immediate(),
            );
        }

        if jobs.translation.enabled {
            let trigger = Arc::new(SpawnModerationTrigger::new(store.clone(), moderator));
            triggers.push(trigger.clone());
            scheduler.schedule_interval(
                Arc::new(TranslationJob::new(
                    store.clone(),
                    Arc::new(GroqTranslator::from_config(&config.services)?),
                    trigger,
                    jobs.translation.runner_config(),
                )),
                IntervalSchedule::new(jobs.translation.interval).with_immediate(),
            );
        }
    }

    tracing::info!(jobs = ?scheduler.job_names(), "Jobs registered");
    let handle = scheduler.start();

    shutdown_signal().await;

    handle.shutdown();
    handle.join().await;
    for trigger in &triggers {
        trigger.drain().await;
    }
    db.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
