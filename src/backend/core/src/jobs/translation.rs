//! Translation of draft posts written in another language.
//!
//! Translation capacity is a small shared daily budget. A rate-limited answer
//! ends the run: the limited post gets its attempt counter bumped and the rest
//! of the batch waits for the next tick.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cursor::{CursorFetcher, WorkItem};
use super::retry::{Attempted, RetryClass};
use super::runner::{BatchRunner, ItemContext, ItemOutcome, ItemProcessor, RunResult, RunnerConfig};
use super::scheduler::ScheduledJob;
use crate::error::Result;
use crate::services::{ModerationInput, ModerationTrigger, TranslationInput, Translator};

pub const JOB_NAME: &str = "translation";

/// Posts stop being candidates after this many attempts.
pub const MAX_TRANSLATION_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub original_language: Option<String>,
}

impl WorkItem for TranslationCandidate {
    fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
pub trait TranslationStore: Send + Sync {
    async fn count_needing_translation(&self) -> Result<u64>;

    async fn fetch_needing_translation(&self, limit: u32, offset: u64) -> Result<Vec<TranslationCandidate>>;

    /// Store the English text, keep the original, and move the post to review.
    async fn apply_translation(&self, post_id: &str, title: &str, description: &str) -> Result<()>;

    async fn increment_translation_attempts(&self, post_id: &str) -> Result<()>;
}

struct Drafts<'a> {
    store: &'a dyn TranslationStore,
}

#[async_trait]
impl CursorFetcher for Drafts<'_> {
    type Item = TranslationCandidate;

    async fn count(&self) -> Result<u64> {
        self.store.count_needing_translation().await
    }

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<TranslationCandidate>> {
        self.store.fetch_needing_translation(limit, offset).await
    }
}

struct TranslateProcessor<'a> {
    store: &'a dyn TranslationStore,
    translator: &'a dyn Translator,
    trigger: &'a dyn ModerationTrigger,
}

impl TranslateProcessor<'_> {
    async fn bump_attempts(&self, post_id: &str) {
        if let Err(err) = self.store.increment_translation_attempts(post_id).await {
            warn!(job = JOB_NAME, item_id = post_id, error = %err, "Failed to increment translation attempts");
        }
    }
}

#[async_trait]
impl ItemProcessor<TranslationCandidate> for TranslateProcessor<'_> {
    async fn process(&self, post: &TranslationCandidate, ctx: &ItemContext<'_>) -> ItemOutcome {
        let input = TranslationInput {
            title: post.title.clone(),
            description: post.description.clone(),
            language: post.original_language.clone(),
        };

        let translated = match ctx.call(|| self.translator.translate(&input)).await {
            Attempted::Done(translated) => translated,
            Attempted::Failed {
                error,
                class: RetryClass::RateLimited { retry_after },
                ..
            } => {
                warn!(
                    job = ctx.job(),
                    item_id = %post.id,
                    retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                    error = %error,
                    "Translation rate limited, stopping batch"
                );
                self.bump_attempts(&post.id).await;
                ctx.tally("rate_limited");
                return ItemOutcome::Deferred;
            }
            Attempted::Failed { error, attempts, .. } => {
                error!(
                    job = ctx.job(),
                    item_id = %post.id,
                    attempts,
                    error = %error,
                    "Failed to translate post"
                );
                self.bump_attempts(&post.id).await;
                return ItemOutcome::Failed;
            }
            Attempted::Cancelled => return ItemOutcome::Cancelled,
        };

        if let Err(err) = self
            .store
            .apply_translation(&post.id, &translated.title, &translated.description)
            .await
        {
            error!(job = ctx.job(), item_id = %post.id, error = %err, "Failed to apply translation");
            return ItemOutcome::Failed;
        }

        self.trigger.trigger(
            &post.id,
            ModerationInput {
                title: translated.title,
                description: translated.description,
                tags: post.tags.clone(),
            },
        );

        info!(
            job = ctx.job(),
            item_id = %post.id,
            language = post.original_language.as_deref().unwrap_or("unknown"),
            "Translated post"
        );
        ctx.tally("translated");
        ItemOutcome::Succeeded
    }
}

/// Translates a small batch of drafts per tick and re-submits them to moderation.
pub struct TranslationJob {
    store: Arc<dyn TranslationStore>,
    translator: Arc<dyn Translator>,
    trigger: Arc<dyn ModerationTrigger>,
    runner: BatchRunner,
}

impl TranslationJob {
    pub fn new(
        store: Arc<dyn TranslationStore>,
        translator: Arc<dyn Translator>,
        trigger: Arc<dyn ModerationTrigger>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            translator,
            trigger,
            runner: BatchRunner::new(JOB_NAME, config),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        let fetcher = Drafts {
            store: self.store.as_ref(),
        };
        let processor = TranslateProcessor {
            store: self.store.as_ref(),
            translator: self.translator.as_ref(),
            trigger: self.trigger.as_ref(),
        };
        self.runner.run(cancel, &fetcher, &processor).await
    }
}

#[async_trait]
impl ScheduledJob for TranslationJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.run(cancel).await
    }
}
