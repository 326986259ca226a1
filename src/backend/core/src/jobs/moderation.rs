//! Moderation of open posts, plus the post-translation moderation trigger.
//!
//! A rejection is two independent writes: the status change, then the system
//! comment. The status change is never rolled back if the comment fails; the
//! item is reported as failed instead.
//!
//! Every verdict is recorded on the post, so an approved post stays open but
//! is not sent to the moderator again by later sweeps.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::cursor::{CursorFetcher, WorkItem};
use super::rate_gate::RateGate;
use super::retry::{call_with_retry, Attempted, RetryPolicy};
use super::runner::{BatchRunner, ItemContext, ItemOutcome, ItemProcessor, RunResult, RunnerConfig};
use super::scheduler::ScheduledJob;
use crate::error::{ErrorCode, Result, SweeperError};
use crate::services::{ContentModerator, ModerationInput, ModerationTrigger, ModerationVerdict};

pub const JOB_NAME: &str = "moderation";

/// Author id used for system comments.
pub const MODERATOR_AUTHOR_ID: &str = "sweeper-moderator";

/// Budget for one triggered moderation, retries included.
pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);

/// An open post awaiting a moderation verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl ModerationCandidate {
    pub fn input(&self) -> ModerationInput {
        ModerationInput {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl WorkItem for ModerationCandidate {
    fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Open posts that have no recorded verdict.
    async fn count_open_posts(&self) -> Result<u64>;

    async fn fetch_open_posts(&self, limit: u32, offset: u64) -> Result<Vec<ModerationCandidate>>;

    /// Record an approval without changing the status.
    async fn mark_moderated(&self, post_id: &str) -> Result<()>;

    /// Set the status to rejected and record the verdict.
    async fn reject_post(&self, post_id: &str) -> Result<()>;

    /// Set the status to open and record the verdict.
    async fn publish_post(&self, post_id: &str) -> Result<()>;

    async fn create_system_comment(&self, post_id: &str, content: &str) -> Result<()>;
}

/// Body of the comment left on a rejected post.
pub fn rejection_comment(explanation: &str) -> String {
    format!(
        "Post rejected by moderation.\n\nReason: {}\n\nYou can edit your post and resubmit for review.",
        explanation
    )
}

pub const APPROVAL_COMMENT: &str =
    "Post approved by moderation. Your post is now visible in the feed.";

/// Mark the post rejected, then explain why. The first write stands even if
/// the second fails.
pub async fn apply_rejection(
    store: &dyn ModerationStore,
    post_id: &str,
    verdict: &ModerationVerdict,
) -> Result<()> {
    store.reject_post(post_id).await.map_err(|err| {
        SweeperError::new(err.code(), "Failed to update post status")
            .with_internal_message(err.to_string())
    })?;

    store
        .create_system_comment(post_id, &rejection_comment(&verdict.explanation))
        .await
        .map_err(|err| {
            SweeperError::new(err.code(), "Post rejected but comment could not be created")
                .with_internal_message(err.to_string())
        })
}

fn truncate_title(title: &str, max_chars: usize) -> String {
    match title.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &title[..idx]),
        None => title.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Job
// ═══════════════════════════════════════════════════════════════════════════════

struct OpenPosts<'a> {
    store: &'a dyn ModerationStore,
}

#[async_trait]
impl CursorFetcher for OpenPosts<'_> {
    type Item = ModerationCandidate;

    async fn count(&self) -> Result<u64> {
        self.store.count_open_posts().await
    }

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<ModerationCandidate>> {
        self.store.fetch_open_posts(limit, offset).await
    }
}

struct ModerateProcessor<'a> {
    store: &'a dyn ModerationStore,
    moderator: &'a dyn ContentModerator,
}

#[async_trait]
impl ItemProcessor<ModerationCandidate> for ModerateProcessor<'_> {
    async fn process(&self, post: &ModerationCandidate, ctx: &ItemContext<'_>) -> ItemOutcome {
        let input = post.input();

        let verdict = match ctx.call(|| self.moderator.moderate(&input)).await {
            Attempted::Done(verdict) => verdict,
            Attempted::Failed { error, attempts, .. } => {
                error!(
                    job = ctx.job(),
                    item_id = %post.id,
                    title = %truncate_title(&post.title, 50),
                    attempts,
                    error = %error,
                    "Moderation failed"
                );
                return ItemOutcome::Failed;
            }
            Attempted::Cancelled => return ItemOutcome::Cancelled,
        };

        info!(
            job = ctx.job(),
            item_id = %post.id,
            approved = verdict.approved,
            language = %verdict.language_detected,
            reasons = ?verdict.rejection_reasons,
            title = %truncate_title(&post.title, 50),
            "Moderated post"
        );

        if verdict.approved {
            ctx.tally("approved");
            return match self.store.mark_moderated(&post.id).await {
                Ok(()) => ItemOutcome::Succeeded,
                Err(err) => {
                    error!(job = ctx.job(), item_id = %post.id, error = %err, "Failed to record approval");
                    ItemOutcome::Failed
                }
            };
        }

        ctx.tally("rejected");
        match apply_rejection(self.store, &post.id, &verdict).await {
            Ok(()) => ItemOutcome::Succeeded,
            Err(err) => {
                error!(job = ctx.job(), item_id = %post.id, error = %err, "Failed to reject post");
                ItemOutcome::Failed
            }
        }
    }
}

/// Sweeps open posts through the content moderator.
pub struct ModerationJob {
    store: Arc<dyn ModerationStore>,
    moderator: Arc<dyn ContentModerator>,
    runner: BatchRunner,
}

impl ModerationJob {
    pub fn new(
        store: Arc<dyn ModerationStore>,
        moderator: Arc<dyn ContentModerator>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            moderator,
            runner: BatchRunner::new(JOB_NAME, config),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        let fetcher = OpenPosts {
            store: self.store.as_ref(),
        };
        let processor = ModerateProcessor {
            store: self.store.as_ref(),
            moderator: self.moderator.as_ref(),
        };
        self.runner.run(cancel, &fetcher, &processor).await
    }
}

#[async_trait]
impl ScheduledJob for ModerationJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.run(cancel).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Detached Trigger
// ═══════════════════════════════════════════════════════════════════════════════

/// Moderates a single post on a detached task. Used after translation.
#[derive(Clone)]
pub struct SpawnModerationTrigger {
    store: Arc<dyn ModerationStore>,
    moderator: Arc<dyn ContentModerator>,
    retry: RetryPolicy,
    timeout: Duration,
    tasks: TaskTracker,
}

impl SpawnModerationTrigger {
    pub fn new(store: Arc<dyn ModerationStore>, moderator: Arc<dyn ContentModerator>) -> Self {
        Self {
            store,
            moderator,
            retry: RetryPolicy::moderation(),
            timeout: TRIGGER_TIMEOUT,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Moderate one post and apply the verdict. Awaitable form of
    /// [`ModerationTrigger::trigger`].
    pub async fn moderate_now(&self, post_id: &str, input: ModerationInput) -> Result<bool> {
        let gate = RateGate::unlimited();
        let never = CancellationToken::new();
        let moderator = self.moderator.as_ref();

        let verdict = match call_with_retry(&gate, &self.retry, &never, || moderator.moderate(&input)).await {
            Attempted::Done(verdict) => verdict,
            Attempted::Failed { error, .. } => {
                return Err(
                    SweeperError::new(ErrorCode::ExternalServiceError, "Moderation call failed")
                        .with_source(error),
                );
            }
            Attempted::Cancelled => {
                return Err(SweeperError::new(ErrorCode::Cancelled, "Moderation cancelled"));
            }
        };

        if verdict.approved {
            self.store.publish_post(post_id).await?;
            if let Err(err) = self.store.create_system_comment(post_id, APPROVAL_COMMENT).await {
                warn!(post_id, error = %err, "Failed to create approval comment");
            }
        } else {
            apply_rejection(self.store.as_ref(), post_id, &verdict).await?;
        }
        Ok(verdict.approved)
    }

    /// Triggered moderations still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every triggered moderation to finish. Each is bounded by the
    /// trigger timeout.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

impl ModerationTrigger for SpawnModerationTrigger {
    fn trigger(&self, post_id: &str, input: ModerationInput) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(post_id, "No runtime available, moderation not triggered");
            return;
        };

        let this = self.clone();
        let post_id = post_id.to_string();
        self.tasks.spawn_on(async move {
            match tokio::time::timeout(this.timeout, this.moderate_now(&post_id, input)).await {
                Ok(Ok(approved)) => debug!(post_id = %post_id, approved, "Triggered moderation finished"),
                Ok(Err(err)) => error!(post_id = %post_id, error = %err, "Triggered moderation failed"),
                Err(_) => error!(post_id = %post_id, "Triggered moderation timed out"),
            }
        }, &runtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_comment_format() {
        assert_eq!(
            rejection_comment("Content is in Chinese, not English"),
            "Post rejected by moderation.\n\nReason: Content is in Chinese, not English\n\nYou can edit your post and resubmit for review."
        );
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short", 50), "short");
        assert_eq!(truncate_title("abcdef", 3), "abc...");
        assert_eq!(truncate_title("ñañaña", 2), "ña...");
    }
}
