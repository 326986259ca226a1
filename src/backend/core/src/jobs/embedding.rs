//! Embedding backfill: generate vectors for content that has none yet.
//!
//! Each content type is an independent cursor sweep sharing the job's rate
//! gate. A store failure in one type aborts the whole run.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::cursor::{CursorFetcher, WorkItem};
use super::retry::Attempted;
use super::runner::{BatchRunner, ItemContext, ItemOutcome, ItemProcessor, RunResult, RunnerConfig};
use super::scheduler::ScheduledJob;
use crate::error::{Result, SweeperError};
use crate::services::Embedder;

pub const JOB_NAME: &str = "embedding_backfill";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Posts,
    Answers,
    Approaches,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [Self::Posts, Self::Answers, Self::Approaches];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Answers => "answers",
            Self::Approaches => "approaches",
        }
    }

    /// Parse `"all"`, `""` or a comma separated list such as
    /// `"posts,approaches"`. Duplicates are dropped, order is kept.
    pub fn parse_list(value: &str) -> Result<Vec<ContentType>> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL.to_vec());
        }

        let mut types = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let kind: ContentType = part.parse()?;
            if !types.contains(&kind) {
                types.push(kind);
            }
        }
        Ok(types)
    }
}

impl FromStr for ContentType {
    type Err = SweeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "posts" | "post" => Ok(Self::Posts),
            "answers" | "answer" => Ok(Self::Answers),
            "approaches" | "approach" => Ok(Self::Approaches),
            other => Err(SweeperError::invalid_input(format!(
                "unknown content type: {} (expected posts, answers, approaches or all)",
                other
            ))),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that still needs an embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingCandidate {
    Post {
        id: String,
        title: String,
        description: String,
    },
    Answer {
        id: String,
        content: String,
    },
    Approach {
        id: String,
        angle: String,
        method: String,
        outcome: String,
        solution: String,
    },
}

impl EmbeddingCandidate {
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Post { .. } => ContentType::Posts,
            Self::Answer { .. } => ContentType::Answers,
            Self::Approach { .. } => ContentType::Approaches,
        }
    }

    /// The text sent to the embedder.
    pub fn text(&self) -> String {
        match self {
            Self::Post {
                title, description, ..
            } => format!("{} {}", title, description),
            Self::Answer { content, .. } => content.clone(),
            Self::Approach {
                angle,
                method,
                outcome,
                solution,
                ..
            } => [angle, method, outcome, solution]
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl WorkItem for EmbeddingCandidate {
    fn id(&self) -> &str {
        match self {
            Self::Post { id, .. } | Self::Answer { id, .. } | Self::Approach { id, .. } => id,
        }
    }
}

/// Store contract for the backfill.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn count_without_embedding(&self, kind: ContentType) -> Result<u64>;

    async fn fetch_without_embedding(
        &self,
        kind: ContentType,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<EmbeddingCandidate>>;

    async fn update_embedding(&self, kind: ContentType, id: &str, embedding: &[f32]) -> Result<()>;
}

struct KindFetcher<'a> {
    store: &'a dyn EmbeddingStore,
    kind: ContentType,
}

#[async_trait]
impl CursorFetcher for KindFetcher<'_> {
    type Item = EmbeddingCandidate;

    async fn count(&self) -> Result<u64> {
        self.store.count_without_embedding(self.kind).await
    }

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<EmbeddingCandidate>> {
        self.store
            .fetch_without_embedding(self.kind, limit, offset)
            .await
    }
}

struct EmbedProcessor<'a> {
    store: &'a dyn EmbeddingStore,
    embedder: &'a dyn Embedder,
}

#[async_trait]
impl ItemProcessor<EmbeddingCandidate> for EmbedProcessor<'_> {
    async fn process(&self, item: &EmbeddingCandidate, ctx: &ItemContext<'_>) -> ItemOutcome {
        let text = item.text();
        let kind = item.content_type();

        let embedding = match ctx.call(|| self.embedder.embed(&text)).await {
            Attempted::Done(embedding) => embedding,
            Attempted::Failed { error, attempts, .. } => {
                error!(
                    job = ctx.job(),
                    content_type = %kind,
                    item_id = item.id(),
                    attempts,
                    error = %error,
                    "Failed to generate embedding"
                );
                return ItemOutcome::Failed;
            }
            Attempted::Cancelled => return ItemOutcome::Cancelled,
        };

        if let Err(err) = self.store.update_embedding(kind, item.id(), &embedding).await {
            error!(
                job = ctx.job(),
                content_type = %kind,
                item_id = item.id(),
                error = %err,
                "Failed to store embedding"
            );
            return ItemOutcome::Failed;
        }

        ctx.tally("embedded");
        ItemOutcome::Succeeded
    }
}

/// Backfills embeddings for the configured content types.
pub struct EmbeddingBackfillJob {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn Embedder>,
    runner: BatchRunner,
    content_types: Vec<ContentType>,
}

impl EmbeddingBackfillJob {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        embedder: Arc<dyn Embedder>,
        config: RunnerConfig,
        content_types: Vec<ContentType>,
    ) -> Self {
        Self {
            store,
            embedder,
            runner: BatchRunner::new(JOB_NAME, config),
            content_types,
        }
    }

    pub fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        let mut total = RunResult::new(JOB_NAME, self.runner.config().dry_run);
        let processor = EmbedProcessor {
            store: self.store.as_ref(),
            embedder: self.embedder.as_ref(),
        };

        for &kind in &self.content_types {
            if cancel.is_cancelled() {
                total.cancelled = true;
                break;
            }

            info!(job = JOB_NAME, content_type = %kind, embedder = self.embedder.name(), "Backfilling");
            let fetcher = KindFetcher {
                store: self.store.as_ref(),
                kind,
            };
            let sub = self.runner.run(cancel, &fetcher, &processor).await?;
            let stop = sub.cancelled;
            total.absorb(kind.as_str(), sub);
            if stop {
                break;
            }
        }

        total.finish();
        Ok(total)
    }
}

#[async_trait]
impl ScheduledJob for EmbeddingBackfillJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.run(cancel).await
    }
}
