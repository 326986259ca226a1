//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use sweeper_core::error::{ErrorCode, Result, SweeperError};
use sweeper_core::jobs::cleanup::ClaimTokenStore;
use sweeper_core::jobs::embedding::{ContentType, EmbeddingCandidate, EmbeddingStore};
use sweeper_core::jobs::moderation::{ModerationCandidate, ModerationStore};
use sweeper_core::jobs::stale::StaleContentStore;
use sweeper_core::jobs::translation::{
    TranslationCandidate, TranslationStore, MAX_TRANSLATION_ATTEMPTS,
};
use sweeper_core::jobs::{CursorFetcher, ItemContext, ItemOutcome, ItemProcessor, WorkItem};
use sweeper_core::services::{
    ContentModerator, Embedder, ExternalCallError, ModerationInput, ModerationTrigger,
    ModerationVerdict, TranslationInput, TranslationOutput, Translator,
};

fn store_error(what: &str) -> SweeperError {
    SweeperError::new(ErrorCode::DatabaseQueryFailed, "A database query failed")
        .with_internal_message(what.to_string())
}

// ============================================================================
// Generic engine fakes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TestItem {
    pub id: String,
}

impl WorkItem for TestItem {
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn items(n: usize) -> Vec<TestItem> {
    (1..=n)
        .map(|i| TestItem {
            id: format!("item-{}", i),
        })
        .collect()
}

/// Serves a list by offset/limit and records every fetch. Rows only leave
/// the list when a processor built with [`ScriptedProcessor::consuming`]
/// succeeds on them.
pub struct VecFetcher {
    rows: Arc<Mutex<Vec<TestItem>>>,
    fetches: Mutex<Vec<(u32, u64)>>,
    fail_on_fetch: Option<usize>,
    fail_count: bool,
}

impl VecFetcher {
    pub fn new(items: Vec<TestItem>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(items)),
            fetches: Mutex::new(Vec::new()),
            fail_on_fetch: None,
            fail_count: false,
        }
    }

    /// Fail the `n`th fetch (0-based).
    pub fn failing_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    pub fn failing_count(mut self) -> Self {
        self.fail_count = true;
        self
    }

    pub fn fetches(&self) -> Vec<(u32, u64)> {
        self.fetches.lock().clone()
    }

    pub fn remaining(&self) -> Vec<TestItem> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl CursorFetcher for VecFetcher {
    type Item = TestItem;

    async fn count(&self) -> Result<u64> {
        if self.fail_count {
            return Err(store_error("count failed"));
        }
        Ok(self.rows.lock().len() as u64)
    }

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<TestItem>> {
        let call = {
            let mut fetches = self.fetches.lock();
            fetches.push((limit, offset));
            fetches.len() - 1
        };
        if self.fail_on_fetch == Some(call) {
            return Err(store_error("fetch failed"));
        }
        Ok(page(self.rows.lock().as_slice(), limit, offset))
    }
}

/// Returns scripted outcomes and records the order items were seen in.
#[derive(Default)]
pub struct ScriptedProcessor {
    outcomes: HashMap<String, ItemOutcome>,
    seen: Mutex<Vec<String>>,
    cancel_on: Option<(String, CancellationToken)>,
    external_call: bool,
    consumes: Option<Arc<Mutex<Vec<TestItem>>>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, id: &str, outcome: ItemOutcome) -> Self {
        self.outcomes.insert(id.to_string(), outcome);
        self
    }

    /// Fire `token` while processing `id`.
    pub fn cancel_on(mut self, id: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((id.to_string(), token));
        self
    }

    /// Route each item through a paced external call.
    pub fn with_external_call(mut self) -> Self {
        self.external_call = true;
        self
    }

    /// Remove each succeeded item from `fetcher`, like a store write that
    /// takes the record out of the unprocessed set.
    pub fn consuming(mut self, fetcher: &VecFetcher) -> Self {
        self.consumes = Some(fetcher.rows.clone());
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ItemProcessor<TestItem> for ScriptedProcessor {
    async fn process(&self, item: &TestItem, ctx: &ItemContext<'_>) -> ItemOutcome {
        self.seen.lock().push(item.id.clone());

        if self.external_call {
            let attempted = ctx
                .call(|| async { Ok::<_, ExternalCallError>(()) })
                .await;
            if !attempted.is_done() {
                return ItemOutcome::Cancelled;
            }
        }

        if let Some((id, token)) = &self.cancel_on {
            if id == &item.id {
                token.cancel();
            }
        }

        ctx.tally("processed");
        let outcome = self
            .outcomes
            .get(&item.id)
            .copied()
            .unwrap_or(ItemOutcome::Succeeded);
        if outcome == ItemOutcome::Succeeded {
            if let Some(rows) = &self.consumes {
                rows.lock().retain(|row| row.id != item.id);
            }
        }
        outcome
    }
}

// ============================================================================
// Store fake
// ============================================================================

/// Outcome of a stale-content step: `Some(n)` rows or `None` for an error.
pub type StepResult = Option<u64>;

#[derive(Default)]
pub struct StoreState {
    pub missing_embeddings: HashMap<ContentType, Vec<EmbeddingCandidate>>,
    pub embeddings: Vec<(ContentType, String, usize)>,
    pub embedding_fetches: Vec<(ContentType, u32, u64)>,
    pub fail_embedding_write: HashSet<String>,
    pub fail_embedding_fetch: HashSet<ContentType>,

    pub open_posts: Vec<ModerationCandidate>,
    pub drafts: Vec<TranslationCandidate>,

    /// Every write in order: `"status:<id>:<status>"`, `"moderated:<id>"`,
    /// `"comment:<id>"`, `"translate:<id>"`, `"attempt:<id>"`.
    pub writes: Vec<String>,
    pub comments: Vec<(String, String)>,
    pub fail_comments: bool,
    pub fail_status: bool,
    pub fail_mark_moderated: bool,
    pub translation_attempts: HashMap<String, u32>,

    pub warn: StepResult,
    pub abandon: StepResult,
    pub dormant: StepResult,
    pub stale_calls: Vec<&'static str>,

    pub expired_tokens: StepResult,
    pub token_calls: Vec<&'static str>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(f: impl FnOnce(&mut StoreState)) -> Self {
        let store = Self::new();
        f(&mut store.state.lock());
        store
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }
}

fn page<T: Clone>(all: &[T], limit: u32, offset: u64) -> Vec<T> {
    let start = (offset as usize).min(all.len());
    let end = (start + limit as usize).min(all.len());
    all[start..end].to_vec()
}

impl StoreState {
    /// A post with a recorded verdict is no longer an open candidate.
    fn settle_post(&mut self, post_id: &str) {
        self.open_posts.retain(|post| post.id != post_id);
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn count_without_embedding(&self, kind: ContentType) -> Result<u64> {
        let state = self.state.lock();
        Ok(state
            .missing_embeddings
            .get(&kind)
            .map_or(0, |v| v.len() as u64))
    }

    async fn fetch_without_embedding(
        &self,
        kind: ContentType,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let mut state = self.state.lock();
        state.embedding_fetches.push((kind, limit, offset));
        if state.fail_embedding_fetch.contains(&kind) {
            return Err(store_error("fetch without embedding failed"));
        }
        Ok(state
            .missing_embeddings
            .get(&kind)
            .map(|v| page(v, limit, offset))
            .unwrap_or_default())
    }

    async fn update_embedding(&self, kind: ContentType, id: &str, embedding: &[f32]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_embedding_write.contains(id) {
            return Err(store_error("update embedding failed"));
        }
        state.embeddings.push((kind, id.to_string(), embedding.len()));
        if let Some(missing) = state.missing_embeddings.get_mut(&kind) {
            missing.retain(|candidate| candidate.id() != id);
        }
        Ok(())
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn count_open_posts(&self) -> Result<u64> {
        Ok(self.state.lock().open_posts.len() as u64)
    }

    async fn fetch_open_posts(&self, limit: u32, offset: u64) -> Result<Vec<ModerationCandidate>> {
        Ok(page(&self.state.lock().open_posts, limit, offset))
    }

    async fn mark_moderated(&self, post_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_mark_moderated {
            return Err(store_error("mark moderated failed"));
        }
        state.writes.push(format!("moderated:{}", post_id));
        state.settle_post(post_id);
        Ok(())
    }

    async fn reject_post(&self, post_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_status {
            return Err(store_error("reject failed"));
        }
        state.writes.push(format!("status:{}:rejected", post_id));
        state.settle_post(post_id);
        Ok(())
    }

    async fn publish_post(&self, post_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_status {
            return Err(store_error("publish failed"));
        }
        state.writes.push(format!("status:{}:open", post_id));
        state.settle_post(post_id);
        Ok(())
    }

    async fn create_system_comment(&self, post_id: &str, content: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_comments {
            return Err(store_error("comment insert failed"));
        }
        state.writes.push(format!("comment:{}", post_id));
        state.comments.push((post_id.to_string(), content.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TranslationStore for MemoryStore {
    async fn count_needing_translation(&self) -> Result<u64> {
        Ok(self.state.lock().drafts.len() as u64)
    }

    async fn fetch_needing_translation(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<TranslationCandidate>> {
        Ok(page(&self.state.lock().drafts, limit, offset))
    }

    async fn apply_translation(&self, post_id: &str, _title: &str, _description: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push(format!("translate:{}", post_id));
        state.drafts.retain(|draft| draft.id != post_id);
        Ok(())
    }

    async fn increment_translation_attempts(&self, post_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push(format!("attempt:{}", post_id));
        let attempts = {
            let n = state
                .translation_attempts
                .entry(post_id.to_string())
                .or_insert(0);
            *n += 1;
            *n
        };
        if attempts >= MAX_TRANSLATION_ATTEMPTS as u32 {
            state.drafts.retain(|draft| draft.id != post_id);
        }
        Ok(())
    }
}

#[async_trait]
impl StaleContentStore for MemoryStore {
    async fn warn_approaching_abandonment(
        &self,
        _warn_after: Duration,
        _abandon_after: Duration,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("warn");
        state.warn.ok_or_else(|| store_error("warn failed"))
    }

    async fn abandon_stale_approaches(&self, _older_than: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("abandon");
        state.abandon.ok_or_else(|| store_error("abandon failed"))
    }

    async fn mark_dormant_posts(&self, _older_than: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("dormant");
        state.dormant.ok_or_else(|| store_error("dormant failed"))
    }

    async fn count_approaching_abandonment(
        &self,
        _warn_after: Duration,
        _abandon_after: Duration,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("count_warn");
        state.warn.ok_or_else(|| store_error("count warn failed"))
    }

    async fn count_stale_approaches(&self, _older_than: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("count_abandon");
        state.abandon.ok_or_else(|| store_error("count abandon failed"))
    }

    async fn count_dormant_posts(&self, _older_than: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        state.stale_calls.push("count_dormant");
        state.dormant.ok_or_else(|| store_error("count dormant failed"))
    }
}

#[async_trait]
impl ClaimTokenStore for MemoryStore {
    async fn delete_expired_tokens(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.token_calls.push("delete");
        state.expired_tokens.ok_or_else(|| store_error("delete failed"))
    }

    async fn count_expired_tokens(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.token_calls.push("count");
        state.expired_tokens.ok_or_else(|| store_error("count failed"))
    }
}

// ============================================================================
// Service fakes
// ============================================================================

/// Embeds every text as a fixed vector unless it is listed as failing.
#[derive(Default)]
pub struct FakeEmbedder {
    pub failing_texts: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn failing_on(texts: &[&str]) -> Self {
        Self {
            failing_texts: texts.iter().map(|t| t.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        "fake_embedder"
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ExternalCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_texts.contains(text) {
            return Err(ExternalCallError::permanent("fake_embedder", "bad input"));
        }
        Ok(vec![0.25; 8])
    }
}

/// Approves everything except titles mapped to a rejection.
#[derive(Default)]
pub struct FakeModerator {
    pub rejections: HashMap<String, String>,
    pub calls: AtomicUsize,
}

impl FakeModerator {
    pub fn rejecting(title: &str, explanation: &str) -> Self {
        let mut rejections = HashMap::new();
        rejections.insert(title.to_string(), explanation.to_string());
        Self {
            rejections,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentModerator for FakeModerator {
    fn name(&self) -> &str {
        "fake_moderator"
    }

    async fn moderate(
        &self,
        input: &ModerationInput,
    ) -> std::result::Result<ModerationVerdict, ExternalCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.rejections.get(&input.title) {
            Some(explanation) => ModerationVerdict::rejected(explanation.clone()),
            None => ModerationVerdict::approved(),
        })
    }
}

/// Plays back scripted replies in call order, then translates by prefixing.
#[derive(Default)]
pub struct ScriptedTranslator {
    pub replies: Mutex<VecDeque<std::result::Result<TranslationOutput, ExternalCallError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranslator {
    pub fn new(
        replies: Vec<std::result::Result<TranslationOutput, ExternalCallError>>,
    ) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    fn name(&self) -> &str {
        "fake_translator"
    }

    async fn translate(
        &self,
        input: &TranslationInput,
    ) -> std::result::Result<TranslationOutput, ExternalCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.replies.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(TranslationOutput {
                title: format!("EN {}", input.title),
                description: format!("EN {}", input.description),
            })
        })
    }
}

#[derive(Default)]
pub struct RecordingTrigger {
    pub triggered: Mutex<Vec<(String, ModerationInput)>>,
}

impl RecordingTrigger {
    pub fn ids(&self) -> Vec<String> {
        self.triggered.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

impl ModerationTrigger for RecordingTrigger {
    fn trigger(&self, post_id: &str, input: ModerationInput) {
        self.triggered.lock().push((post_id.to_string(), input));
    }
}

pub fn translated(title: &str) -> std::result::Result<TranslationOutput, ExternalCallError> {
    Ok(TranslationOutput {
        title: title.to_string(),
        description: format!("{} body", title),
    })
}
