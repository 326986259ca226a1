//! External capabilities used by the jobs: embedding, moderation, translation.
//!
//! Each capability is a narrow trait so jobs can be exercised against fakes.
//! The HTTP adapters in the submodules implement them against real providers.
//! Every adapter reports failures as [`ExternalCallError`], which tells a
//! rate-limit signal apart from everything else.

pub mod groq;
pub mod ollama;
pub mod voyage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{EmbeddingProvider, ServicesConfig};

pub use groq::{GroqModerator, GroqTranslator};
pub use ollama::OllamaEmbedder;
pub use voyage::VoyageEmbedder;

/// Retry-After used when a 429 carries no usable header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of a single call to an external service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExternalCallError {
    /// The service asked us to back off.
    #[error("{service}: rate limited (retry after {retry_after:?}): {message}")]
    RateLimited {
        service: String,
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("{service}: {message}")]
    Other {
        service: String,
        message: String,
        /// Whether repeating the same call may succeed
        retryable: bool,
    },
}

impl ExternalCallError {
    pub fn rate_limited(
        service: impl Into<String>,
        retry_after: Option<Duration>,
        message: impl Into<String>,
    ) -> Self {
        Self::RateLimited {
            service: service.into(),
            retry_after,
            message: message.into(),
        }
    }

    /// A failure worth retrying (network blip, 5xx).
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            service: service.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will repeat on retry (bad input, unparseable response).
    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            service: service.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Map a transport-level reqwest error.
    pub fn from_reqwest(service: &str, error: &reqwest::Error) -> Self {
        if error.is_builder() || error.is_decode() {
            Self::permanent(service, error.to_string())
        } else {
            Self::transient(service, error.to_string())
        }
    }

    /// Map a non-success HTTP status. 429 is a rate limit, 5xx is transient,
    /// any other status is permanent.
    pub fn from_status(
        service: &str,
        status: reqwest::StatusCode,
        retry_after: Option<&str>,
        body: &str,
    ) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::rate_limited(service, Some(parse_retry_after(retry_after)), body)
        } else if status.is_server_error() {
            Self::transient(service, format!("status {}: {}", status.as_u16(), body))
        } else {
            Self::permanent(service, format!("status {}: {}", status.as_u16(), body))
        }
    }

    pub fn service(&self) -> &str {
        match self {
            Self::RateLimited { service, .. } | Self::Other { service, .. } => service,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capabilities
// ═══════════════════════════════════════════════════════════════════════════════

/// Produces a vector embedding for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Service name used in logs and metrics.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalCallError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModerationInput {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Decision returned by a moderation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub approved: bool,
    #[serde(default)]
    pub language_detected: String,
    #[serde(default)]
    pub rejection_reasons: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

impl ModerationVerdict {
    pub fn approved() -> Self {
        Self {
            approved: true,
            language_detected: "English".to_string(),
            rejection_reasons: Vec::new(),
            confidence: 1.0,
            explanation: String::new(),
        }
    }

    pub fn rejected(explanation: impl Into<String>) -> Self {
        Self {
            approved: false,
            language_detected: String::new(),
            rejection_reasons: Vec::new(),
            confidence: 1.0,
            explanation: explanation.into(),
        }
    }
}

#[async_trait]
pub trait ContentModerator: Send + Sync {
    fn name(&self) -> &str;

    async fn moderate(&self, input: &ModerationInput) -> Result<ModerationVerdict, ExternalCallError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationInput {
    pub title: String,
    pub description: String,
    /// Source language hint, e.g. "Portuguese"
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationOutput {
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, input: &TranslationInput) -> Result<TranslationOutput, ExternalCallError>;
}

/// Fire-and-forget follow-up after a post was translated.
///
/// Implementations must return immediately; the caller never awaits or
/// retries the triggered work.
pub trait ModerationTrigger: Send + Sync {
    fn trigger(&self, post_id: &str, input: ModerationInput);
}

/// Build the configured embedding backend.
pub fn embedder_from_config(config: &ServicesConfig) -> crate::error::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding_provider {
        EmbeddingProvider::Voyage => Arc::new(VoyageEmbedder::from_config(config)?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::from_config(config)?),
    };
    Ok(embedder)
}

/// A trigger that does nothing, for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrigger;

impl ModerationTrigger for NoopTrigger {
    fn trigger(&self, _post_id: &str, _input: ModerationInput) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP plumbing
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared HTTP client builder for the adapters.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sweeper/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// A fully read HTTP response.
pub(crate) struct HttpReply {
    pub status: reqwest::StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: String,
}

impl HttpReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body of a 2xx response, or the mapped failure.
    pub fn success_body(self, service: &str) -> Result<String, ExternalCallError> {
        if self.status.is_success() {
            return Ok(self.body);
        }
        let retry_after = self.header(reqwest::header::RETRY_AFTER.as_str());
        Err(ExternalCallError::from_status(
            service,
            self.status,
            retry_after,
            &self.body,
        ))
    }
}

/// Send a request and read the whole body.
pub(crate) async fn send(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<HttpReply, ExternalCallError> {
    let response = request
        .send()
        .await
        .map_err(|e| ExternalCallError::from_reqwest(service, &e))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ExternalCallError::from_reqwest(service, &e))?;
    Ok(HttpReply {
        status,
        headers,
        body,
    })
}

/// Response envelope shared by the OpenAI-compatible embedding endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Parse a body and take the first vector.
    pub fn first_vector(service: &str, body: &str) -> Result<Vec<f32>, ExternalCallError> {
        let parsed: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
            ExternalCallError::permanent(service, format!("failed to parse response: {}", e))
        })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ExternalCallError::permanent(service, "empty embedding data"))
    }
}
