//! Voyage AI embeddings.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{http_client, send, Embedder, EmbeddingResponse, ExternalCallError};
use crate::config::ServicesConfig;
use crate::error::{Result, SweeperError};

const SERVICE: &str = "voyage";

pub const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
pub const DEFAULT_MODEL: &str = "voyage-code-3";

/// Longest input sent, roughly 8000 tokens at 4 chars per token.
pub const MAX_INPUT_CHARS: usize = 32_000;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    input_type: &'static str,
}

/// Document embeddings through `POST {base}/embeddings`.
pub struct VoyageEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl VoyageEmbedder {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(SweeperError::config("voyage api key must not be empty"));
        }
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn from_config(config: &ServicesConfig) -> Result<Self> {
        Ok(Self::new(config.voyage_api_key.expose(), config.embedding_timeout)?
            .with_base_url(&config.voyage_base_url)
            .with_model(&config.voyage_model))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ExternalCallError> {
        if text.is_empty() {
            return Err(ExternalCallError::permanent(SERVICE, "input text must not be empty"));
        }

        let request = EmbeddingRequest {
            input: truncate_chars(text, MAX_INPUT_CHARS),
            model: &self.model,
            input_type: "document",
        };

        let reply = send(
            SERVICE,
            self.client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request),
        )
        .await?;

        let body = reply.success_body(SERVICE)?;
        EmbeddingResponse::first_vector(SERVICE, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer) -> VoyageEmbedder {
        VoyageEmbedder::new("test-key", Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn test_embed_sends_document_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "voyage-code-3",
                "input_type": "document"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
                "usage": {"total_tokens": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vector = embedder(&server).embed("hello world").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "9")
                    .set_body_string("too many requests"),
            )
            .mount(&server)
            .await;

        let err = embedder(&server).embed("hello").await.unwrap_err();
        assert_eq!(
            err,
            ExternalCallError::rate_limited(SERVICE, Some(Duration::from_secs(9)), "too many requests")
        );
    }

    #[tokio::test]
    async fn test_empty_data_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let err = embedder(&server).embed("hello").await.unwrap_err();
        assert!(matches!(err, ExternalCallError::Other { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_empty_input_never_calls_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = embedder(&server).embed("").await.unwrap_err();
        assert!(matches!(err, ExternalCallError::Other { retryable: false, .. }));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 4), "abcd");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(VoyageEmbedder::new("", Duration::from_secs(1)).is_err());
    }
}
