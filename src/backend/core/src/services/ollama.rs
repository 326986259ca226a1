//! Local Ollama embeddings over the OpenAI-compatible endpoint.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{http_client, send, Embedder, EmbeddingResponse, ExternalCallError};
use crate::config::ServicesConfig;
use crate::error::Result;

const SERVICE: &str = "ollama";

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

/// Symmetric embeddings; documents and queries embed the same way.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn from_config(config: &ServicesConfig) -> Result<Self> {
        Ok(Self::new(config.embedding_timeout)?
            .with_base_url(&config.ollama_base_url)
            .with_model(&config.ollama_model))
    }

    /// An empty value keeps the default.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        if !base_url.is_empty() {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ExternalCallError> {
        if text.is_empty() {
            return Err(ExternalCallError::permanent(SERVICE, "input text must not be empty"));
        }

        let reply = send(
            SERVICE,
            self.client
                .post(format!("{}/embeddings", self.base_url))
                .json(&EmbeddingRequest {
                    input: text,
                    model: &self.model,
                }),
        )
        .await?;

        let body = reply.success_body(SERVICE)?;
        EmbeddingResponse::first_vector(SERVICE, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_json(serde_json::json!({
                "input": "some text",
                "model": "nomic-embed-text"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 2.0], "index": 0}]
            })))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri());
        assert_eq!(embedder.embed("some text").await.unwrap(), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri());
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, ExternalCallError::Other { retryable: true, .. }));
    }

    #[test]
    fn test_empty_base_url_keeps_default() {
        let embedder = OllamaEmbedder::new(Duration::from_secs(1))
            .unwrap()
            .with_base_url("");
        assert_eq!(embedder.base_url, DEFAULT_BASE_URL);
    }
}
