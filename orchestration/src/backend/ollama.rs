//! Ollama transport — `/api/chat`, `/api/embeddings`, `/api/show`
//!
//! One shared `reqwest::Client` per backend. An optional semaphore caps the
//! number of requests in flight across every session using this backend.

use super::ChatBackend;
use crate::error::BackendError;
use crate::grounding::{normalize, Embedder};
use crate::model::{Message, ModelSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
/// Embedding input is cut to this many characters
pub const MAX_EMBED_CHARS: usize = 8000;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    /// Per-request deadline; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Maximum concurrent requests; `None` is unlimited
    pub max_in_flight: Option<usize>,
    /// Model used when `embed` gets no hint
    pub embedding_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
            max_in_flight: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "ChatOptions::is_empty")]
    options: ChatOptions,
}

#[derive(Debug, Default, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl ChatOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

pub struct OllamaBackend {
    config: OllamaConfig,
    client: reqwest::Client,
    limiter: Option<Arc<Semaphore>>,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        let limiter = config
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        Ok(Self {
            config,
            client,
            limiter,
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn admit(&self) -> Result<Option<SemaphorePermit<'_>>, BackendError> {
        match &self.limiter {
            Some(limiter) => limiter
                .acquire()
                .await
                .map(Some)
                .map_err(|_| BackendError::Unreachable("request limiter closed".into())),
            None => Ok(None),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.config.request_timeout.unwrap_or_default())
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }

    /// Body decoding failures; a deadline hit mid-body is still a timeout
    fn decode_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            self.transport_error(e)
        } else {
            BackendError::InvalidResponse(e.to_string())
        }
    }

    /// Callers hold an `admit` permit until the body has been read.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// Whether the daemon has `name` pulled. 404 means missing; other
    /// non-success statuses are errors.
    pub async fn show_model(&self, name: &str) -> Result<bool, BackendError> {
        let _permit = self.admit().await?;
        let response = self
            .post_json("/api/show", &serde_json::json!({ "name": name }))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn send(
        &self,
        model: &ModelSpec,
        messages: &[Message],
        stream: bool,
    ) -> Result<String, BackendError> {
        if stream {
            error!(model = %model.name, "ollama.chat.streaming_not_implemented");
            return Err(BackendError::StreamingUnsupported);
        }

        let request = ChatRequest {
            model: &model.name,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: model.temperature,
                num_predict: model.max_tokens,
            },
        };

        debug!(
            model = %model.name,
            messages = messages.len(),
            temperature = ?model.temperature,
            max_tokens = ?model.max_tokens,
            "ollama.chat.request"
        );

        let _permit = self.admit().await?;
        let started = Instant::now();
        let response = self.post_json("/api/chat", &request).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(model = %model.name, status = status.as_u16(), latency_ms, "ollama.chat.http_error");
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.decode_error(e))?;

        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        if content.is_empty() {
            error!(model = %model.name, latency_ms, "ollama.chat.invalid_response");
            return Err(BackendError::InvalidResponse(
                "reply carried no message content".into(),
            ));
        }

        info!(model = %model.name, latency_ms, "ollama.chat.success");
        Ok(content)
    }
}

#[async_trait]
impl Embedder for OllamaBackend {
    async fn embed(&self, text: &str, model_hint: Option<&str>) -> Result<Vec<f32>, BackendError> {
        let model = model_hint.unwrap_or(&self.config.embedding_model);
        let prompt = truncate_chars(text, MAX_EMBED_CHARS);

        let _permit = self.admit().await?;
        let response = self
            .post_json(
                "/api/embeddings",
                &serde_json::json!({ "model": model, "prompt": prompt }),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.decode_error(e))?;

        match parsed.embedding {
            Some(vector) if !vector.is_empty() => {
                debug!(model, dimensions = vector.len(), "ollama.embed.success");
                Ok(normalize(vector))
            }
            _ => Err(BackendError::InvalidResponse(
                "reply carried no embedding".into(),
            )),
        }
    }
}

/// Prefix of at most `max` characters, cut on a char boundary
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
