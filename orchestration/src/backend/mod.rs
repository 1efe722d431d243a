//! Backend transport — the one capability the pipeline needs from an LLM host
//!
//! Every stage calls `ChatBackend::send` with a model and a full conversation
//! and gets back the assistant text. Implementations must be safe to share
//! across concurrent sessions.

pub mod ollama;

pub use ollama::{OllamaBackend, OllamaConfig};

use crate::error::BackendError;
use crate::model::{Message, ModelSpec};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &str;

    /// Send one conversation and return the reply text.
    ///
    /// `stream == true` must fail with `BackendError::StreamingUnsupported`
    /// unless the implementation actually streams; callers never fall back.
    async fn send(
        &self,
        model: &ModelSpec,
        messages: &[Message],
        stream: bool,
    ) -> Result<String, BackendError>;
}

pub type SharedBackend = Arc<dyn ChatBackend>;

