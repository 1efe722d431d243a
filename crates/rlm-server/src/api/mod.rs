//! HTTP surface — OpenAI-compatible routes over the recursive session
//!
//! ```text
//!   GET  /health               liveness
//!   GET  /v1/models            alias + ladder
//!   POST /v1/chat/completions  JSON, or SSE when stream=true
//!   POST /v1/embeddings        embedding passthrough
//! ```

pub mod chat;
pub mod embeddings;
pub mod types;

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use orchestration::{ChatBackend, Embedder, GroundingReviewer, OllamaBackend, OrchestratorError};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use types::{ErrorBody, ErrorEnvelope, ModelCard, ModelList};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub backend: Arc<dyn ChatBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub grounding: Option<Arc<GroundingReviewer>>,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        backend: Arc<dyn ChatBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let grounding = config.orchestration.grounding.then(|| {
            Arc::new(
                GroundingReviewer::new(embedder.clone())
                    .with_threshold(config.orchestration.grounding_threshold)
                    .with_model(config.models.embedding.clone()),
            )
        });
        Self {
            config: Arc::new(config),
            backend,
            embedder,
            grounding,
        }
    }

    /// State backed by one shared Ollama client for chat and embeddings
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let ollama = Arc::new(
            OllamaBackend::new(config.ollama_config()).context("Failed to build Ollama client")?,
        );
        Ok(Self::new(config, ollama.clone(), ollama))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/embeddings", post(embeddings::create_embeddings))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let created = chrono::Utc::now().timestamp();
    let card = |id: &str| ModelCard {
        id: id.to_string(),
        object: "model".to_string(),
        created,
        owned_by: "local".to_string(),
    };

    let mut data = vec![card(&state.config.server.model_alias)];
    data.extend(state.config.models.ladder.iter().map(|m| card(&m.name)));

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// Handler errors, rendered as OpenAI error envelopes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.to_string(),
                kind: self.kind().to_string(),
            },
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        if let Some(stage) = err.cancelled_stage() {
            tracing::debug!(%stage, "api.session_cancelled");
        }
        match err {
            OrchestratorError::InvalidRequest(msg) => Self::BadRequest(msg),
            e if e.is_transport() => Self::Upstream(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<orchestration::BackendError> for ApiError {
    fn from(err: orchestration::BackendError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = self.status().as_u16(), error = %self, "api.error");
        (self.status(), Json(self.envelope())).into_response()
    }
}
