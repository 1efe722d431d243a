//! `POST /v1/embeddings`

use super::types::{EmbeddingData, EmbeddingRequest, EmbeddingResponse};
use super::{ApiError, AppState};
use axum::extract::State;
use axum::response::Json;
use tracing::debug;

pub async fn create_embeddings(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    let texts = request.input.into_texts();
    if texts.is_empty() {
        return Err(ApiError::BadRequest(
            "Invalid request: input must not be empty".into(),
        ));
    }
    if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "Invalid request: input[{index}] is empty"
        )));
    }

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.models.embedding.clone());

    let mut data = Vec::with_capacity(texts.len());
    for (index, text) in texts.iter().enumerate() {
        let embedding = state.embedder.embed(text, Some(model.as_str())).await?;
        data.push(EmbeddingData {
            object: "embedding".to_string(),
            embedding,
            index,
        });
    }

    debug!(model = %model, inputs = data.len(), "embeddings.created");

    Ok(Json(EmbeddingResponse {
        object: "list".to_string(),
        data,
        model,
    }))
}
