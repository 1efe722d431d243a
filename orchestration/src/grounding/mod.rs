//! Grounding — semantic similarity between an answer and its reference context
//!
//! ```text
//!   response ──embed──┐
//!                     ├─ cosine ─► max ─► ≥ threshold ? approved : rejected
//!   context[i] ─embed─┘   (plus the prompt itself)
//! ```

pub mod store;

pub use store::{EmbeddingStore, QueryOptions, QueryResult, StoredEmbedding};

use crate::confidence::{self, ConfidenceSignals};
use crate::error::BackendError;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_GROUNDING_THRESHOLD: f64 = 0.75;

/// Produces unit-length embedding vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, model_hint: Option<&str>) -> Result<Vec<f32>, BackendError>;
}

/// Scale to unit length; a zero vector is returned unchanged
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Cosine similarity over the common prefix of `a` and `b`. Zero-norm input yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Outcome of one grounding review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingReport {
    pub approved: bool,
    /// Best cosine similarity across the references
    pub max_similarity: f64,
    /// `combine({embedding: max_similarity})`
    pub confidence: f64,
}

/// Approves a response only if it sits close to some reference text
pub struct GroundingReviewer {
    embedder: Arc<dyn Embedder>,
    threshold: f64,
    model: Option<String>,
}

impl GroundingReviewer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_GROUNDING_THRESHOLD,
            model: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `response` against every context chunk and the prompt
    pub async fn review(
        &self,
        prompt: &str,
        response: &str,
        context: &[String],
    ) -> Result<GroundingReport, BackendError> {
        let hint = self.model.as_deref();
        let answer = self.embedder.embed(response, hint).await?;

        let references = context
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(prompt));
        let vectors = try_join_all(references.map(|text| self.embedder.embed(text, hint))).await?;

        let max_similarity = vectors
            .iter()
            .map(|v| cosine_similarity(&answer, v) as f64)
            .fold(0.0f64, f64::max);

        let approved = max_similarity >= self.threshold;
        let confidence = confidence::combine(&ConfidenceSignals::embedding(max_similarity));

        debug!(
            references = vectors.len(),
            max_similarity, approved, "grounding.review"
        );

        Ok(GroundingReport {
            approved,
            max_similarity,
            confidence,
        })
    }
}
