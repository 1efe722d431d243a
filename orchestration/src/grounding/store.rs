//! In-memory embedding store with cosine top-k retrieval

use super::cosine_similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl StoredEmbedding {
    /// Entry keyed by a blake3 hash of `model:text`
    pub fn new(text: impl Into<String>, vector: Vec<f32>, model: impl Into<String>) -> Self {
        let text = text.into();
        let model = model.into();
        Self {
            id: content_id(&text, &model),
            text,
            vector,
            model,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Stable id for a piece of text under a given embedding model
pub fn content_id(text: &str, model: &str) -> String {
    blake3::hash(format!("{model}:{text}").as_bytes())
        .to_hex()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub min_score: f32,
    /// Only consider entries embedded with this model
    pub model: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            min_score: 0.0,
            model: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct EmbeddingStore {
    entries: RwLock<HashMap<String, StoredEmbedding>>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id; returns the id
    pub async fn upsert(&self, entry: StoredEmbedding) -> String {
        let id = entry.id.clone();
        self.entries.write().await.insert(id.clone(), entry);
        id
    }

    /// Top `limit` entries by descending cosine score, at or above `min_score`
    pub async fn query(&self, vector: &[f32], options: &QueryOptions) -> Vec<QueryResult> {
        let entries = self.entries.read().await;
        let mut results: Vec<QueryResult> = entries
            .values()
            .filter(|e| options.model.as_deref().map_or(true, |m| e.model == m))
            .map(|e| QueryResult {
                id: e.id.clone(),
                text: e.text.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .filter(|r| r.score >= options.min_score)
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.limit);
        results
    }

    pub async fn get(&self, id: &str) -> Option<StoredEmbedding> {
        self.entries.read().await.get(id).cloned()
    }

    /// Remove by id; returns whether anything was removed
    pub async fn delete(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
