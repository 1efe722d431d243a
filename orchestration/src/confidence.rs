//! Confidence Combiner — blends partial confidence signals into one score
//!
//! ```text
//!   model ×0.3 ─┐
//!   verifier ×0.5 ─┼─► Σ(signal·w) / Σ(w present) ─► clamp [0,1]
//!   embedding ×0.2 ─┘
//! ```
//!
//! Missing signals renormalize the weights instead of counting as zero.
//! Pure functions only; nothing here performs I/O or logs.

use serde::{Deserialize, Serialize};

pub const MODEL_WEIGHT: f64 = 0.3;
pub const VERIFIER_WEIGHT: f64 = 0.5;
pub const EMBEDDING_WEIGHT: f64 = 0.2;

/// Default acceptance bar for `is_acceptable`
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.75;
/// Default escalation bar for `should_escalate`
pub const DEFAULT_ESCALATE_THRESHOLD: f64 = 0.5;

/// Partial record of confidence signals; any subset may be present
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    /// Model self-reported confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<f64>,
    /// Verifier verdict confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<f64>,
    /// Embedding similarity against reference context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<f64>,
}

impl ConfidenceSignals {
    pub fn verifier(value: f64) -> Self {
        Self {
            verifier: Some(value),
            ..Default::default()
        }
    }

    pub fn embedding(value: f64) -> Self {
        Self {
            embedding: Some(value),
            ..Default::default()
        }
    }
}

/// Clamp into [0,1]; NaN maps to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted, renormalized blend of the present signals. 0 when none are present.
pub fn combine(signals: &ConfidenceSignals) -> f64 {
    let weighted = [
        (signals.model, MODEL_WEIGHT),
        (signals.verifier, VERIFIER_WEIGHT),
        (signals.embedding, EMBEDDING_WEIGHT),
    ];

    let (sum, weight) = weighted
        .iter()
        .filter_map(|(signal, w)| signal.map(|s| (s * w, *w)))
        .fold((0.0, 0.0), |(sum, weight), (s, w)| (sum + s, weight + w));

    if weight == 0.0 {
        return 0.0;
    }
    clamp_unit(sum / weight)
}

/// `confidence >= threshold`
pub fn is_acceptable(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}

/// `confidence < min_confidence`
pub fn should_escalate(confidence: f64, min_confidence: f64) -> bool {
    confidence < min_confidence
}
