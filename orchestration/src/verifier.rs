//! Verifier Adapter — turns a verifier model's free text into a `Verdict`
//!
//! The verifier is asked for `{approved, confidence, notes}` but small models
//! wrap JSON in prose or return nothing usable. The outermost `{ ... }` span
//! is parsed. Only a JSON `true` approves and only a JSON number carries
//! confidence; any other field type counts as a rejection at confidence 0.
//! Anything undecodable becomes a rejected verdict with confidence 0; it is
//! never an error.

use crate::backend::ChatBackend;
use crate::confidence::clamp_unit;
use crate::error::BackendError;
use crate::model::{Message, ModelSpec};
use crate::prompts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const UNPARSEABLE_NOTE: &str = "Verifier output could not be parsed";

/// Result of one verification pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    /// Always within [0,1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// True when this is the fallback for an undecodable reply
    #[serde(default)]
    pub degraded: bool,
}

impl Verdict {
    /// Rejected, confidence 0, with an explanatory note
    pub fn unverifiable(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            confidence: 0.0,
            notes: Some(reason.into()),
            degraded: true,
        }
    }
}

/// Tagged decoder result
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedVerdict {
    Decoded(Verdict),
    Unparseable { reason: String },
}

impl ParsedVerdict {
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    /// Collapse to a verdict, substituting the rejected default on failure
    pub fn into_verdict(self) -> Verdict {
        match self {
            Self::Decoded(verdict) => verdict,
            Self::Unparseable { reason } => {
                Verdict::unverifiable(format!("{UNPARSEABLE_NOTE}: {reason}"))
            }
        }
    }
}

/// What is being verified
#[derive(Debug, Clone, Copy)]
pub struct VerificationRequest<'a> {
    pub prompt: &'a str,
    pub response: &'a str,
    pub context: &'a [String],
}

pub fn build_verifier_messages(request: &VerificationRequest<'_>) -> Vec<Message> {
    vec![
        Message::system(prompts::VERIFIER_SYSTEM_PROMPT),
        Message::user(prompts::verifier_user_prompt(
            request.prompt,
            request.response,
            request.context,
        )),
    ]
}

/// Decode the outermost `{ ... }` span of `text`
pub fn parse_verdict(text: &str) -> ParsedVerdict {
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return ParsedVerdict::Unparseable {
                reason: "no JSON object found".into(),
            }
        }
    };

    let value: Value = match serde_json::from_str(&text[start..=end]) {
        Ok(value) => value,
        Err(e) => {
            return ParsedVerdict::Unparseable {
                reason: e.to_string(),
            }
        }
    };

    let Some(object) = value.as_object() else {
        return ParsedVerdict::Unparseable {
            reason: "JSON is not an object".into(),
        };
    };

    ParsedVerdict::Decoded(Verdict {
        approved: object.get("approved").map_or(false, coerce_bool),
        confidence: object.get("confidence").map_or(0.0, coerce_confidence),
        notes: object.get("notes").and_then(coerce_notes),
        degraded: false,
    })
}

fn coerce_bool(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

fn coerce_confidence(value: &Value) -> f64 {
    value.as_f64().map(clamp_unit).unwrap_or(0.0)
}

fn coerce_notes(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Ask `model` to judge `request`. Only transport failures are errors.
pub async fn verify(
    backend: &dyn ChatBackend,
    model: &ModelSpec,
    request: &VerificationRequest<'_>,
) -> Result<Verdict, BackendError> {
    let messages = build_verifier_messages(request);
    let reply = backend.send(model, &messages, false).await?;

    let parsed = parse_verdict(&reply);
    if !parsed.is_decoded() {
        warn!(model = %model.name, reply_len = reply.len(), "verifier.unparseable");
    }
    let verdict = parsed.into_verdict();
    debug!(
        model = %model.name,
        approved = verdict.approved,
        confidence = verdict.confidence,
        "verifier.verdict"
    );
    Ok(verdict)
}
