//! Reviser — one corrective rewrite of a rejected answer
//!
//! The output is returned as-is; whether to trust it is the caller's call.

use crate::backend::ChatBackend;
use crate::error::BackendError;
use crate::model::{Message, ModelSpec};
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RevisionRequest<'a> {
    pub original_prompt: &'a str,
    pub previous_response: &'a str,
    pub context: &'a [String],
    pub reviewer_notes: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub content: String,
    /// Model that wrote the revision
    pub model: String,
}

pub fn build_revision_messages(request: &RevisionRequest<'_>) -> Vec<Message> {
    vec![
        Message::system(prompts::REVISER_SYSTEM_PROMPT),
        Message::user(prompts::reviser_user_prompt(
            request.original_prompt,
            request.previous_response,
            request.reviewer_notes,
            request.context,
        )),
    ]
}

pub async fn revise(
    backend: &dyn ChatBackend,
    model: &ModelSpec,
    request: &RevisionRequest<'_>,
) -> Result<Revision, BackendError> {
    let messages = build_revision_messages(request);
    let content = backend.send(model, &messages, false).await?;
    debug!(
        model = %model.name,
        with_notes = request.reviewer_notes.is_some(),
        "reviser.revised"
    );
    Ok(Revision {
        content,
        model: model.name.clone(),
    })
}
