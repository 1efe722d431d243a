//! Planner — one call that decomposes the prompt without answering it

use crate::backend::ChatBackend;
use crate::error::BackendError;
use crate::model::{Message, ModelSpec};
use crate::prompts::PLANNER_SYSTEM_PROMPT;
use tracing::debug;

pub const PLAN_CONTEXT_PREFIX: &str = "PLAN:\n";

pub fn build_plan_messages(user_prompt: &str) -> Vec<Message> {
    vec![
        Message::system(PLANNER_SYSTEM_PROMPT),
        Message::user(user_prompt),
    ]
}

/// Returns the planner's reply verbatim
pub async fn plan(
    backend: &dyn ChatBackend,
    model: &ModelSpec,
    user_prompt: &str,
) -> Result<String, BackendError> {
    let messages = build_plan_messages(user_prompt);
    let plan = backend.send(model, &messages, false).await?;
    debug!(model = %model.name, plan_len = plan.len(), "planner.plan");
    Ok(plan)
}

/// Context chunk carrying the plan into later stages
pub fn plan_context_chunk(plan: &str) -> String {
    format!("{PLAN_CONTEXT_PREFIX}{plan}")
}
