//! Prompt text for each pipeline stage

use crate::model::numbered_context;

pub const ANSWER_SYSTEM_PROMPT: &str =
    "Answer the user prompt accurately and concisely using the provided context.";

pub const VERIFIER_SYSTEM_PROMPT: &str = "You are a strict verifier. Your job is to approve or reject answers. \
You must be conservative and reject if unsure.";

pub const REVISER_SYSTEM_PROMPT: &str = "You are revising a previous answer that was rejected. \
Correct errors, remove unsupported claims, and strictly adhere to the provided context.";

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a planning model.

Your task is NOT to answer the user directly.

Your task is to:
- Understand the user's intent
- Break the task into a clear, minimal plan
- Identify uncertainties or missing information
- Propose a strategy that another model can execute

Rules:
- Do NOT solve the task
- Do NOT include explanations or prose
- Be concise and structured
- Assume a reviewer will validate your output

Return the plan in the following format ONLY:

PLAN:
- Step 1: ...
- Step 2: ...
- Step 3: ...

ASSUMPTIONS:
- ...

RISKS:
- ...

ESCALATION_NEEDED:
- true | false"#;

/// Prompt alone when there is no context, otherwise a CONTEXT/QUESTION block
pub fn answer_user_prompt(prompt: &str, context: &[String]) -> String {
    if context.is_empty() {
        return prompt.to_string();
    }
    format!(
        "CONTEXT:\n{}\n\nQUESTION:\n{}",
        numbered_context(context),
        prompt
    )
}

pub fn verifier_user_prompt(prompt: &str, response: &str, context: &[String]) -> String {
    format!(
        r#"USER PROMPT:
{prompt}

MODEL RESPONSE:
{response}

REFERENCE CONTEXT:
{context}

TASK:
1. Is the response correct?
2. Is it fully supported by the reference context?
3. Does it avoid speculation or fabrication?

Respond ONLY with valid JSON in the following format:
{{
  "approved": boolean,
  "confidence": number,
  "notes": string
}}"#,
        context = numbered_context(context),
    )
}

pub fn reviser_user_prompt(
    original_prompt: &str,
    previous_response: &str,
    reviewer_notes: Option<&str>,
    context: &[String],
) -> String {
    let feedback = match reviewer_notes {
        Some(notes) if !notes.trim().is_empty() => format!("REVIEWER FEEDBACK:\n{notes}\n\n"),
        _ => String::new(),
    };
    format!(
        r#"ORIGINAL QUESTION:
{original_prompt}

PREVIOUS (REJECTED) RESPONSE:
{previous_response}

{feedback}REFERENCE CONTEXT:
{context}

TASK:
Rewrite the response so that it is:
- Factually correct
- Fully supported by the reference context
- Clear and concise
- Free of speculation

Return ONLY the revised answer text."#,
        context = numbered_context(context),
    )
}
