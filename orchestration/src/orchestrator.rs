//! Orchestrator Loop — generate → verify → (accept | escalate | retry | stop)
//!
//! ```text
//!              ┌──────────────── Iterating ◄──────────────────┐
//!              │ attempts += 1                                │
//!              │ answer  = send(current_model)                │
//!              │ verdict = verify(verifier_model)             │
//!              │ c       = combine({verifier})                │
//!              ▼                                              │
//!   approved ∧ c ≥ min_confidence ──► Accepted                │
//!   c < escalate_below ∧ next rung ∧ retries left ──► escalate┤
//!   attempts ≥ max_retries ──────────► Exhausted              │
//!   otherwise ────────────────────────────────────────────────┘
//! ```
//!
//! `c` in [0.5, 0.75) by default neither escalates nor accepts and retries
//! on the same model. Exhaustion is a normal return, not an error.

use crate::backend::ChatBackend;
use crate::confidence::{
    self, ConfidenceSignals, DEFAULT_ACCEPT_THRESHOLD, DEFAULT_ESCALATE_THRESHOLD,
};
use crate::control::RunControl;
use crate::error::OrchestratorError;
use crate::escalation::{EscalationPolicy, EscalationState};
use crate::model::{Message, ModelSpec};
use crate::prompts;
use crate::status::{Phase, StatusEvent};
use crate::verifier::{self, VerificationRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Thresholds and retry bound for one loop run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Upper bound on iterations; must be ≥ 1
    pub max_retries: u32,
    /// Acceptance bar for the combined confidence
    pub min_confidence: f64,
    /// Escalate when the combined confidence is below this
    pub escalate_below: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_confidence: DEFAULT_ACCEPT_THRESHOLD,
            escalate_below: DEFAULT_ESCALATE_THRESHOLD,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_retries == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "max_retries must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("escalate_below", self.escalate_below),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Iterating,
    Accepted,
    Exhausted,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterating => write!(f, "iterating"),
            Self::Accepted => write!(f, "accepted"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Terminal value of one loop run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    pub content: String,
    /// Model that produced `content`
    pub model: String,
    pub confidence: f64,
    pub attempts: u32,
    /// `Accepted` or `Exhausted`
    pub outcome: LoopState,
}

impl LoopResult {
    pub fn accepted(&self) -> bool {
        self.outcome == LoopState::Accepted
    }
}

/// Everything one loop run needs besides the prompt
#[derive(Debug, Clone)]
pub struct LoopOptions<'a> {
    pub initial_model: &'a ModelSpec,
    pub verifier_model: &'a ModelSpec,
    pub policy: &'a EscalationPolicy,
    pub config: LoopConfig,
}

pub fn build_answer_messages(prompt: &str, context: &[String]) -> Vec<Message> {
    vec![
        Message::system(prompts::ANSWER_SYSTEM_PROMPT),
        Message::user(prompts::answer_user_prompt(prompt, context)),
    ]
}

/// Drive the loop to `Accepted` or `Exhausted`.
///
/// Fails fast, before any backend call, if the config is out of range or
/// `initial_model` is not on the ladder. Transport failures abort the run.
pub async fn run_loop(
    backend: &dyn ChatBackend,
    prompt: &str,
    context: &[String],
    options: &LoopOptions<'_>,
    control: &RunControl,
) -> Result<LoopResult, OrchestratorError> {
    let config = options.config;
    config.validate()?;
    options.policy.position(&options.initial_model.name)?;

    let mut state = EscalationState::new(options.initial_model.clone());
    let messages = build_answer_messages(prompt, context);

    debug!(
        prompt_len = prompt.len(),
        context_items = context.len(),
        initial_model = %options.initial_model.name,
        max_retries = config.max_retries,
        min_confidence = config.min_confidence,
        "orchestrator.start"
    );
    control.notify(StatusEvent::new(Phase::Orchestrator, "Starting reasoning loop"));

    loop {
        let attempt = state.record_attempt();
        let model = state.current_model.clone();

        debug!(attempt, model = %model.name, "orchestrator.iteration");
        control.notify(
            StatusEvent::new(
                Phase::Orchestrator,
                format!("Attempt {attempt} with model {}", model.name),
            )
            .with_step(attempt),
        );

        let response = control
            .guard(Phase::Orchestrator, backend.send(&model, &messages, false))
            .await?;

        let request = VerificationRequest {
            prompt,
            response: &response,
            context,
        };
        let verdict = control
            .guard(
                Phase::Verification,
                verifier::verify(backend, options.verifier_model, &request),
            )
            .await?;

        let confidence = confidence::combine(&ConfidenceSignals::verifier(verdict.confidence));
        debug!(
            attempt,
            approved = verdict.approved,
            verifier_confidence = verdict.confidence,
            confidence,
            "orchestrator.verifier_result"
        );

        if verdict.approved && confidence::is_acceptable(confidence, config.min_confidence) {
            info!(model = %model.name, attempts = attempt, confidence, "orchestrator.accepted");
            return Ok(LoopResult {
                content: response,
                model: model.name,
                confidence,
                attempts: attempt,
                outcome: LoopState::Accepted,
            });
        }

        if confidence::should_escalate(confidence, config.escalate_below)
            && attempt < config.max_retries
        {
            if let Some(next) = options.policy.next_model(&state)? {
                info!(
                    from_model = %model.name,
                    to_model = %next.name,
                    attempts = attempt,
                    confidence,
                    "orchestrator.escalate"
                );
                control.notify(
                    StatusEvent::new(
                        Phase::Orchestrator,
                        format!("Escalating from {} to {}", model.name, next.name),
                    )
                    .with_step(attempt),
                );
                state.escalate_to(next);
                continue;
            }
        }

        if attempt >= config.max_retries {
            warn!(
                model = %model.name,
                attempts = attempt,
                confidence,
                "orchestrator.max_retries_reached"
            );
            return Ok(LoopResult {
                content: response,
                model: model.name,
                confidence,
                attempts: attempt,
                outcome: LoopState::Exhausted,
            });
        }
    }
}
