//! Recursive Session — the end-to-end pipeline
//!
//! ```text
//!   plan(planning_model) ──► context += "PLAN:\n…"
//!        │
//!        ▼
//!   run_loop(initial_model, ladder) ──► LoopResult
//!        │
//!        ▼
//!   verify(verifier_model) [+ grounding] ──► approved ∧ c ≥ min ? return
//!        │ no
//!        ▼
//!   revise(revision_model) ──► return revision (never re-verified)
//! ```

use crate::backend::ChatBackend;
use crate::confidence::{self, ConfidenceSignals};
use crate::control::RunControl;
use crate::error::OrchestratorError;
use crate::escalation::EscalationPolicy;
use crate::grounding::{GroundingReport, GroundingReviewer};
use crate::model::ModelSpec;
use crate::orchestrator::{run_loop, LoopConfig, LoopOptions, LoopState};
use crate::planner;
use crate::reviser::{self, RevisionRequest};
use crate::status::{Phase, StatusEvent};
use crate::verifier::{self, VerificationRequest, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Models and policy for a session
#[derive(Clone)]
pub struct SessionOptions {
    /// First model the loop answers with; must be on `policy`'s ladder
    pub initial_model: ModelSpec,
    pub verifier_model: ModelSpec,
    /// Defaults to `initial_model`
    pub planning_model: Option<ModelSpec>,
    /// Defaults to `initial_model`
    pub revision_model: Option<ModelSpec>,
    pub policy: EscalationPolicy,
    pub loop_config: LoopConfig,
    /// When set, the final check also requires semantic grounding
    pub grounding: Option<Arc<GroundingReviewer>>,
}

impl SessionOptions {
    pub fn new(initial_model: ModelSpec, verifier_model: ModelSpec, policy: EscalationPolicy) -> Self {
        Self {
            initial_model,
            verifier_model,
            planning_model: None,
            revision_model: None,
            policy,
            loop_config: LoopConfig::default(),
            grounding: None,
        }
    }

    pub fn planning_model(&self) -> &ModelSpec {
        self.planning_model.as_ref().unwrap_or(&self.initial_model)
    }

    pub fn revision_model(&self) -> &ModelSpec {
        self.revision_model.as_ref().unwrap_or(&self.initial_model)
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("initial_model", &self.initial_model.name)
            .field("verifier_model", &self.verifier_model.name)
            .field("planning_model", &self.planning_model().name)
            .field("revision_model", &self.revision_model().name)
            .field("policy", &self.policy)
            .field("loop_config", &self.loop_config)
            .field("grounding", &self.grounding.is_some())
            .finish()
    }
}

/// What a session hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub content: String,
    /// Model that produced `content` (the reviser's model when revised)
    pub model: String,
    /// Confidence from the final verification
    pub confidence: f64,
    /// Loop iterations; the revision pass does not count
    pub attempts: u32,
    /// How the loop itself ended
    pub loop_outcome: LoopState,
    pub revised: bool,
    pub plan: String,
    pub final_verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingReport>,
}

pub struct RecursiveSession {
    backend: Arc<dyn ChatBackend>,
    options: SessionOptions,
    control: RunControl,
}

impl RecursiveSession {
    pub fn new(backend: Arc<dyn ChatBackend>, options: SessionOptions) -> Self {
        Self {
            backend,
            options,
            control: RunControl::default(),
        }
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub async fn run(
        &self,
        prompt: &str,
        context: &[String],
    ) -> Result<SessionResult, OrchestratorError> {
        let options = &self.options;
        let control = &self.control;
        let backend = self.backend.as_ref();

        // Reject bad configuration before spending a planner call on it
        options.loop_config.validate()?;
        options.policy.position(&options.initial_model.name)?;

        let planning_model = options.planning_model();
        debug!(model = %planning_model.name, "session.plan.start");
        control.notify(StatusEvent::new(Phase::Planning, "Generating plan..."));
        let plan = control
            .guard(Phase::Planning, planner::plan(backend, planning_model, prompt))
            .await?;

        let mut enriched = context.to_vec();
        enriched.push(planner::plan_context_chunk(&plan));

        let loop_options = LoopOptions {
            initial_model: &options.initial_model,
            verifier_model: &options.verifier_model,
            policy: &options.policy,
            config: options.loop_config,
        };
        let loop_result = run_loop(backend, prompt, &enriched, &loop_options, control).await?;

        control.notify(StatusEvent::new(Phase::Verification, "Verifying answer..."));
        let request = VerificationRequest {
            prompt,
            response: &loop_result.content,
            context: &enriched,
        };
        let verdict = control
            .guard(
                Phase::Verification,
                verifier::verify(backend, &options.verifier_model, &request),
            )
            .await?;

        let grounding = match &options.grounding {
            Some(reviewer) => {
                control.notify(StatusEvent::new(Phase::Grounding, "Checking grounding..."));
                let report = control
                    .guard(
                        Phase::Grounding,
                        reviewer.review(prompt, &loop_result.content, &enriched),
                    )
                    .await?;
                Some(report)
            }
            None => None,
        };

        let final_confidence = confidence::combine(&ConfidenceSignals {
            model: None,
            verifier: Some(verdict.confidence),
            embedding: grounding.as_ref().map(|g| g.confidence),
        });
        let grounded = grounding.as_ref().map_or(true, |g| g.approved);

        debug!(
            approved = verdict.approved,
            verifier_confidence = verdict.confidence,
            grounded,
            final_confidence,
            "session.final_verification"
        );

        if verdict.approved
            && grounded
            && confidence::is_acceptable(final_confidence, options.loop_config.min_confidence)
        {
            info!(
                model = %loop_result.model,
                attempts = loop_result.attempts,
                confidence = final_confidence,
                "session.accepted"
            );
            return Ok(SessionResult {
                content: loop_result.content,
                model: loop_result.model,
                confidence: final_confidence,
                attempts: loop_result.attempts,
                loop_outcome: loop_result.outcome,
                revised: false,
                plan,
                final_verdict: verdict,
                grounding,
            });
        }

        let revision_model = options.revision_model();
        info!(model = %revision_model.name, "session.revise.start");
        control.notify(StatusEvent::new(Phase::Revision, "Revising answer..."));

        // A degraded verdict's note describes the parse failure, not the answer
        let reviewer_notes = (!verdict.degraded)
            .then(|| verdict.notes.as_deref())
            .flatten();
        let revision_request = RevisionRequest {
            original_prompt: prompt,
            previous_response: &loop_result.content,
            context: &enriched,
            reviewer_notes,
        };
        let revision = control
            .guard(
                Phase::Revision,
                reviser::revise(backend, revision_model, &revision_request),
            )
            .await?;

        info!(model = %revision.model, attempts = loop_result.attempts, "session.revise.result");

        Ok(SessionResult {
            content: revision.content,
            model: revision.model,
            confidence: final_confidence,
            attempts: loop_result.attempts,
            loop_outcome: loop_result.outcome,
            revised: true,
            plan,
            final_verdict: verdict,
            grounding,
        })
    }
}
