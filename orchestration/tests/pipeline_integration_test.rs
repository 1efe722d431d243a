//! Integration tests for the loop and the recursive session
//!
//! A scripted in-process backend stands in for the model host: answer calls
//! return "answer from <model>", verifier calls pop canned verdict replies.

use async_trait::async_trait;
use orchestration::prompts;
use orchestration::{
    run_loop, BackendError, ChatBackend, Embedder, EscalationPolicy, GroundingReviewer,
    LadderError, LoopConfig, LoopOptions, LoopState, Message, ModelSpec, OrchestratorError,
    Phase, RecursiveSession, RunControl, SessionOptions, StatusSink,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ── Helpers ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Plan,
    Answer,
    Verify,
    Revise,
}

fn classify(messages: &[Message]) -> CallKind {
    match messages.first().map(|m| m.content.as_str()) {
        Some(prompts::PLANNER_SYSTEM_PROMPT) => CallKind::Plan,
        Some(prompts::VERIFIER_SYSTEM_PROMPT) => CallKind::Verify,
        Some(prompts::REVISER_SYSTEM_PROMPT) => CallKind::Revise,
        _ => CallKind::Answer,
    }
}

#[derive(Debug, Clone)]
struct Call {
    kind: CallKind,
    model: String,
    user: String,
}

struct ScriptedBackend {
    verdicts: Mutex<VecDeque<String>>,
    last_verdict: Mutex<String>,
    calls: Mutex<Vec<Call>>,
    fail_on: Option<CallKind>,
}

impl ScriptedBackend {
    fn new(verdicts: &[String]) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.iter().cloned().collect()),
            last_verdict: Mutex::new("no verdict scripted".into()),
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    fn failing_on(mut self, kind: CallKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        model: &ModelSpec,
        messages: &[Message],
        _stream: bool,
    ) -> Result<String, BackendError> {
        let kind = classify(messages);
        self.calls.lock().unwrap().push(Call {
            kind,
            model: model.name.clone(),
            user: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
        });

        if self.fail_on == Some(kind) {
            return Err(BackendError::HttpStatus {
                status: 500,
                body: "model crashed".into(),
            });
        }

        Ok(match kind {
            CallKind::Plan => "- Step 1: look it up".to_string(),
            CallKind::Answer => format!("answer from {}", model.name),
            CallKind::Revise => format!("revised by {}", model.name),
            CallKind::Verify => {
                let mut queue = self.verdicts.lock().unwrap();
                let mut last = self.last_verdict.lock().unwrap();
                if let Some(next) = queue.pop_front() {
                    *last = next;
                }
                last.clone()
            }
        })
    }
}

fn verdict(approved: bool, confidence: f64) -> String {
    format!(r#"Here you go: {{"approved": {approved}, "confidence": {confidence}, "notes": "checked"}}"#)
}

fn verdict_with_notes(approved: bool, confidence: f64, notes: &str) -> String {
    format!(r#"{{"approved": {approved}, "confidence": {confidence}, "notes": "{notes}"}}"#)
}

fn ladder(names: &[&str]) -> EscalationPolicy {
    EscalationPolicy::new(3, names.iter().map(|n| ModelSpec::new(*n)).collect()).unwrap()
}

fn loop_config(max_retries: u32) -> LoopConfig {
    LoopConfig {
        max_retries,
        ..Default::default()
    }
}

async fn run(
    backend: &ScriptedBackend,
    policy: &EscalationPolicy,
    initial: &str,
    config: LoopConfig,
) -> Result<orchestration::LoopResult, OrchestratorError> {
    let initial = ModelSpec::new(initial);
    let verifier = ModelSpec::new("judge");
    let options = LoopOptions {
        initial_model: &initial,
        verifier_model: &verifier,
        policy,
        config,
    };
    run_loop(backend, "What is the capital of France?", &[], &options, &RunControl::default()).await
}

fn session_options(names: &[&str]) -> SessionOptions {
    let mut options = SessionOptions::new(ModelSpec::new(names[0]), ModelSpec::new("judge"), ladder(names));
    options.planning_model = Some(ModelSpec::new("planner"));
    options.revision_model = Some(ModelSpec::new("fixer"));
    options
}

// ── Orchestrator loop ──

#[tokio::test]
async fn test_loop_accepts_on_first_attempt() {
    let backend = ScriptedBackend::new(&[verdict(true, 0.9)]);
    let policy = ladder(&["a"]);

    let result = run(&backend, &policy, "a", LoopConfig::default()).await.unwrap();

    assert_eq!(result.outcome, LoopState::Accepted);
    assert_eq!(result.attempts, 1);
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(result.content, "answer from a");
    assert_eq!(backend.calls_of(CallKind::Answer).len(), 1);
    assert_eq!(backend.calls_of(CallKind::Verify).len(), 1);
}

#[tokio::test]
async fn test_loop_escalates_on_low_confidence() {
    let backend = ScriptedBackend::new(&[verdict(false, 0.3), verdict(true, 0.8)]);
    let policy = ladder(&["a", "b"]);

    let result = run(&backend, &policy, "a", loop_config(3)).await.unwrap();

    assert_eq!(result.outcome, LoopState::Accepted);
    assert_eq!(result.model, "b");
    assert_eq!(result.attempts, 2);
    assert_eq!(result.content, "answer from b");

    let answered_by: Vec<_> = backend
        .calls_of(CallKind::Answer)
        .into_iter()
        .map(|c| c.model)
        .collect();
    assert_eq!(answered_by, vec!["a", "b"]);
}

#[tokio::test]
async fn test_loop_exhausts_in_middle_band() {
    let backend = ScriptedBackend::new(&[verdict(false, 0.6)]);
    let policy = ladder(&["a"]);

    let result = run(&backend, &policy, "a", loop_config(2)).await.unwrap();

    assert_eq!(result.outcome, LoopState::Exhausted);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.model, "a");
    assert!((result.confidence - 0.6).abs() < 1e-9);
    assert_eq!(backend.calls_of(CallKind::Answer).len(), 2);
}

#[tokio::test]
async fn test_middle_band_retries_same_model_even_with_stronger_rung() {
    let backend = ScriptedBackend::new(&[verdict(false, 0.6)]);
    let policy = ladder(&["a", "b"]);

    let result = run(&backend, &policy, "a", loop_config(3)).await.unwrap();

    assert_eq!(result.outcome, LoopState::Exhausted);
    assert_eq!(result.attempts, 3);
    assert!(backend
        .calls_of(CallKind::Answer)
        .iter()
        .all(|c| c.model == "a"));
}

#[tokio::test]
async fn test_approved_but_below_bar_is_not_accepted() {
    let backend = ScriptedBackend::new(&[verdict(true, 0.7)]);
    let policy = ladder(&["a"]);

    let result = run(&backend, &policy, "a", loop_config(2)).await.unwrap();

    assert_eq!(result.outcome, LoopState::Exhausted);
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_unparseable_verdict_counts_as_rejection() {
    let backend = ScriptedBackend::new(&["I think it's fine".to_string(), verdict(true, 0.95)]);
    let policy = ladder(&["a", "b"]);

    let result = run(&backend, &policy, "a", loop_config(3)).await.unwrap();

    // Confidence 0 escalates to the next rung
    assert_eq!(result.model, "b");
    assert_eq!(result.attempts, 2);
    assert_eq!(result.outcome, LoopState::Accepted);
}

#[tokio::test]
async fn test_quoted_verdict_fields_are_not_accepted() {
    let backend = ScriptedBackend::new(&[
        r#"{"approved":"yes","confidence":"0.9"}"#.to_string(),
        verdict(true, 0.9),
    ]);
    let policy = ladder(&["a", "b"]);

    let result = run(&backend, &policy, "a", loop_config(3)).await.unwrap();

    // Stringly fields score 0, so the first rung escalates
    assert_eq!(result.model, "b");
    assert_eq!(result.attempts, 2);
    assert_eq!(result.outcome, LoopState::Accepted);
}

#[tokio::test]
async fn test_escalation_never_exceeds_max_retries() {
    let backend = ScriptedBackend::new(&[verdict(false, 0.1)]);
    let policy = ladder(&["a", "b", "c"]);

    let result = run(&backend, &policy, "a", loop_config(2)).await.unwrap();

    assert_eq!(result.outcome, LoopState::Exhausted);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.model, "b");
}

#[tokio::test]
async fn test_loop_terminates_within_max_retries() {
    let names = ["a", "b", "c", "d"];
    for len in 1..=names.len() {
        for max_retries in 1..=5 {
            for confidence in [0.0, 0.3, 0.6, 0.7] {
                let backend = ScriptedBackend::new(&[verdict(false, confidence)]);
                let policy = ladder(&names[..len]);
                let result = run(&backend, &policy, "a", loop_config(max_retries))
                    .await
                    .unwrap();
                assert!(result.attempts <= max_retries);
                assert_eq!(
                    backend.calls_of(CallKind::Answer).len() as u32,
                    result.attempts
                );
            }
        }
    }
}

#[tokio::test]
async fn test_loop_starts_mid_ladder() {
    let backend = ScriptedBackend::new(&[verdict(false, 0.2), verdict(true, 0.9)]);
    let policy = ladder(&["a", "b", "c"]);

    let result = run(&backend, &policy, "b", loop_config(3)).await.unwrap();

    assert_eq!(result.model, "c");
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_initial_model_off_ladder_fails_fast() {
    let backend = ScriptedBackend::new(&[verdict(true, 0.9)]);
    let policy = ladder(&["a", "b"]);

    let err = run(&backend, &policy, "ghost", LoopConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Ladder(LadderError::ModelNotInLadder(ref name)) if name == "ghost"
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_loop_transport_failure_propagates() {
    let backend = ScriptedBackend::new(&[verdict(true, 0.9)]).failing_on(CallKind::Verify);
    let policy = ladder(&["a"]);

    let err = run(&backend, &policy, "a", LoopConfig::default())
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(backend.calls_of(CallKind::Answer).len(), 1);
}

// ── Recursive session ──

#[tokio::test]
async fn test_session_accepts_without_revision() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(true, 0.9), verdict(true, 0.85)]));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let result = session
        .run("Name the capital of France", &["France is in Europe".to_string()])
        .await
        .unwrap();

    assert!(!result.revised);
    assert_eq!(result.content, "answer from a");
    assert_eq!(result.model, "a");
    assert_eq!(result.attempts, 1);
    assert!((result.confidence - 0.85).abs() < 1e-9);
    assert_eq!(result.plan, "- Step 1: look it up");

    let kinds: Vec<_> = backend.calls().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![CallKind::Plan, CallKind::Answer, CallKind::Verify, CallKind::Verify]
    );

    let plan_call = &backend.calls_of(CallKind::Plan)[0];
    assert_eq!(plan_call.model, "planner");
    assert_eq!(plan_call.user, "Name the capital of France");

    let answer = &backend.calls_of(CallKind::Answer)[0];
    assert!(answer
        .user
        .contains("[1] France is in Europe\n[2] PLAN:\n- Step 1: look it up"));
}

#[tokio::test]
async fn test_session_revises_when_final_check_fails() {
    let backend = Arc::new(ScriptedBackend::new(&[
        verdict(true, 0.9),
        verdict_with_notes(false, 0.4, "missing citation"),
    ]));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let result = session.run("Explain", &[]).await.unwrap();

    assert!(result.revised);
    assert_eq!(result.content, "revised by fixer");
    assert_eq!(result.model, "fixer");
    assert_eq!(result.attempts, 1);
    assert!((result.confidence - 0.4).abs() < 1e-9);
    assert_eq!(result.final_verdict.notes.as_deref(), Some("missing citation"));

    let revise_calls = backend.calls_of(CallKind::Revise);
    assert_eq!(revise_calls.len(), 1);
    assert!(revise_calls[0]
        .user
        .contains("PREVIOUS (REJECTED) RESPONSE:\nanswer from a"));
    assert!(revise_calls[0]
        .user
        .contains("REVIEWER FEEDBACK:\nmissing citation"));

    // The revision is returned as-is: no verifier call after it
    assert_eq!(backend.calls().last().unwrap().kind, CallKind::Revise);
}

#[tokio::test]
async fn test_session_attempts_exclude_revision_after_exhaustion() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(false, 0.6)]));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let result = session.run("Explain", &[]).await.unwrap();

    assert_eq!(result.loop_outcome, LoopState::Exhausted);
    assert!(result.revised);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.content, "revised by fixer");
}

#[tokio::test]
async fn test_session_skips_notes_from_unparseable_verdict() {
    let backend = Arc::new(ScriptedBackend::new(&[
        verdict(true, 0.9),
        "cannot decide".to_string(),
    ]));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let result = session.run("Explain", &[]).await.unwrap();

    assert!(result.revised);
    assert!(result.final_verdict.degraded);
    let revise = &backend.calls_of(CallKind::Revise)[0];
    assert!(!revise.user.contains("REVIEWER FEEDBACK"));
}

#[tokio::test]
async fn test_session_revision_defaults_to_initial_model() {
    let backend = Arc::new(ScriptedBackend::new(&[
        verdict(true, 0.9),
        verdict(false, 0.2),
    ]));
    let mut options = session_options(&["a"]);
    options.revision_model = None;
    options.planning_model = None;
    let session = RecursiveSession::new(backend.clone(), options);

    let result = session.run("Explain", &[]).await.unwrap();

    assert_eq!(result.model, "a");
    assert_eq!(backend.calls_of(CallKind::Plan)[0].model, "a");
}

#[tokio::test]
async fn test_session_planner_failure_aborts() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(true, 0.9)]).failing_on(CallKind::Plan));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let err = session.run("Explain", &[]).await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn test_session_revision_failure_propagates() {
    let backend = Arc::new(
        ScriptedBackend::new(&[verdict(true, 0.9), verdict(false, 0.1)])
            .failing_on(CallKind::Revise),
    );
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]));

    let err = session.run("Explain", &[]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Backend(BackendError::HttpStatus { status: 500, .. })));
}

#[tokio::test]
async fn test_session_cancelled_before_start() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(true, 0.9)]));
    let token = CancellationToken::new();
    token.cancel();
    let session = RecursiveSession::new(backend.clone(), session_options(&["a"]))
        .with_control(RunControl::default().with_cancellation(token));

    let err = session.run("Explain", &[]).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Cancelled {
            stage: Phase::Planning
        }
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_session_emits_status_events_in_order() {
    let backend = Arc::new(ScriptedBackend::new(&[
        verdict(false, 0.2),
        verdict(true, 0.9),
        verdict(false, 0.3),
    ]));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let sink = StatusSink::new(move |e| captured.lock().unwrap().push((e.phase, e.message)));
    let session = RecursiveSession::new(backend.clone(), session_options(&["a", "b"]))
        .with_control(RunControl::default().with_status(sink));

    session.run("Explain", &[]).await.unwrap();

    let events = seen.lock().unwrap().clone();
    let phases: Vec<_> = events.iter().map(|(p, _)| *p).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Planning,
            Phase::Orchestrator,
            Phase::Orchestrator,
            Phase::Orchestrator,
            Phase::Orchestrator,
            Phase::Verification,
            Phase::Revision,
        ]
    );
    assert_eq!(events[2].1, "Attempt 1 with model a");
    assert_eq!(events[3].1, "Escalating from a to b");
    assert_eq!(events[4].1, "Attempt 2 with model b");
}

// ── Grounding ──

struct FixedEmbedder {
    answer: Vec<f32>,
    reference: Vec<f32>,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str, _hint: Option<&str>) -> Result<Vec<f32>, BackendError> {
        if text.starts_with("answer from") {
            Ok(self.answer.clone())
        } else {
            Ok(self.reference.clone())
        }
    }
}

#[tokio::test]
async fn test_session_grounding_blocks_ungrounded_answer() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(true, 0.9), verdict(true, 0.9)]));
    let mut options = session_options(&["a"]);
    options.grounding = Some(Arc::new(GroundingReviewer::new(Arc::new(FixedEmbedder {
        answer: vec![1.0, 0.0],
        reference: vec![0.0, 1.0],
    }))));
    let session = RecursiveSession::new(backend.clone(), options);

    let result = session.run("Explain", &["ctx".to_string()]).await.unwrap();

    let report = result.grounding.clone().unwrap();
    assert!(!report.approved);
    assert!(result.revised);
    // combine({verifier: 0.9, embedding: 0.0}) = 0.45 / 0.7
    assert!((result.confidence - 0.45 / 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_session_grounding_accepts_grounded_answer() {
    let backend = Arc::new(ScriptedBackend::new(&[verdict(true, 0.9), verdict(true, 0.9)]));
    let mut options = session_options(&["a"]);
    options.grounding = Some(Arc::new(GroundingReviewer::new(Arc::new(FixedEmbedder {
        answer: vec![1.0, 0.0],
        reference: vec![1.0, 0.0],
    }))));
    let session = RecursiveSession::new(backend.clone(), options);

    let result = session.run("Explain", &["ctx".to_string()]).await.unwrap();

    assert!(!result.revised);
    assert!(result.grounding.unwrap().approved);
    // combine({verifier: 0.9, embedding: 1.0}) = (0.45 + 0.2) / 0.7
    assert!((result.confidence - 0.65 / 0.7).abs() < 1e-6);
}
