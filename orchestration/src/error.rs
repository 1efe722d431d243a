//! Error taxonomy for the pipeline
//!
//! Transport failures and ladder misconfiguration are hard errors. A verifier
//! reply that cannot be decoded is not an error (see [`crate::verifier::parse_verdict`]),
//! and neither is loop exhaustion (see [`crate::orchestrator::LoopState::Exhausted`]).

use crate::status::Phase;
use std::time::Duration;
use thiserror::Error;

/// Failures from a `ChatBackend` or `Embedder`
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("streaming is not supported by this backend")]
    StreamingUnsupported,

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),
}

/// Escalation ladder misconfiguration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("escalation ladder is empty")]
    EmptyLadder,

    #[error("model '{0}' appears more than once in the escalation ladder")]
    DuplicateModel(String),

    #[error("model '{0}' is not on the escalation ladder")]
    ModelNotInLadder(String),
}

/// Errors surfaced to callers of the loop and the session
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("configuration error: {0}")]
    Ladder(#[from] LadderError),

    #[error("cancelled during {stage}")]
    Cancelled { stage: Phase },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OrchestratorError {
    /// Whether the failure came from the model transport
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Whether the failure is a configuration fault rather than a runtime one
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Ladder(_))
    }

    /// The stage that was aborted, if this is a cancellation
    pub fn cancelled_stage(&self) -> Option<Phase> {
        match self {
            Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }
}
