//! Orchestration — a plan / generate / verify / escalate-or-revise pipeline
//! over a local LLM backend.
//!
//! ```text
//!   RecursiveSession
//!     ├─ planner        one call, folds "PLAN:" into the context
//!     ├─ orchestrator   generate → verify → escalate | retry | stop
//!     │    ├─ verifier     tolerant JSON verdict decoding
//!     │    ├─ escalation   forward-only model ladder
//!     │    └─ confidence   weighted signal blend
//!     ├─ verifier       final check (+ optional grounding)
//!     └─ reviser        one corrective rewrite when the final check fails
//! ```
//!
//! The transport is abstracted behind [`backend::ChatBackend`]; the bundled
//! [`backend::OllamaBackend`] talks to a local Ollama daemon.

pub mod backend;
pub mod confidence;
pub mod control;
pub mod error;
pub mod escalation;
pub mod grounding;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod reviser;
pub mod session;
pub mod status;
pub mod verifier;

pub use backend::{ChatBackend, OllamaBackend, OllamaConfig, SharedBackend};
pub use confidence::{combine, is_acceptable, should_escalate, ConfidenceSignals};
pub use control::RunControl;
pub use error::{BackendError, LadderError, OrchestratorError};
pub use escalation::{EscalationPolicy, EscalationState};
pub use grounding::{Embedder, EmbeddingStore, GroundingReport, GroundingReviewer};
pub use model::{Message, ModelSpec, Provider, Role};
pub use orchestrator::{run_loop, LoopConfig, LoopOptions, LoopResult, LoopState};
pub use session::{RecursiveSession, SessionOptions, SessionResult};
pub use status::{Phase, StatusEvent, StatusSink};
pub use verifier::{parse_verdict, ParsedVerdict, Verdict};
