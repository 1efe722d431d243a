//! Status events — progress notifications emitted while a session runs
//!
//! The HTTP layer forwards these to SSE clients as
//! `{"type":"status","message":..,"phase":..,"step":..}`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage a status event (or a cancellation) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Orchestrator,
    Verification,
    Grounding,
    Revision,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Verification => write!(f, "verification"),
            Self::Grounding => write!(f, "grounding"),
            Self::Revision => write!(f, "revision"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status")]
pub struct StatusEvent {
    pub message: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl StatusEvent {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            phase,
            step: None,
        }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }
}

/// Cloneable callback receiving status events
#[derive(Clone)]
pub struct StatusSink(Arc<dyn Fn(StatusEvent) + Send + Sync>);

impl StatusSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: StatusEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StatusSink")
    }
}

/// Emit through an optional sink
pub(crate) fn notify(sink: Option<&StatusSink>, event: StatusEvent) {
    if let Some(sink) = sink {
        sink.emit(event);
    }
}
