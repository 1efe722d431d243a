//! Escalation Ladder — forward-only model promotion policy
//!
//! ```text
//!   ladder:  [ 1.5b ] ──► [ 3b ] ──► [ 7b ]
//!                ▲
//!          current_model, attempts < max_attempts
//! ```
//!
//! Deterministic; no backend calls. A current model that is not on the ladder
//! is a configuration fault and is reported as `LadderError::ModelNotInLadder`
//! rather than defaulted.

use crate::error::LadderError;
use crate::model::ModelSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-loop escalation position. Owned by a single loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub current_model: ModelSpec,
    pub attempts: u32,
}

impl EscalationState {
    pub fn new(initial_model: ModelSpec) -> Self {
        Self {
            current_model: initial_model,
            attempts: 0,
        }
    }

    /// Count one more iteration; returns the new total
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Move to a stronger model without resetting the attempt count
    pub fn escalate_to(&mut self, model: ModelSpec) {
        self.current_model = model;
    }
}

/// Ordered ladder of models plus an attempt cap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationPolicy {
    max_attempts: u32,
    ladder: Vec<ModelSpec>,
}

impl EscalationPolicy {
    /// Build a policy; the ladder must be non-empty and unique by name
    pub fn new(max_attempts: u32, ladder: Vec<ModelSpec>) -> Result<Self, LadderError> {
        if ladder.is_empty() {
            return Err(LadderError::EmptyLadder);
        }
        let mut seen = HashSet::new();
        for model in &ladder {
            if !seen.insert(model.name.as_str()) {
                return Err(LadderError::DuplicateModel(model.name.clone()));
            }
        }
        Ok(Self {
            max_attempts,
            ladder,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn ladder(&self) -> &[ModelSpec] {
        &self.ladder
    }

    /// Ladder index of a model, by name
    pub fn position(&self, name: &str) -> Result<usize, LadderError> {
        self.ladder
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| LadderError::ModelNotInLadder(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ladder.iter().any(|m| m.name == name)
    }

    /// True iff attempts remain and the current model is not the top rung
    pub fn can_escalate(&self, state: &EscalationState) -> Result<bool, LadderError> {
        let index = self.position(&state.current_model.name)?;
        Ok(state.attempts < self.max_attempts && index + 1 < self.ladder.len())
    }

    /// The rung directly above the current model, if escalation is allowed
    pub fn next_model(&self, state: &EscalationState) -> Result<Option<ModelSpec>, LadderError> {
        if !self.can_escalate(state)? {
            return Ok(None);
        }
        let index = self.position(&state.current_model.name)?;
        Ok(self.ladder.get(index + 1).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(names: &[&str]) -> Vec<ModelSpec> {
        names.iter().map(|n| ModelSpec::new(*n)).collect()
    }

    #[test]
    fn test_policy_rejects_empty_ladder() {
        assert_eq!(
            EscalationPolicy::new(3, vec![]),
            Err(LadderError::EmptyLadder)
        );
    }

    #[test]
    fn test_policy_rejects_duplicates() {
        let err = EscalationPolicy::new(3, ladder(&["a", "b", "a"])).unwrap_err();
        assert_eq!(err, LadderError::DuplicateModel("a".into()));
    }

    #[test]
    fn test_next_model_moves_forward() {
        let policy = EscalationPolicy::new(3, ladder(&["a", "b", "c"])).unwrap();
        let mut state = EscalationState::new(ModelSpec::new("a"));
        state.record_attempt();

        let next = policy.next_model(&state).unwrap().unwrap();
        assert_eq!(next.name, "b");
        assert!(policy.position(&next.name).unwrap() > policy.position("a").unwrap());
    }

    #[test]
    fn test_top_rung_cannot_escalate() {
        let policy = EscalationPolicy::new(10, ladder(&["a", "b"])).unwrap();
        let state = EscalationState::new(ModelSpec::new("b"));
        assert!(!policy.can_escalate(&state).unwrap());
        assert_eq!(policy.next_model(&state).unwrap(), None);
    }

    #[test]
    fn test_attempt_cap_blocks_escalation() {
        let policy = EscalationPolicy::new(2, ladder(&["a", "b"])).unwrap();
        let mut state = EscalationState::new(ModelSpec::new("a"));
        state.record_attempt();
        assert!(policy.can_escalate(&state).unwrap());
        state.record_attempt();
        assert!(!policy.can_escalate(&state).unwrap());
        assert_eq!(policy.next_model(&state).unwrap(), None);
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let policy = EscalationPolicy::new(3, ladder(&["a", "b"])).unwrap();
        let state = EscalationState::new(ModelSpec::new("ghost"));
        assert_eq!(
            policy.can_escalate(&state),
            Err(LadderError::ModelNotInLadder("ghost".into()))
        );
        assert!(policy.next_model(&state).is_err());
    }

    #[test]
    fn test_repeated_escalation_reaches_top_or_cap() {
        let names = ["a", "b", "c", "d"];
        for max_attempts in 0..6 {
            let policy = EscalationPolicy::new(max_attempts, ladder(&names)).unwrap();
            let mut state = EscalationState::new(ModelSpec::new("a"));
            let mut last_index = 0;
            while let Some(next) = policy.next_model(&state).unwrap() {
                let index = policy.position(&next.name).unwrap();
                assert_eq!(index, last_index + 1);
                last_index = index;
                state.escalate_to(next);
                state.record_attempt();
            }
            assert!(
                last_index == names.len() - 1 || state.attempts >= max_attempts,
                "stopped at {last_index} with {} attempts",
                state.attempts
            );
        }
    }
}
