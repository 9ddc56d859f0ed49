//! Agent backend contracts and the simulation backend
//!
//! Real LLM backends (direct chat, tool-using loops, CLI subprocesses) are
//! external collaborators; the engine consumes these traits. The
//! simulation backend scripts per-stage outcome sequences and is the
//! harness the `run` command and the test suite execute against.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{AgentTurn, Context, Outcome, OutcomeStatus, Stage};

/// Callback invoked after every agent turn
///
/// The workspace manager converts the turn's file writes into a commit and
/// records the SHA back onto the turn; the dispatcher then emits
/// `AgentTurnCompleted`. Committing is the critical path: an `Err` means
/// the turn's writes could not be committed, and the enclosing stage must
/// fail rather than continue with unrecorded mutations.
pub type OnTurnCallback = Arc<dyn Fn(&mut AgentTurn) -> Result<(), String> + Send + Sync>;

/// Executes one LLM-backed stage
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(
        &self,
        stage: &Stage,
        prompt: &str,
        context: &Context,
        on_turn: Option<&OnTurnCallback>,
    ) -> Outcome;
}

/// A backend that can hold a multi-turn conversation for interactive stages
#[async_trait]
pub trait ConversationalBackend: CodergenBackend {
    /// Send one message; `Err` carries a terminal outcome (backend failure)
    async fn send_message(
        &self,
        stage: &Stage,
        message: &str,
        context: &Context,
    ) -> Result<String, Outcome>;

    /// Drop accumulated conversation state
    fn reset_conversation(&self);
}

/// Scripted backend for tests and dry runs
///
/// Outcome sequences come from the `sim_outcomes` stage attribute
/// (comma-separated statuses) or are registered programmatically. A stage
/// without a script always succeeds; a sequence that runs out repeats its
/// last entry.
pub struct SimulationBackend {
    sequences: Mutex<BTreeMap<String, Vec<OutcomeStatus>>>,
    call_counts: Mutex<BTreeMap<String, usize>>,
}

impl SimulationBackend {
    pub fn new() -> Self {
        Self {
            sequences: Mutex::new(BTreeMap::new()),
            call_counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_sequence(self, node_id: impl Into<String>, sequence: Vec<OutcomeStatus>) -> Self {
        self.sequences.lock().unwrap().insert(node_id.into(), sequence);
        self
    }

    fn resolve_status(&self, stage: &Stage) -> OutcomeStatus {
        let mut sequences = self.sequences.lock().unwrap();
        if !sequences.contains_key(&stage.id) {
            let scripted = stage.attr_str("sim_outcomes");
            if !scripted.is_empty() {
                let parsed: Vec<OutcomeStatus> = scripted
                    .split(',')
                    .filter_map(|s| OutcomeStatus::parse(s.trim()))
                    .collect();
                if !parsed.is_empty() {
                    sequences.insert(stage.id.clone(), parsed);
                }
            }
        }

        let Some(sequence) = sequences.get(&stage.id) else {
            return OutcomeStatus::Success;
        };

        let mut counts = self.call_counts.lock().unwrap();
        let index = counts.entry(stage.id.clone()).or_insert(0);
        let status = sequence.get(*index).copied().unwrap_or_else(|| {
            *sequence.last().expect("sequences are never empty")
        });
        *index += 1;
        status
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodergenBackend for SimulationBackend {
    async fn run(
        &self,
        stage: &Stage,
        _prompt: &str,
        _context: &Context,
        _on_turn: Option<&OnTurnCallback>,
    ) -> Outcome {
        let response = format!("[Simulated] Response for stage: {}", stage.id);
        let status = self.resolve_status(stage);
        let mut outcome = Outcome::new(status)
            .with_notes(&response)
            .with_update("last_response", response.clone());
        if status == OutcomeStatus::Fail {
            outcome.failure_reason = format!("Simulated failure for {}", stage.id);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Shape;

    #[tokio::test]
    async fn test_simulation_defaults_to_success() {
        let backend = SimulationBackend::new();
        let stage = Stage::new("plan", Shape::Codergen);
        let outcome = backend.run(&stage, "p", &Context::new(), None).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.notes.contains("plan"));
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_repeats_last() {
        let backend = SimulationBackend::new().with_sequence(
            "flaky",
            vec![OutcomeStatus::Fail, OutcomeStatus::Success],
        );
        let stage = Stage::new("flaky", Shape::Codergen);
        let ctx = Context::new();

        assert_eq!(backend.run(&stage, "", &ctx, None).await.status, OutcomeStatus::Fail);
        assert_eq!(backend.run(&stage, "", &ctx, None).await.status, OutcomeStatus::Success);
        assert_eq!(backend.run(&stage, "", &ctx, None).await.status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn test_sim_outcomes_attribute() {
        let backend = SimulationBackend::new();
        let stage = Stage::new("s", Shape::Codergen).with_attribute("sim_outcomes", "retry,success");
        let ctx = Context::new();

        assert_eq!(backend.run(&stage, "", &ctx, None).await.status, OutcomeStatus::Retry);
        assert_eq!(backend.run(&stage, "", &ctx, None).await.status, OutcomeStatus::Success);
    }
}
