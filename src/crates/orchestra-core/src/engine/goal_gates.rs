//! Goal-gate routing
//!
//! After each stage the runner checks every previously visited stage whose
//! `goal_gate` attribute is true. If any such stage's recorded status is
//! not success/partial_success, the gate is unsatisfied and the runner
//! reroutes to the first existing target in the resolution order:
//! stage `retry_target`, stage `fallback_retry_target`, graph
//! `retry_target`, graph `fallback_retry_target`.

use std::collections::BTreeMap;

use crate::model::{OutcomeStatus, PipelineGraph};

/// Result of one goal-gate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    pub satisfied: bool,
    /// Stage to jump to when unsatisfied; `None` means no route exists
    pub reroute_target: Option<String>,
    /// Gate stages whose recorded status blocked termination
    ///
    /// On reroute the runner clears these from `visited_outcomes` so the
    /// gate re-arms only once its stage executes again.
    pub unsatisfied_nodes: Vec<String>,
}

impl GateResult {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            reroute_target: None,
            unsatisfied_nodes: Vec::new(),
        }
    }
}

/// Evaluate all goal gates against the visited-outcome record
pub fn check_goal_gates(
    visited_outcomes: &BTreeMap<String, OutcomeStatus>,
    graph: &PipelineGraph,
) -> GateResult {
    let unsatisfied: Vec<String> = visited_outcomes
        .iter()
        .filter_map(|(node_id, status)| {
            let stage = graph.get_stage(node_id)?;
            if stage.attr_bool("goal_gate") && !status.is_ok() {
                Some(node_id.clone())
            } else {
                None
            }
        })
        .collect();

    if unsatisfied.is_empty() {
        return GateResult::satisfied();
    }

    for node_id in &unsatisfied {
        let Some(stage) = graph.get_stage(node_id) else { continue };
        for key in ["retry_target", "fallback_retry_target"] {
            let target = stage.attr_str(key);
            if !target.is_empty() && graph.get_stage(&target).is_some() {
                return GateResult {
                    satisfied: false,
                    reroute_target: Some(target),
                    unsatisfied_nodes: unsatisfied,
                };
            }
        }
    }

    for key in ["retry_target", "fallback_retry_target"] {
        let target = graph.graph_attr_str(key);
        if !target.is_empty() && graph.get_stage(&target).is_some() {
            return GateResult {
                satisfied: false,
                reroute_target: Some(target),
                unsatisfied_nodes: unsatisfied,
            };
        }
    }

    GateResult { satisfied: false, reroute_target: None, unsatisfied_nodes: unsatisfied }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shape, Stage};

    fn gated_graph() -> PipelineGraph {
        let mut g = PipelineGraph::new("g");
        g.add_stage(Stage::new("work", Shape::Codergen));
        g.add_stage(Stage::new("critic", Shape::Codergen).with_attribute("goal_gate", true));
        g
    }

    #[test]
    fn test_satisfied_when_gate_succeeded() {
        let g = gated_graph();
        let mut visited = BTreeMap::new();
        visited.insert("critic".to_string(), OutcomeStatus::Success);
        assert!(check_goal_gates(&visited, &g).satisfied);
    }

    #[test]
    fn test_partial_success_satisfies_gate() {
        let g = gated_graph();
        let mut visited = BTreeMap::new();
        visited.insert("critic".to_string(), OutcomeStatus::PartialSuccess);
        assert!(check_goal_gates(&visited, &g).satisfied);
    }

    #[test]
    fn test_non_gate_failures_are_ignored() {
        let g = gated_graph();
        let mut visited = BTreeMap::new();
        visited.insert("work".to_string(), OutcomeStatus::Fail);
        assert!(check_goal_gates(&visited, &g).satisfied);
    }

    #[test]
    fn test_unsatisfied_without_target() {
        let g = gated_graph();
        let mut visited = BTreeMap::new();
        visited.insert("critic".to_string(), OutcomeStatus::Fail);
        let result = check_goal_gates(&visited, &g);
        assert!(!result.satisfied);
        assert_eq!(result.reroute_target, None);
    }

    #[test]
    fn test_stage_retry_target_preferred() {
        let mut g = PipelineGraph::new("g");
        g.add_stage(Stage::new("work", Shape::Codergen));
        g.add_stage(
            Stage::new("critic", Shape::Codergen)
                .with_attribute("goal_gate", true)
                .with_attribute("retry_target", "work"),
        );
        g.graph_attributes.insert("retry_target".into(), "other".into());

        let mut visited = BTreeMap::new();
        visited.insert("critic".to_string(), OutcomeStatus::Fail);
        let result = check_goal_gates(&visited, &g);
        assert_eq!(result.reroute_target.as_deref(), Some("work"));
    }

    #[test]
    fn test_missing_stage_target_falls_through_to_graph() {
        let mut g = PipelineGraph::new("g");
        g.add_stage(Stage::new("work", Shape::Codergen));
        g.add_stage(
            Stage::new("critic", Shape::Codergen)
                .with_attribute("goal_gate", true)
                .with_attribute("retry_target", "ghost"),
        );
        g.graph_attributes.insert("fallback_retry_target".into(), "work".into());

        let mut visited = BTreeMap::new();
        visited.insert("critic".to_string(), OutcomeStatus::Fail);
        let result = check_goal_gates(&visited, &g);
        assert_eq!(result.reroute_target.as_deref(), Some("work"));
    }
}
