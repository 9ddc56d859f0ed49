//! Parallel fan-in handler
//!
//! Applies the stage's join policy to the branch results the fan-out left
//! in context, selects the best branch for downstream prompting, and asks
//! the workspace manager to merge the branches' worktrees back into the
//! session branch.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{NodeHandler, Workspace};
use crate::backend::CodergenBackend;
use crate::engine::join_policies::{
    evaluate_join, parse_branch_outcome, JoinParams, JoinPolicy,
};
use crate::model::{Context, Outcome, OutcomeStatus, PipelineGraph, Stage};

fn status_priority(status: OutcomeStatus) -> u8 {
    match status {
        OutcomeStatus::Success => 0,
        OutcomeStatus::PartialSuccess => 1,
        OutcomeStatus::Retry => 2,
        OutcomeStatus::Fail => 3,
    }
}

pub struct FanInHandler {
    backend: Option<Arc<dyn CodergenBackend>>,
    workspace: Option<Arc<dyn Workspace>>,
}

impl FanInHandler {
    pub fn new(
        backend: Option<Arc<dyn CodergenBackend>>,
        workspace: Option<Arc<dyn Workspace>>,
    ) -> Self {
        Self { backend, workspace }
    }

    /// Sort by (status priority, -score, id) and take the head
    fn select_heuristic(candidates: &[(String, Outcome)]) -> (String, Outcome) {
        let mut sorted: Vec<&(String, Outcome)> = candidates.iter().collect();
        sorted.sort_by(|(a_id, a), (b_id, b)| {
            status_priority(a.status)
                .cmp(&status_priority(b.status))
                .then_with(|| {
                    b.score()
                        .partial_cmp(&a.score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a_id.cmp(b_id))
        });
        sorted[0].clone()
    }

    async fn select_via_backend(
        backend: &Arc<dyn CodergenBackend>,
        stage: &Stage,
        context: &Context,
        candidates: &[(String, Outcome)],
    ) -> (String, Outcome) {
        let summary: Vec<String> = candidates
            .iter()
            .map(|(bid, o)| {
                format!("- Branch '{}': status={}, notes={}", bid, o.status, o.notes)
            })
            .collect();
        let prompt = format!(
            "{}\n\nCandidates:\n{}\n\nSelect the best branch ID.",
            stage.prompt,
            summary.join("\n")
        );

        let response = backend.run(stage, &prompt, context, None).await;
        for (bid, outcome) in candidates {
            if response.notes.contains(bid.as_str()) {
                return (bid.clone(), outcome.clone());
            }
        }
        Self::select_heuristic(candidates)
    }
}

#[async_trait]
impl NodeHandler for FanInHandler {
    async fn handle(&self, stage: &Stage, context: &Context, _graph: &PipelineGraph) -> Outcome {
        let results: BTreeMap<String, Outcome> = context
            .get("parallel.results")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(bid, value)| {
                        parse_branch_outcome(value).map(|o| (bid.clone(), o))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let policy = JoinPolicy::parse(&stage.attr_str("join_policy")).unwrap_or(JoinPolicy::WaitAll);
        let params = JoinParams {
            k: stage.attr_i64("k").map(|k| k.max(0) as u32),
            quorum_percent: stage
                .attr_i64("quorum_percent")
                .map(|q| q as f64)
                .or_else(|| stage.attr_str("quorum_percent").parse().ok()),
        };

        let join_result = evaluate_join(policy, &results, params);
        if !join_result.satisfied {
            return Outcome::fail(join_result.failure_reason);
        }

        let (best_id, best_outcome) = match (&self.backend, stage.prompt.is_empty()) {
            (Some(backend), false) => {
                Self::select_via_backend(backend, stage, context, &join_result.selected_results)
                    .await
            }
            _ => Self::select_heuristic(&join_result.selected_results),
        };

        let selected_json: Vec<serde_json::Value> = join_result
            .selected_results
            .iter()
            .map(|(bid, o)| {
                serde_json::json!([bid, serde_json::to_value(o).unwrap_or_default()])
            })
            .collect();

        let mut outcome = Outcome::new(join_result.status)
            .with_update("parallel.fan_in.best_id", best_id.clone())
            .with_update(
                "parallel.fan_in.best_outcome",
                serde_json::to_value(&best_outcome).unwrap_or_default(),
            )
            .with_update("parallel.fan_in.selected_results", selected_json);

        // Merge branch worktrees into the session branch
        if let Some(workspace) = &self.workspace {
            let branch_ids: Vec<String> = context
                .get("parallel.branch_ids")
                .and_then(|v| v.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            if !branch_ids.is_empty() {
                let merge = workspace.merge_worktrees(&branch_ids);
                if !merge.success {
                    outcome.status = OutcomeStatus::PartialSuccess;
                    outcome
                        .context_updates
                        .insert("parallel.merge_conflicts".to_string(), merge.conflicts);
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Shape;

    fn context_with_results(pairs: &[(&str, Outcome)]) -> Context {
        let mut ctx = Context::new();
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(bid, o)| (bid.to_string(), serde_json::to_value(o).unwrap()))
            .collect();
        ctx.set("parallel.results", map);
        ctx.set(
            "parallel.branch_ids",
            serde_json::json!(pairs.iter().map(|(b, _)| *b).collect::<Vec<_>>()),
        );
        ctx
    }

    #[tokio::test]
    async fn test_heuristic_prefers_higher_score() {
        let handler = FanInHandler::new(None, None);
        let stage = Stage::new("join", Shape::ParallelFanIn);
        let graph = PipelineGraph::new("g");
        let ctx = context_with_results(&[
            ("a", Outcome::success().with_update("score", 0.9)),
            ("b", Outcome::success().with_update("score", 0.5)),
        ]);

        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.context_updates["parallel.fan_in.best_id"], "a");
    }

    #[tokio::test]
    async fn test_heuristic_prefers_status_over_score() {
        let handler = FanInHandler::new(None, None);
        let stage = Stage::new("join", Shape::ParallelFanIn);
        let graph = PipelineGraph::new("g");
        let ctx = context_with_results(&[
            ("a", Outcome::partial_success().with_update("score", 0.9)),
            ("b", Outcome::success().with_update("score", 0.1)),
        ]);

        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.context_updates["parallel.fan_in.best_id"], "b");
    }

    #[tokio::test]
    async fn test_unsatisfied_join_fails() {
        let handler = FanInHandler::new(None, None);
        let stage = Stage::new("join", Shape::ParallelFanIn)
            .with_attribute("join_policy", "first_success");
        let graph = PipelineGraph::new("g");
        let ctx = context_with_results(&[("a", Outcome::fail("x"))]);

        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.failure_reason.contains("No successful branch"));
    }

    #[tokio::test]
    async fn test_k_of_n_params_from_attributes() {
        let handler = FanInHandler::new(None, None);
        let stage = Stage::new("join", Shape::ParallelFanIn)
            .with_attribute("join_policy", "k_of_n")
            .with_attribute("k", 2);
        let graph = PipelineGraph::new("g");

        let ctx = context_with_results(&[
            ("a", Outcome::success()),
            ("b", Outcome::fail("x")),
        ]);
        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);

        let ctx = context_with_results(&[
            ("a", Outcome::success()),
            ("b", Outcome::partial_success()),
        ]);
        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn test_merge_conflict_degrades_to_partial_success() {
        struct ConflictingWorkspace;
        impl Workspace for ConflictingWorkspace {
            fn create_worktrees_for_branch(&self, _branch_id: &str) -> Result<(), String> {
                Ok(())
            }
            fn merge_worktrees(&self, _branch_ids: &[String]) -> super::super::WorktreeMergeSummary {
                super::super::WorktreeMergeSummary {
                    success: false,
                    conflicts: serde_json::json!({"repo": {"conflicting_files": ["main.rs"]}}),
                    merged_shas: BTreeMap::new(),
                }
            }
            fn workspace_snapshot(&self) -> BTreeMap<String, String> {
                BTreeMap::new()
            }
            fn primary_repo_path(&self) -> Option<std::path::PathBuf> {
                None
            }
        }

        let handler = FanInHandler::new(None, Some(Arc::new(ConflictingWorkspace)));
        let stage = Stage::new("join", Shape::ParallelFanIn);
        let graph = PipelineGraph::new("g");
        let ctx = context_with_results(&[("a", Outcome::success()), ("b", Outcome::success())]);

        let outcome = handler.handle(&stage, &ctx, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::PartialSuccess);
        assert!(outcome.context_updates.contains_key("parallel.merge_conflicts"));
    }
}
