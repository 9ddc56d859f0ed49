//! Parallel fan-out handler
//!
//! Extracts each branch between the fan-out and its fan-in as a
//! self-contained sub-graph and runs one fresh runner per branch on a
//! cloned context. Branch tasks run concurrently on the tokio runtime,
//! throttled by a semaphore when `max_parallel` is set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{HandlerRegistry, NodeHandler, Workspace};
use crate::engine::graph_analysis::{extract_branch_subgraphs, find_fan_in, BranchInfo};
use crate::engine::runner::PipelineRunner;
use crate::events::{Event, EventDispatcher};
use crate::model::{Context, Outcome, OutcomeStatus, PipelineGraph, Stage};

/// What a failed branch does to its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Wait for every branch regardless of failures
    Continue,
    /// Drop failed branches from the result map
    Ignore,
    /// Cooperatively cancel branches that have not started yet
    FailFast,
}

impl ErrorPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "ignore" => Self::Ignore,
            "fail_fast" => Self::FailFast,
            _ => Self::Continue,
        }
    }
}

pub struct ParallelHandler {
    registry: Arc<HandlerRegistry>,
    dispatcher: EventDispatcher,
    workspace: Option<Arc<dyn Workspace>>,
}

impl ParallelHandler {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        dispatcher: EventDispatcher,
        workspace: Option<Arc<dyn Workspace>>,
    ) -> Self {
        Self { registry, dispatcher, workspace }
    }

    async fn run_branch(
        branch: BranchInfo,
        parent_context: &Context,
        registry: Arc<HandlerRegistry>,
        dispatcher: EventDispatcher,
        workspace: Option<Arc<dyn Workspace>>,
        fan_out_id: String,
        cancel_flag: Arc<AtomicBool>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> (String, Outcome) {
        let branch_id = branch.branch_id.clone();

        let _permit = match semaphore {
            Some(semaphore) => Some(semaphore.acquire_owned().await.expect("semaphore never closed")),
            None => None,
        };

        if cancel_flag.load(Ordering::SeqCst) {
            return (
                branch_id,
                Outcome::fail("Cancelled: a sibling branch failed under fail_fast"),
            );
        }

        dispatcher.emit(Event::ParallelBranchStarted {
            node_id: fan_out_id.clone(),
            branch_id: branch_id.clone(),
            first_node_id: branch.first_node_id.clone(),
        });

        let start = Instant::now();

        if let Some(workspace) = &workspace {
            if let Err(e) = workspace.create_worktrees_for_branch(&branch_id) {
                let outcome = Outcome::fail(format!("worktree creation failed: {e}"));
                dispatcher.emit(Event::ParallelBranchCompleted {
                    node_id: fan_out_id,
                    branch_id: branch_id.clone(),
                    status: outcome.status.as_str().to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    failure_reason: outcome.failure_reason.clone(),
                });
                return (branch_id, outcome);
            }
        }

        // Each branch owns an independent clone of the parent context
        let branch_context = parent_context.clone();
        let runner = PipelineRunner::new(
            Arc::new(branch.subgraph),
            registry,
            dispatcher.clone(),
        );
        let outcome = match runner.run_with_context(branch_context).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::fail(format!("branch runner error: {e}")),
        };

        dispatcher.emit(Event::ParallelBranchCompleted {
            node_id: fan_out_id,
            branch_id: branch_id.clone(),
            status: outcome.status.as_str().to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            failure_reason: outcome.failure_reason.clone(),
        });

        (branch_id, outcome)
    }
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    async fn handle(&self, stage: &Stage, context: &Context, graph: &PipelineGraph) -> Outcome {
        let Some(fan_in_id) = find_fan_in(graph, &stage.id) else {
            return Outcome::fail(format!(
                "No fan-in stage found for parallel stage '{}'",
                stage.id
            ));
        };

        let branches = match extract_branch_subgraphs(graph, &stage.id, &fan_in_id) {
            Ok(branches) => branches,
            Err(e) => return Outcome::fail(e.to_string()),
        };

        let error_policy = ErrorPolicy::parse(&stage.attr_str("error_policy"));
        let semaphore = stage
            .attr_i64("max_parallel")
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n as usize)));
        let cancel_flag = Arc::new(AtomicBool::new(false));

        self.dispatcher.emit(Event::ParallelStarted {
            node_id: stage.id.clone(),
            branch_count: branches.len(),
        });
        let parallel_start = Instant::now();

        let mut tasks = tokio::task::JoinSet::new();
        for (_, branch) in branches {
            let parent_context = context.clone();
            let registry = self.registry.clone();
            let dispatcher = self.dispatcher.clone();
            let workspace = self.workspace.clone();
            let fan_out_id = stage.id.clone();
            let cancel = cancel_flag.clone();
            let error_policy_task = error_policy;
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let (branch_id, outcome) = Self::run_branch(
                    branch,
                    &parent_context,
                    registry,
                    dispatcher,
                    workspace,
                    fan_out_id,
                    cancel.clone(),
                    semaphore,
                )
                .await;
                if error_policy_task == ErrorPolicy::FailFast
                    && outcome.status == OutcomeStatus::Fail
                {
                    cancel.store(true, Ordering::SeqCst);
                }
                (branch_id, outcome)
            });
        }

        let mut results: BTreeMap<String, Outcome> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((branch_id, outcome)) = joined else { continue };
            if error_policy == ErrorPolicy::Ignore && outcome.status == OutcomeStatus::Fail {
                continue;
            }
            results.insert(branch_id, outcome);
        }

        let success_count = results.values().filter(|o| o.status.is_ok()).count();
        let failure_count = results.len() - success_count;
        self.dispatcher.emit(Event::ParallelCompleted {
            node_id: stage.id.clone(),
            success_count,
            failure_count,
            duration_ms: parallel_start.elapsed().as_millis() as u64,
        });

        let results_json: serde_json::Map<String, serde_json::Value> = results
            .iter()
            .map(|(bid, outcome)| {
                (bid.clone(), serde_json::to_value(outcome).unwrap_or_default())
            })
            .collect();
        let branch_ids: Vec<serde_json::Value> =
            results.keys().map(|k| k.clone().into()).collect();

        Outcome::success()
            .with_suggested_next(&fan_in_id)
            .with_update("parallel.results", results_json)
            .with_update("parallel.branch_ids", branch_ids)
    }
}
