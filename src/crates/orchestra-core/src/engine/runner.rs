//! The pipeline interpreter loop
//!
//! Single-threaded and strictly sequential: one stage completes before the
//! next begins. Every observable decision is emitted as an event; after
//! each stage a checkpoint carries the full [`RunState`] plus the id of
//! the stage that would execute next, so a paused or interrupted run can
//! resume exactly where it left off.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::edge_selection::select_next;
use crate::engine::goal_gates::check_goal_gates;
use crate::engine::retry::{build_retry_policy, execute_with_retry, Sleeper, TokioSleeper};
use crate::error::{OrchestraError, Result};
use crate::events::{Event, EventDispatcher};
use crate::handlers::{HandlerRegistry, Workspace};
use crate::model::{Context, Outcome, OutcomeStatus, PipelineGraph, Shape};

const DEFAULT_MAX_REROUTES: u32 = 5;

/// The complete resumable state of one run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub context: Context,
    pub completed_nodes: Vec<String>,
    /// Latest recorded status per stage, consulted by goal gates
    pub visited_outcomes: BTreeMap<String, OutcomeStatus>,
    /// Visit counts per stage; recorded in checkpoints but advisory
    pub retry_counters: BTreeMap<String, u32>,
    /// Goal-gate jumps taken so far; bounded to prevent infinite cycling
    pub reroute_count: u32,
}

/// Drives a validated graph from start to exit
pub struct PipelineRunner {
    graph: Arc<PipelineGraph>,
    registry: Arc<HandlerRegistry>,
    dispatcher: EventDispatcher,
    workspace: Option<Arc<dyn Workspace>>,
    sleeper: Arc<dyn Sleeper>,
    pause_requested: Arc<AtomicBool>,
    session_display_id: String,
    dot_file_path: String,
    graph_hash: String,
    max_steps: u32,
}

impl PipelineRunner {
    pub fn new(
        graph: Arc<PipelineGraph>,
        registry: Arc<HandlerRegistry>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            graph,
            registry,
            dispatcher,
            workspace: None,
            sleeper: Arc::new(TokioSleeper),
            pause_requested: Arc::new(AtomicBool::new(false)),
            session_display_id: String::new(),
            dot_file_path: String::new(),
            graph_hash: String::new(),
            max_steps: 1000,
        }
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Session metadata recorded in the `PipelineStarted` event
    pub fn with_session_info(
        mut self,
        display_id: impl Into<String>,
        dot_file_path: impl Into<String>,
        graph_hash: impl Into<String>,
    ) -> Self {
        self.session_display_id = display_id.into();
        self.dot_file_path = dot_file_path.into();
        self.graph_hash = graph_hash.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Cooperative pause: the runner finishes the current stage, saves a
    /// checkpoint, and returns
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Shared flag for signal handlers
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.pause_requested.clone()
    }

    fn max_reroutes(&self) -> u32 {
        self.graph
            .graph_attr_i64("max_reroutes")
            .map(|n| n.max(0) as u32)
            .unwrap_or(DEFAULT_MAX_REROUTES)
    }

    /// Execute from the start stage with a fresh context
    pub async fn run(&self) -> Result<Outcome> {
        self.run_with_context(Context::new()).await
    }

    /// Execute from the start stage with a seeded context
    ///
    /// Branch runners use this to start from a clone of the parent
    /// context.
    pub async fn run_with_context(&self, mut context: Context) -> Result<Outcome> {
        context.set("graph.goal", self.graph.goal());

        self.dispatcher.emit(Event::PipelineStarted {
            pipeline_name: self.graph.name.clone(),
            goal: self.graph.goal(),
            session_display_id: self.session_display_id.clone(),
            dot_file_path: self.dot_file_path.clone(),
            graph_hash: self.graph_hash.clone(),
        });

        let start = self
            .graph
            .start_stage()
            .ok_or_else(|| OrchestraError::Execution("no start stage found in graph".into()))?;

        let state = RunState { context, ..RunState::default() };
        self.run_loop(state, start.id.clone()).await
    }

    /// Continue a restored run as if the previous loop iteration had just
    /// finished
    pub async fn resume(&self, state: RunState, next_node_id: &str) -> Result<Outcome> {
        if self.graph.get_stage(next_node_id).is_none() {
            return Err(OrchestraError::Resume(format!(
                "next stage '{next_node_id}' not found in graph"
            )));
        }
        self.run_loop(state, next_node_id.to_string()).await
    }

    async fn run_loop(&self, mut state: RunState, start_id: String) -> Result<Outcome> {
        let pipeline_start = Instant::now();
        let mut current_id = start_id;
        let mut last_outcome = Outcome::success();
        let mut steps = 0u32;

        loop {
            steps += 1;
            if steps > self.max_steps {
                return Err(OrchestraError::Execution(format!(
                    "pipeline exceeded {} steps; aborting",
                    self.max_steps
                )));
            }

            let node = self
                .graph
                .get_stage(&current_id)
                .ok_or_else(|| {
                    OrchestraError::Execution(format!("stage '{current_id}' not found in graph"))
                })?
                .clone();

            if node.shape == Shape::Exit {
                // Goal gates guard pipeline termination
                let gate = check_goal_gates(&state.visited_outcomes, &self.graph);
                if !gate.satisfied {
                    if let Some(target) = gate.reroute_target {
                        if state.reroute_count < self.max_reroutes() {
                            state.reroute_count += 1;
                            for gated in &gate.unsatisfied_nodes {
                                state.visited_outcomes.remove(gated);
                            }
                            tracing::info!(reroute_target = %target, "goal gate unsatisfied, rerouting");
                            current_id = target;
                            continue;
                        }
                    }
                    let error = "goal gate unsatisfied at pipeline exit".to_string();
                    self.emit_failed(&error);
                    return Ok(Outcome::fail(error));
                }

                if let Some(handler) = self.registry.get(Shape::Exit) {
                    handler.handle(&node, &state.context, &self.graph).await;
                }
                state.completed_nodes.push(node.id.clone());
                self.emit_checkpoint(&state, &node.id, "");
                break;
            }

            let handler = self.registry.get(node.shape).ok_or_else(|| {
                OrchestraError::Execution(format!(
                    "no handler for shape '{}' on stage '{}'",
                    node.shape, node.id
                ))
            })?;

            self.dispatcher.emit(Event::StageStarted {
                node_id: node.id.clone(),
                handler_type: node.shape.as_str().to_string(),
            });

            let stage_start = Instant::now();
            let policy = build_retry_policy(&node, &self.graph);
            *state.retry_counters.entry(node.id.clone()).or_insert(0) += 1;

            let outcome = execute_with_retry(
                &node,
                handler.as_ref(),
                &state.context,
                &self.graph,
                &policy,
                &self.dispatcher,
                self.sleeper.as_ref(),
            )
            .await;
            let stage_duration_ms = stage_start.elapsed().as_millis() as u64;

            state.completed_nodes.push(node.id.clone());
            state.visited_outcomes.insert(node.id.clone(), outcome.status);

            for (key, value) in &outcome.context_updates {
                state.context.set(key.clone(), value.clone());
            }
            state.context.set("outcome", outcome.status.as_str());
            state.context.set("current_node", node.id.clone());
            state.context.set("last_stage", node.id.clone());

            if outcome.status.is_ok() {
                self.dispatcher.emit(Event::StageCompleted {
                    node_id: node.id.clone(),
                    handler_type: node.shape.as_str().to_string(),
                    status: outcome.status.as_str().to_string(),
                    duration_ms: stage_duration_ms,
                    prompt: node.prompt.clone(),
                    response: outcome.notes.clone(),
                    outcome: outcome.status.as_str().to_string(),
                });
            } else {
                self.dispatcher.emit(Event::StageFailed {
                    node_id: node.id.clone(),
                    handler_type: node.shape.as_str().to_string(),
                    error: if outcome.failure_reason.is_empty() {
                        outcome.notes.clone()
                    } else {
                        outcome.failure_reason.clone()
                    },
                });
            }

            // Routing: an unsatisfied goal gate with a live target takes
            // precedence over edge selection, within the reroute budget
            let gate = check_goal_gates(&state.visited_outcomes, &self.graph);
            let next_id = if !gate.satisfied
                && gate.reroute_target.is_some()
                && state.reroute_count < self.max_reroutes()
            {
                state.reroute_count += 1;
                for gated in &gate.unsatisfied_nodes {
                    state.visited_outcomes.remove(gated);
                }
                gate.reroute_target
            } else {
                select_next(&node.id, &outcome, &state.context, &self.graph)
            };

            self.emit_checkpoint(&state, &node.id, next_id.as_deref().unwrap_or(""));
            last_outcome = outcome;

            let Some(next_id) = next_id else {
                if matches!(last_outcome.status, OutcomeStatus::Fail | OutcomeStatus::Retry) {
                    let error = if last_outcome.failure_reason.is_empty() {
                        "Stage failed with no outgoing edge".to_string()
                    } else {
                        last_outcome.failure_reason.clone()
                    };
                    self.emit_failed(&error);
                    return Ok(last_outcome);
                }
                break;
            };

            if self.graph.get_stage(&next_id).is_none() {
                return Err(OrchestraError::Execution(format!(
                    "edge target stage '{next_id}' not found"
                )));
            }

            // Cooperative pause between stages; the checkpoint above
            // already points at the stage that would have executed next
            if self.pause_requested.load(Ordering::SeqCst) {
                self.dispatcher.emit(Event::PipelinePaused {
                    pipeline_name: self.graph.name.clone(),
                    session_display_id: self.session_display_id.clone(),
                    checkpoint_node_id: node.id.clone(),
                });
                return Ok(Outcome::fail(format!(
                    "pause requested before stage '{next_id}'"
                )));
            }

            current_id = next_id;
        }

        self.dispatcher.emit(Event::PipelineCompleted {
            pipeline_name: self.graph.name.clone(),
            duration_ms: pipeline_start.elapsed().as_millis() as u64,
            session_display_id: self.session_display_id.clone(),
        });

        Ok(last_outcome)
    }

    fn emit_checkpoint(&self, state: &RunState, node_id: &str, next_node_id: &str) {
        let workspace_snapshot = self
            .workspace
            .as_ref()
            .map(|w| w.workspace_snapshot())
            .unwrap_or_default();
        if !workspace_snapshot.is_empty() {
            self.dispatcher.emit(Event::WorkspaceSnapshotRecorded {
                node_id: node_id.to_string(),
                workspace_snapshot: workspace_snapshot.clone(),
            });
        }

        self.dispatcher.emit(Event::CheckpointSaved {
            node_id: node_id.to_string(),
            completed_nodes: state.completed_nodes.clone(),
            context_snapshot: state.context.snapshot(),
            retry_counters: state.retry_counters.clone(),
            next_node_id: next_node_id.to_string(),
            visited_outcomes: state
                .visited_outcomes
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().to_string()))
                .collect(),
            reroute_count: state.reroute_count,
            workspace_snapshot,
        });
    }

    fn emit_failed(&self, error: &str) {
        tracing::warn!(pipeline = %self.graph.name, error, "pipeline failed");
        self.dispatcher.emit(Event::PipelineFailed {
            pipeline_name: self.graph.name.clone(),
            error: error.to_string(),
            session_display_id: self.session_display_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulationBackend;
    use crate::engine::retry::RecordingSleeper;
    use crate::events::dispatcher::testing::RecordingObserver;
    use crate::handlers::{default_registry, RegistryDeps};
    use crate::model::{Edge, Stage};

    struct Harness {
        runner: PipelineRunner,
        recorder: Arc<RecordingObserver>,
    }

    fn harness(graph: PipelineGraph, backend: SimulationBackend) -> Harness {
        let recorder = Arc::new(RecordingObserver::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_observer(recorder.clone());
        let registry = default_registry(RegistryDeps {
            backend: Some(Arc::new(backend)),
            dispatcher: dispatcher.clone(),
            ..Default::default()
        });
        let runner = PipelineRunner::new(Arc::new(graph), registry, dispatcher)
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        Harness { runner, recorder }
    }

    fn linear_graph() -> PipelineGraph {
        let mut g = PipelineGraph::new("linear");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("plan", Shape::Codergen).with_prompt("plan"));
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "plan"));
        g.add_edge(Edge::new("plan", "done"));
        g
    }

    #[tokio::test]
    async fn test_linear_pipeline_event_order() {
        let h = harness(linear_graph(), SimulationBackend::new());
        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);

        let types = h.recorder.event_types();
        assert_eq!(types.first(), Some(&"PipelineStarted"));
        assert_eq!(types.last(), Some(&"PipelineCompleted"));
        assert_eq!(
            types.iter().filter(|t| **t == "StageStarted").count(),
            2,
            "start and plan each start once: {types:?}"
        );
        assert_eq!(types.iter().filter(|t| **t == "CheckpointSaved").count(), 3);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mut g = linear_graph();
        g.stages.insert(
            "plan".into(),
            Stage::new("plan", Shape::Codergen)
                .with_prompt("plan")
                .with_attribute("max_retries", 2),
        );
        let backend = SimulationBackend::new().with_sequence(
            "plan",
            vec![OutcomeStatus::Fail, OutcomeStatus::Fail, OutcomeStatus::Success],
        );
        let h = harness(g, backend);

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);

        let retrying: Vec<(u32, u32)> = h
            .recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StageRetrying { attempt, max_attempts, .. } => Some((attempt, max_attempts)),
                _ => None,
            })
            .collect();
        assert_eq!(retrying, vec![(1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn test_goal_gate_dead_end_fails_pipeline() {
        let mut g = PipelineGraph::new("gated");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("work", Shape::Codergen).with_prompt("w"));
        g.add_stage(
            Stage::new("critic", Shape::Codergen)
                .with_prompt("c")
                .with_attribute("goal_gate", true),
        );
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "work"));
        g.add_edge(Edge::new("work", "critic"));
        g.add_edge(Edge::new("critic", "done").with_condition("outcome = success"));

        let backend = SimulationBackend::new().with_sequence("critic", vec![OutcomeStatus::Fail]);
        let h = harness(g, backend);

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(h.recorder.event_types().contains(&"PipelineFailed"));
        assert!(!h.recorder.event_types().contains(&"PipelineCompleted"));
    }

    #[tokio::test]
    async fn test_goal_gate_reroute_recovers() {
        let mut g = PipelineGraph::new("gated");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("work", Shape::Codergen).with_prompt("w"));
        g.add_stage(
            Stage::new("critic", Shape::Codergen)
                .with_prompt("c")
                .with_attribute("goal_gate", true)
                .with_attribute("retry_target", "work"),
        );
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "work"));
        g.add_edge(Edge::new("work", "critic"));
        g.add_edge(Edge::new("critic", "done"));

        // Critic fails once; after the reroute through work it succeeds
        let backend = SimulationBackend::new()
            .with_sequence("critic", vec![OutcomeStatus::Fail, OutcomeStatus::Success]);
        let h = harness(g, backend);

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(h.recorder.event_types().contains(&"PipelineCompleted"));

        // work ran twice thanks to the reroute
        let work_starts = h
            .recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::StageStarted { node_id, .. } if node_id == "work"))
            .count();
        assert_eq!(work_starts, 2);
    }

    #[tokio::test]
    async fn test_fail_with_no_edge_fails_pipeline() {
        let mut g = linear_graph();
        // plan only routes onward on success
        g.edges.retain(|e| e.from_id != "plan");
        g.add_edge(Edge::new("plan", "done").with_condition("outcome = success"));

        let backend = SimulationBackend::new().with_sequence("plan", vec![OutcomeStatus::Fail]);
        let h = harness(g, backend);

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert_eq!(h.recorder.event_types().last(), Some(&"PipelineFailed"));
    }

    #[tokio::test]
    async fn test_pause_emits_checkpoint_with_next_node() {
        let mut g = PipelineGraph::new("five");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("plan", Shape::Codergen).with_prompt("p"));
        g.add_stage(Stage::new("build", Shape::Codergen).with_prompt("b"));
        g.add_stage(Stage::new("review", Shape::Codergen).with_prompt("r"));
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "plan"));
        g.add_edge(Edge::new("plan", "build"));
        g.add_edge(Edge::new("build", "review"));
        g.add_edge(Edge::new("review", "done"));

        let h = harness(g, SimulationBackend::new());
        // Request the pause up front; the runner honors it after the next
        // stage completes
        h.runner.request_pause();

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.failure_reason.contains("pause requested"));

        let types = h.recorder.event_types();
        assert!(types.contains(&"PipelinePaused"));
        assert!(!types.contains(&"PipelineCompleted"));

        // The last checkpoint points at the stage that would have run next
        let last_checkpoint = h
            .recorder
            .events()
            .into_iter()
            .rev()
            .find_map(|e| match e {
                Event::CheckpointSaved { next_node_id, completed_nodes, .. } => {
                    Some((next_node_id, completed_nodes))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(last_checkpoint.0, "plan");
        assert_eq!(last_checkpoint.1, vec!["start".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_stages() {
        let mut g = PipelineGraph::new("five");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("plan", Shape::Codergen).with_prompt("p"));
        g.add_stage(Stage::new("build", Shape::Codergen).with_prompt("b"));
        g.add_stage(Stage::new("review", Shape::Codergen).with_prompt("r"));
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "plan"));
        g.add_edge(Edge::new("plan", "build"));
        g.add_edge(Edge::new("build", "review"));
        g.add_edge(Edge::new("review", "done"));

        let h = harness(g, SimulationBackend::new());

        let mut state = RunState::default();
        state.completed_nodes = vec!["start".into(), "plan".into()];
        state.visited_outcomes.insert("start".into(), OutcomeStatus::Success);
        state.visited_outcomes.insert("plan".into(), OutcomeStatus::Success);

        let outcome = h.runner.resume(state, "build").await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);

        let started: Vec<String> = h
            .recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StageStarted { node_id, .. } => Some(node_id),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["build".to_string(), "review".to_string()]);
        assert_eq!(h.recorder.event_types().last(), Some(&"PipelineCompleted"));
        // Resume never re-announces the pipeline
        assert!(!h.recorder.event_types().contains(&"PipelineStarted"));
    }

    #[tokio::test]
    async fn test_resume_rejects_unknown_next_stage() {
        let h = harness(linear_graph(), SimulationBackend::new());
        let err = h.runner.resume(RunState::default(), "ghost").await.unwrap_err();
        assert!(matches!(err, OrchestraError::Resume(_)));
    }

    #[tokio::test]
    async fn test_missing_edge_target_is_fatal() {
        let mut g = linear_graph();
        g.add_edge(Edge::new("plan", "ghost").with_weight(9));
        let h = harness(g, SimulationBackend::new());
        let err = h.runner.run().await.unwrap_err();
        assert!(matches!(err, OrchestraError::Execution(_)));
    }

    #[tokio::test]
    async fn test_reroute_budget_caps_goal_gate_loops() {
        let mut g = PipelineGraph::new("looping");
        g.graph_attributes.insert("max_reroutes".into(), 2.into());
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(
            Stage::new("critic", Shape::Codergen)
                .with_prompt("c")
                .with_attribute("goal_gate", true)
                .with_attribute("retry_target", "critic"),
        );
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "critic"));
        g.add_edge(Edge::new("critic", "done"));

        // The critic never succeeds; the budget must end the cycling
        let backend = SimulationBackend::new().with_sequence("critic", vec![OutcomeStatus::Fail]);
        let h = harness(g, backend);

        let outcome = h.runner.run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(h.recorder.event_types().contains(&"PipelineFailed"));
    }
}
