//! The context-store observer
//!
//! Mirrors engine events into typed turns on one context. Every append
//! re-keys the payload by numeric field tags via the type bundle. Append
//! failures are logged, never propagated — durability hiccups must not
//! crash the pipeline mid-stage.

use std::sync::Arc;

use orchestra_core::engine::resume::{
    TYPE_AGENT_TURN, TYPE_CHECKPOINT, TYPE_NODE_EXECUTION, TYPE_PARALLEL_EXECUTION,
    TYPE_PIPELINE_LIFECYCLE, TYPE_WORKTREE_EVENT,
};
use orchestra_core::events::{Event, EventObserver};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::client::CxdbClient;
use crate::type_bundle::to_tagged;

pub struct CxdbObserver {
    client: Arc<CxdbClient>,
    context_id: String,
}

impl CxdbObserver {
    pub fn new(client: Arc<CxdbClient>, context_id: impl Into<String>) -> Self {
        Self { client, context_id: context_id.into() }
    }

    fn append(&self, type_id: &str, type_version: u32, data: JsonMap<String, JsonValue>) {
        let tagged = to_tagged(type_id, type_version, &data);
        if let Err(e) = self
            .client
            .append_turn(&self.context_id, type_id, type_version, &tagged)
        {
            tracing::warn!(type_id, error = %e, "failed to append turn to CXDB");
        }
    }
}

fn object(value: JsonValue) -> JsonMap<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

impl EventObserver for CxdbObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::PipelineStarted {
                pipeline_name,
                goal,
                session_display_id,
                dot_file_path,
                graph_hash,
            } => self.append(
                TYPE_PIPELINE_LIFECYCLE,
                2,
                object(json!({
                    "pipeline_name": pipeline_name,
                    "goal": goal,
                    "status": "started",
                    "session_display_id": session_display_id,
                    "dot_file_path": dot_file_path,
                    "graph_hash": graph_hash,
                })),
            ),
            Event::PipelineCompleted { pipeline_name, duration_ms, .. } => self.append(
                TYPE_PIPELINE_LIFECYCLE,
                2,
                object(json!({
                    "pipeline_name": pipeline_name,
                    "status": "completed",
                    "duration_ms": duration_ms,
                })),
            ),
            Event::PipelineFailed { pipeline_name, error, .. } => self.append(
                TYPE_PIPELINE_LIFECYCLE,
                2,
                object(json!({
                    "pipeline_name": pipeline_name,
                    "status": "failed",
                    "error": error,
                })),
            ),
            Event::PipelinePaused { pipeline_name, session_display_id, .. } => self.append(
                TYPE_PIPELINE_LIFECYCLE,
                2,
                object(json!({
                    "pipeline_name": pipeline_name,
                    "status": "paused",
                    "session_display_id": session_display_id,
                })),
            ),
            Event::StageStarted { node_id, handler_type } => self.append(
                TYPE_NODE_EXECUTION,
                1,
                object(json!({
                    "node_id": node_id,
                    "handler_type": handler_type,
                    "status": "started",
                })),
            ),
            Event::StageCompleted {
                node_id,
                handler_type,
                status,
                duration_ms,
                prompt,
                response,
                outcome,
            } => self.append(
                TYPE_NODE_EXECUTION,
                1,
                object(json!({
                    "node_id": node_id,
                    "handler_type": handler_type,
                    "status": status,
                    "prompt": prompt,
                    "response": response,
                    "outcome": outcome,
                    "duration_ms": duration_ms,
                })),
            ),
            Event::StageFailed { node_id, handler_type, .. } => self.append(
                TYPE_NODE_EXECUTION,
                1,
                object(json!({
                    "node_id": node_id,
                    "handler_type": handler_type,
                    "status": "failed",
                })),
            ),
            Event::StageRetrying { node_id, .. } => self.append(
                TYPE_NODE_EXECUTION,
                1,
                object(json!({
                    "node_id": node_id,
                    "handler_type": "",
                    "status": "retrying",
                })),
            ),
            Event::CheckpointSaved {
                node_id,
                completed_nodes,
                context_snapshot,
                retry_counters,
                next_node_id,
                visited_outcomes,
                reroute_count,
                workspace_snapshot,
            } => self.append(
                TYPE_CHECKPOINT,
                3,
                object(json!({
                    "current_node": node_id,
                    "completed_nodes": completed_nodes,
                    "context_snapshot": context_snapshot,
                    "retry_counters": retry_counters,
                    "next_node_id": next_node_id,
                    "visited_outcomes": visited_outcomes,
                    "reroute_count": reroute_count,
                    "workspace_snapshot": workspace_snapshot,
                })),
            ),
            Event::AgentTurnCompleted {
                node_id,
                turn_number,
                model,
                provider,
                messages,
                tool_calls,
                files_written,
                token_usage,
                git_sha,
                commit_message,
            } => self.append(
                TYPE_AGENT_TURN,
                2,
                object(json!({
                    "turn_number": turn_number,
                    "node_id": node_id,
                    "model": model,
                    "provider": provider,
                    "messages": messages,
                    "tool_calls": tool_calls,
                    "files_written": files_written,
                    "token_usage": {"input": token_usage.input, "output": token_usage.output},
                    "git_sha": git_sha,
                    "commit_message": commit_message,
                })),
            ),
            Event::ParallelStarted { node_id, branch_count } => self.append(
                TYPE_PARALLEL_EXECUTION,
                1,
                object(json!({
                    "node_id": node_id,
                    "branch_count": branch_count,
                    "status": "started",
                })),
            ),
            Event::ParallelCompleted { node_id, success_count, failure_count, duration_ms } => {
                self.append(
                    TYPE_PARALLEL_EXECUTION,
                    1,
                    object(json!({
                        "node_id": node_id,
                        "branch_count": 0,
                        "success_count": success_count,
                        "failure_count": failure_count,
                        "duration_ms": duration_ms,
                        "status": "completed",
                    })),
                )
            }
            Event::WorktreeCreated { repo_name, branch_id, worktree_path, worktree_branch } => {
                self.append(
                    TYPE_WORKTREE_EVENT,
                    1,
                    object(json!({
                        "repo_name": repo_name,
                        "branch_id": branch_id,
                        "worktree_path": worktree_path,
                        "worktree_branch": worktree_branch,
                        "status": "created",
                    })),
                )
            }
            Event::WorktreeMerged { repo_name, branch_ids, merged_sha } => self.append(
                TYPE_WORKTREE_EVENT,
                1,
                object(json!({
                    "repo_name": repo_name,
                    "branch_ids": branch_ids,
                    "merged_sha": merged_sha,
                    "status": "merged",
                })),
            ),
            // Branch-level, workspace-snapshot, and commit events are
            // operator feedback only; the checkpoint and agent-turn
            // payloads already carry their durable content
            Event::ParallelBranchStarted { .. }
            | Event::ParallelBranchCompleted { .. }
            | Event::SessionBranchCreated { .. }
            | Event::AgentCommitCreated { .. }
            | Event::WorktreeMergeConflict { .. }
            | Event::WorkspaceSnapshotRecorded { .. } => {}
        }
    }
}
