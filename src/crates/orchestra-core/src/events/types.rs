//! Event types for pipeline execution tracking
//!
//! Every observable decision the engine makes is emitted as one of these
//! variants. Observers mirror them to stdout for operator feedback and to
//! the context store for durability; the workspace manager watches stage
//! boundaries to learn the current node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::model::TokenUsage;

/// Tagged union over every observable pipeline transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum Event {
    PipelineStarted {
        pipeline_name: String,
        goal: String,
        session_display_id: String,
        dot_file_path: String,
        graph_hash: String,
    },
    PipelineCompleted {
        pipeline_name: String,
        duration_ms: u64,
        session_display_id: String,
    },
    PipelineFailed {
        pipeline_name: String,
        error: String,
        session_display_id: String,
    },
    PipelinePaused {
        pipeline_name: String,
        session_display_id: String,
        checkpoint_node_id: String,
    },
    StageStarted {
        node_id: String,
        handler_type: String,
    },
    StageCompleted {
        node_id: String,
        handler_type: String,
        status: String,
        duration_ms: u64,
        prompt: String,
        response: String,
        outcome: String,
    },
    StageFailed {
        node_id: String,
        handler_type: String,
        error: String,
    },
    StageRetrying {
        node_id: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    CheckpointSaved {
        node_id: String,
        completed_nodes: Vec<String>,
        context_snapshot: JsonMap<String, JsonValue>,
        retry_counters: BTreeMap<String, u32>,
        next_node_id: String,
        visited_outcomes: BTreeMap<String, String>,
        reroute_count: u32,
        workspace_snapshot: BTreeMap<String, String>,
    },
    AgentTurnCompleted {
        node_id: String,
        turn_number: u32,
        model: String,
        provider: String,
        /// JSON-encoded transcript, empty when the turn had none
        messages: String,
        /// JSON-encoded tool call list, empty when the turn had none
        tool_calls: String,
        files_written: Vec<String>,
        token_usage: TokenUsage,
        git_sha: String,
        commit_message: String,
    },
    ParallelStarted {
        node_id: String,
        branch_count: usize,
    },
    ParallelBranchStarted {
        node_id: String,
        branch_id: String,
        first_node_id: String,
    },
    ParallelBranchCompleted {
        node_id: String,
        branch_id: String,
        status: String,
        duration_ms: u64,
        failure_reason: String,
    },
    ParallelCompleted {
        node_id: String,
        success_count: usize,
        failure_count: usize,
        duration_ms: u64,
    },
    SessionBranchCreated {
        repo_name: String,
        branch_name: String,
        base_sha: String,
        repo_path: String,
    },
    AgentCommitCreated {
        repo_name: String,
        node_id: String,
        sha: String,
        message: String,
        files: Vec<String>,
        turn_number: u32,
    },
    WorktreeCreated {
        repo_name: String,
        branch_id: String,
        worktree_path: String,
        worktree_branch: String,
    },
    WorktreeMerged {
        repo_name: String,
        branch_ids: Vec<String>,
        merged_sha: String,
    },
    WorktreeMergeConflict {
        repo_name: String,
        branch_ids: Vec<String>,
        conflicting_files: Vec<String>,
    },
    WorkspaceSnapshotRecorded {
        node_id: String,
        workspace_snapshot: BTreeMap<String, String>,
    },
}

impl Event {
    /// Stable event-type name, matching the serde tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "PipelineStarted",
            Self::PipelineCompleted { .. } => "PipelineCompleted",
            Self::PipelineFailed { .. } => "PipelineFailed",
            Self::PipelinePaused { .. } => "PipelinePaused",
            Self::StageStarted { .. } => "StageStarted",
            Self::StageCompleted { .. } => "StageCompleted",
            Self::StageFailed { .. } => "StageFailed",
            Self::StageRetrying { .. } => "StageRetrying",
            Self::CheckpointSaved { .. } => "CheckpointSaved",
            Self::AgentTurnCompleted { .. } => "AgentTurnCompleted",
            Self::ParallelStarted { .. } => "ParallelStarted",
            Self::ParallelBranchStarted { .. } => "ParallelBranchStarted",
            Self::ParallelBranchCompleted { .. } => "ParallelBranchCompleted",
            Self::ParallelCompleted { .. } => "ParallelCompleted",
            Self::SessionBranchCreated { .. } => "SessionBranchCreated",
            Self::AgentCommitCreated { .. } => "AgentCommitCreated",
            Self::WorktreeCreated { .. } => "WorktreeCreated",
            Self::WorktreeMerged { .. } => "WorktreeMerged",
            Self::WorktreeMergeConflict { .. } => "WorktreeMergeConflict",
            Self::WorkspaceSnapshotRecorded { .. } => "WorkspaceSnapshotRecorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = Event::StageStarted {
            node_id: "plan".into(),
            handler_type: "codergen".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], event.event_type());
    }

    #[test]
    fn test_serde_round_trip() {
        let event = Event::StageRetrying {
            node_id: "flaky".into(),
            attempt: 1,
            max_attempts: 3,
            delay_ms: 200,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
