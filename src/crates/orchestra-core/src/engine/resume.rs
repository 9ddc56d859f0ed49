//! Checkpoint-based resume
//!
//! Rebuilds a [`RunState`] from a session's turn log: the most recent
//! checkpoint supplies the context snapshot, visited outcomes, and the id
//! of the stage execution resumes at. Terminal sessions refuse to resume,
//! and the on-disk DOT file must still hash to the value recorded at run
//! start.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::dot::graph_hash;
use crate::error::{OrchestraError, Result};
use crate::model::{Context, OutcomeStatus};

use super::runner::RunState;

/// Turn type ids the engine reads and the store observer writes
pub const TYPE_PIPELINE_LIFECYCLE: &str = "dev.orchestra.PipelineLifecycle";
pub const TYPE_NODE_EXECUTION: &str = "dev.orchestra.NodeExecution";
pub const TYPE_CHECKPOINT: &str = "dev.orchestra.Checkpoint";
pub const TYPE_AGENT_TURN: &str = "dev.orchestra.AgentTurn";
pub const TYPE_PARALLEL_EXECUTION: &str = "dev.orchestra.ParallelExecution";
pub const TYPE_WORKTREE_EVENT: &str = "dev.orchestra.WorktreeEvent";

/// One decoded turn from the context store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRecord {
    #[serde(default)]
    pub turn_id: String,
    #[serde(default)]
    pub type_id: String,
    #[serde(default)]
    pub type_version: u32,
    #[serde(default)]
    pub data: JsonMap<String, JsonValue>,
}

impl TurnRecord {
    pub fn data_str(&self, key: &str) -> String {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// Everything needed to resume a pipeline from its latest checkpoint
#[derive(Debug, Clone)]
pub struct ResumeInfo {
    pub state: RunState,
    pub next_node_id: String,
    pub pipeline_name: String,
    pub dot_file_path: String,
    pub graph_hash: String,
    pub context_id: String,
}

/// Rebuild a [`RunState`] from a checkpoint turn payload
pub fn run_state_from_checkpoint(data: &JsonMap<String, JsonValue>) -> RunState {
    let context = data
        .get("context_snapshot")
        .and_then(|v| v.as_object())
        .map(Context::from_snapshot)
        .unwrap_or_default();

    let completed_nodes = data
        .get("completed_nodes")
        .and_then(|v| v.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let visited_outcomes = data
        .get("visited_outcomes")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(node_id, status)| {
                    let status = OutcomeStatus::parse(status.as_str()?)?;
                    Some((node_id.clone(), status))
                })
                .collect()
        })
        .unwrap_or_default();

    let retry_counters = data
        .get("retry_counters")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(node_id, count)| {
                    Some((node_id.clone(), count.as_u64()? as u32))
                })
                .collect()
        })
        .unwrap_or_default();

    let reroute_count = data
        .get("reroute_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    RunState {
        context,
        completed_nodes,
        visited_outcomes,
        retry_counters,
        reroute_count,
    }
}

/// Scan a session's turns and restore state from the latest checkpoint
pub fn restore_from_turns(turns: &[TurnRecord], context_id: &str) -> Result<ResumeInfo> {
    if turns.is_empty() {
        return Err(OrchestraError::Resume("no turns found in session".into()));
    }

    let mut pipeline_name = String::new();
    let mut dot_file_path = String::new();
    let mut recorded_hash = String::new();

    for turn in turns {
        if turn.type_id != TYPE_PIPELINE_LIFECYCLE {
            continue;
        }
        match turn.data_str("status").as_str() {
            "started" => {
                pipeline_name = turn.data_str("pipeline_name");
                dot_file_path = turn.data_str("dot_file_path");
                recorded_hash = turn.data_str("graph_hash");
            }
            "completed" => {
                return Err(OrchestraError::Resume(
                    "session already completed — cannot resume".into(),
                ))
            }
            "failed" => {
                return Err(OrchestraError::Resume("session failed — cannot resume".into()))
            }
            _ => {}
        }
    }

    let checkpoint = turns
        .iter()
        .rev()
        .find(|t| t.type_id == TYPE_CHECKPOINT)
        .ok_or_else(|| OrchestraError::Resume("no checkpoint found in session".into()))?;

    let next_node_id = checkpoint.data_str("next_node_id");
    if next_node_id.is_empty() {
        return Err(OrchestraError::Resume(
            "checkpoint has no next node — pipeline may have terminated".into(),
        ));
    }

    Ok(ResumeInfo {
        state: run_state_from_checkpoint(&checkpoint.data),
        next_node_id,
        pipeline_name,
        dot_file_path,
        graph_hash: recorded_hash,
        context_id: context_id.to_string(),
    })
}

/// Verify the DOT file on disk still matches the hash recorded at run start
pub fn verify_graph_hash(dot_file_path: &str, expected_hash: &str) -> Result<()> {
    let path = Path::new(dot_file_path);
    if !path.exists() {
        return Err(OrchestraError::Resume(format!("DOT file not found: {dot_file_path}")));
    }
    let current = graph_hash(&std::fs::read(path)?);
    if !expected_hash.is_empty() && current != expected_hash {
        return Err(OrchestraError::Resume(format!(
            "DOT file has been modified since the original run (expected hash {}..., got {}...)",
            &expected_hash[..expected_hash.len().min(12)],
            &current[..12],
        )));
    }
    Ok(())
}
