//! Replay from a specific turn
//!
//! Replay forks the context store at a prior agent turn or checkpoint and
//! resumes execution there on an independent timeline. State comes from
//! the nearest checkpoint at or before the target; prior agent turns on
//! the same stage reconstruct interactive conversation history, and the
//! git SHA locates the workspace state to restore.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::error::{OrchestraError, Result};

use super::resume::{
    run_state_from_checkpoint, TurnRecord, TYPE_AGENT_TURN, TYPE_CHECKPOINT,
    TYPE_PIPELINE_LIFECYCLE,
};
use super::runner::RunState;

/// Everything needed to resume from a specific turn
#[derive(Debug, Clone)]
pub struct TurnResumeInfo {
    pub state: RunState,
    pub next_node_id: String,
    pub turn_number: u32,
    /// Workspace SHA the replayed turn was produced against
    pub git_sha: String,
    /// Prior transcript entries for the same stage
    pub prior_messages: Vec<JsonValue>,
    /// Per-repo SHAs when replaying from a checkpoint
    pub workspace_snapshot: BTreeMap<String, String>,
    pub pipeline_name: String,
    pub dot_file_path: String,
    pub graph_hash: String,
    pub context_id: String,
}

fn pipeline_metadata(turns: &[TurnRecord]) -> (String, String, String) {
    for turn in turns {
        if turn.type_id == TYPE_PIPELINE_LIFECYCLE && turn.data_str("status") == "started" {
            return (
                turn.data_str("pipeline_name"),
                turn.data_str("dot_file_path"),
                turn.data_str("graph_hash"),
            );
        }
    }
    Default::default()
}

/// Restore state as of a specific agent turn
pub fn restore_from_turn(
    turns: &[TurnRecord],
    turn_id: &str,
    context_id: &str,
) -> Result<TurnResumeInfo> {
    if turns.is_empty() {
        return Err(OrchestraError::Resume("no turns found in session".into()));
    }

    let (pipeline_name, dot_file_path, graph_hash) = pipeline_metadata(turns);

    let target_index = turns
        .iter()
        .position(|t| t.turn_id == turn_id && t.type_id == TYPE_AGENT_TURN)
        .ok_or_else(|| {
            OrchestraError::Resume(format!("agent turn with turn_id={turn_id} not found"))
        })?;
    let target = &turns[target_index];

    let target_node_id = target.data_str("node_id");
    let turn_number = target
        .data
        .get("turn_number")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let mut git_sha = target.data_str("git_sha");

    let checkpoint = turns[..target_index]
        .iter()
        .rev()
        .find(|t| t.type_id == TYPE_CHECKPOINT)
        .ok_or_else(|| {
            OrchestraError::Resume("no checkpoint found before the target turn".into())
        })?;
    let state = run_state_from_checkpoint(&checkpoint.data);

    // Prior turns on the same stage, up to and including the target,
    // reconstruct the conversation
    let mut prior_messages = Vec::new();
    for turn in &turns[..=target_index] {
        if turn.type_id != TYPE_AGENT_TURN || turn.data_str("node_id") != target_node_id {
            continue;
        }
        let raw = turn.data_str("messages");
        if raw.is_empty() {
            continue;
        }
        if let Ok(JsonValue::Array(messages)) = serde_json::from_str::<JsonValue>(&raw) {
            prior_messages.extend(messages);
        }
    }

    // Fall back to the most recent SHA an earlier turn on this stage
    // recorded
    if git_sha.is_empty() {
        git_sha = turns[..target_index]
            .iter()
            .rev()
            .filter(|t| t.type_id == TYPE_AGENT_TURN)
            .map(|t| t.data_str("git_sha"))
            .find(|sha| !sha.is_empty())
            .unwrap_or_default();
    }

    Ok(TurnResumeInfo {
        state,
        next_node_id: target_node_id,
        turn_number,
        git_sha,
        prior_messages,
        workspace_snapshot: BTreeMap::new(),
        pipeline_name,
        dot_file_path,
        graph_hash,
        context_id: context_id.to_string(),
    })
}

/// Restore state as of a specific checkpoint turn
pub fn restore_from_checkpoint(
    turns: &[TurnRecord],
    checkpoint_id: &str,
    context_id: &str,
) -> Result<TurnResumeInfo> {
    if turns.is_empty() {
        return Err(OrchestraError::Resume("no turns found in session".into()));
    }

    let (pipeline_name, dot_file_path, graph_hash) = pipeline_metadata(turns);

    let checkpoint = turns
        .iter()
        .find(|t| t.turn_id == checkpoint_id && t.type_id == TYPE_CHECKPOINT)
        .ok_or_else(|| {
            OrchestraError::Resume(format!("checkpoint with turn_id={checkpoint_id} not found"))
        })?;

    let next_node_id = checkpoint.data_str("next_node_id");
    if next_node_id.is_empty() {
        return Err(OrchestraError::Resume(
            "checkpoint has no next node — pipeline may have terminated".into(),
        ));
    }

    let workspace_snapshot: BTreeMap<String, String> = checkpoint
        .data
        .get("workspace_snapshot")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(repo, sha)| Some((repo.clone(), sha.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let git_sha = workspace_snapshot.values().next().cloned().unwrap_or_default();

    Ok(TurnResumeInfo {
        state: run_state_from_checkpoint(&checkpoint.data),
        next_node_id,
        turn_number: 0,
        git_sha,
        prior_messages: Vec::new(),
        workspace_snapshot,
        pipeline_name,
        dot_file_path,
        graph_hash,
        context_id: context_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resume::testing::{checkpoint_turn, lifecycle_turn};
    use serde_json::json;

    fn agent_turn(turn_id: &str, node_id: &str, turn_number: u32, git_sha: &str) -> TurnRecord {
        let mut data = serde_json::Map::new();
        data.insert("turn_number".into(), turn_number.into());
        data.insert("node_id".into(), node_id.into());
        data.insert("model".into(), "sim".into());
        data.insert(
            "messages".into(),
            json!([{"role": "user", "content": format!("turn {turn_number}")}])
                .to_string()
                .into(),
        );
        data.insert("git_sha".into(), git_sha.into());
        TurnRecord {
            turn_id: turn_id.into(),
            type_id: TYPE_AGENT_TURN.into(),
            type_version: 2,
            data,
        }
    }

    fn session_turns() -> Vec<TurnRecord> {
        vec![
            lifecycle_turn("1", "started", &[("dot_file_path", "p.dot"), ("graph_hash", "h")]),
            checkpoint_turn("2", "build", &["start", "plan"]),
            agent_turn("3", "build", 1, "aaaa"),
            agent_turn("4", "build", 2, ""),
            checkpoint_turn("5", "review", &["start", "plan", "build"]),
            agent_turn("6", "review", 1, "cccc"),
        ]
    }

    #[test]
    fn test_restore_from_turn_uses_prior_checkpoint() {
        let info = restore_from_turn(&session_turns(), "4", "ctx").unwrap();
        assert_eq!(info.next_node_id, "build");
        assert_eq!(info.turn_number, 2);
        assert_eq!(info.state.completed_nodes, vec!["start", "plan"]);
    }

    #[test]
    fn test_prior_messages_collected_for_same_stage() {
        let info = restore_from_turn(&session_turns(), "4", "ctx").unwrap();
        // Turns 3 and 4 belong to build; review's transcript is excluded
        assert_eq!(info.prior_messages.len(), 2);
        assert_eq!(info.prior_messages[0]["content"], "turn 1");
        assert_eq!(info.prior_messages[1]["content"], "turn 2");
    }

    #[test]
    fn test_git_sha_falls_back_to_earlier_turn() {
        let info = restore_from_turn(&session_turns(), "4", "ctx").unwrap();
        assert_eq!(info.git_sha, "aaaa");
    }

    #[test]
    fn test_unknown_turn_id() {
        let err = restore_from_turn(&session_turns(), "99", "ctx").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_restore_from_checkpoint_reads_snapshot() {
        let mut turns = session_turns();
        turns[4]
            .data
            .insert("workspace_snapshot".into(), json!({"app": "dddd"}));

        let info = restore_from_checkpoint(&turns, "5", "ctx").unwrap();
        assert_eq!(info.next_node_id, "review");
        assert_eq!(info.workspace_snapshot["app"], "dddd");
        assert_eq!(info.git_sha, "dddd");
        assert_eq!(info.pipeline_name, "demo");
    }

    #[test]
    fn test_restore_from_checkpoint_unknown_id() {
        let err = restore_from_checkpoint(&session_turns(), "3", "ctx").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
