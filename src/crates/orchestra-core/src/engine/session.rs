//! Session status derivation
//!
//! A session's status is derived from the head of its turn log: a
//! terminal lifecycle turn wins; a checkpoint head without a terminal
//! lifecycle means the pipeline was interrupted (crashed or killed
//! without a graceful pause); a node-execution head means it is still
//! running.

use super::resume::{
    TurnRecord, TYPE_CHECKPOINT, TYPE_NODE_EXECUTION, TYPE_PIPELINE_LIFECYCLE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Sessions whose workspace branches cleanup must preserve
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session metadata shown by `status`
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub context_id: String,
    pub display_id: String,
    pub pipeline_name: String,
    pub status: SessionStatus,
    pub turn_count: usize,
}

/// Derive status from the most significant turn near the head
pub fn derive_session_status(turns: &[TurnRecord]) -> SessionStatus {
    for turn in turns.iter().rev() {
        match turn.type_id.as_str() {
            TYPE_PIPELINE_LIFECYCLE => match turn.data_str("status").as_str() {
                "paused" => return SessionStatus::Paused,
                "completed" => return SessionStatus::Completed,
                "failed" => return SessionStatus::Failed,
                "started" => return SessionStatus::Running,
                _ => {}
            },
            TYPE_CHECKPOINT => return SessionStatus::Paused,
            TYPE_NODE_EXECUTION => return SessionStatus::Running,
            _ => {}
        }
    }
    SessionStatus::Unknown
}

/// Extract display metadata plus derived status for one session
pub fn extract_session_info(context_id: &str, turns: &[TurnRecord]) -> SessionInfo {
    let mut display_id = String::new();
    let mut pipeline_name = String::new();

    for turn in turns {
        if turn.type_id == TYPE_PIPELINE_LIFECYCLE && turn.data_str("status") == "started" {
            pipeline_name = turn.data_str("pipeline_name");
            display_id = turn.data_str("session_display_id");
            break;
        }
    }

    SessionInfo {
        context_id: context_id.to_string(),
        display_id,
        pipeline_name,
        status: derive_session_status(turns),
        turn_count: turns.len(),
    }
}
