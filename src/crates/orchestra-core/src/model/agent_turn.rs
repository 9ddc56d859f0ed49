//! Agent turn records
//!
//! One assistant message plus its tool calls and file writes — the minimum
//! commit-worthy unit. The workspace manager fills in `git_sha` and
//! `commit_message` after converting the turn's writes into a commit.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Input/output token counts for one turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// One tool invocation the agent made during a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: JsonValue,
}

/// One agent turn within a stage invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTurn {
    /// Monotonic per stage invocation, starting at 1
    pub turn_number: u32,

    /// Stage that produced the turn
    pub node_id: String,

    pub model: String,
    pub provider: String,

    /// Opaque transcript (role/content records)
    #[serde(default)]
    pub messages: Vec<JsonValue>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Absolute paths of files the agent wrote this turn
    #[serde(default)]
    pub files_written: Vec<String>,

    #[serde(default)]
    pub token_usage: TokenUsage,

    /// Commit SHA recorded by the workspace manager; empty when the turn
    /// wrote nothing
    #[serde(default)]
    pub git_sha: String,

    #[serde(default)]
    pub commit_message: String,
}

impl AgentTurn {
    pub fn new(turn_number: u32, node_id: impl Into<String>) -> Self {
        Self {
            turn_number,
            node_id: node_id.into(),
            model: String::new(),
            provider: String::new(),
            messages: Vec::new(),
            tool_calls: Vec::new(),
            files_written: Vec::new(),
            token_usage: TokenUsage::default(),
            git_sha: String::new(),
            commit_message: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model = model.into();
        self.provider = provider.into();
        self
    }

    pub fn with_files_written(mut self, files: Vec<String>) -> Self {
        self.files_written = files;
        self
    }

    /// The last user/human message, used as commit intent
    pub fn intent(&self) -> String {
        for msg in self.messages.iter().rev() {
            let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("");
            if role == "user" || role == "human" {
                if let Some(content) = msg.get("content").and_then(|c| c.as_str()) {
                    if !content.is_empty() {
                        return content.chars().take(200).collect();
                    }
                }
            }
        }
        if !self.tool_calls.is_empty() {
            let names: Vec<&str> = self.tool_calls.iter().take(3).map(|tc| tc.name.as_str()).collect();
            return format!("Tool calls: {}", names.join(", "));
        }
        "Agent changes".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_from_last_user_message() {
        let mut turn = AgentTurn::new(1, "plan");
        turn.messages = vec![
            json!({"role": "user", "content": "write the parser"}),
            json!({"role": "assistant", "content": "done"}),
        ];
        assert_eq!(turn.intent(), "write the parser");
    }

    #[test]
    fn test_intent_falls_back_to_tool_calls() {
        let mut turn = AgentTurn::new(1, "plan");
        turn.tool_calls = vec![
            ToolCall { name: "write_file".into(), args: json!({}) },
            ToolCall { name: "run_tests".into(), args: json!({}) },
        ];
        assert_eq!(turn.intent(), "Tool calls: write_file, run_tests");
    }

    #[test]
    fn test_intent_default() {
        assert_eq!(AgentTurn::new(1, "plan").intent(), "Agent changes");
    }
}
