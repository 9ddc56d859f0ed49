//! Shell tool handler
//!
//! Runs the stage's `tool_command` through the shell, storing stdout under
//! `tool.output` and per-tool keys under `tools.<name>.*`. Commands are
//! static pipeline-author strings; template variables render against the
//! context before execution.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{NodeHandler, Workspace};
use crate::model::{Context, Outcome, PipelineGraph, Stage};
use crate::prompts::render_template;

/// Parse a timeout like `60s`, `5m`, or a plain number of seconds
fn parse_timeout_seconds(value: &str) -> f64 {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('s') {
        stripped.parse().unwrap_or(60.0)
    } else if let Some(stripped) = value.strip_suffix('m') {
        stripped.parse::<f64>().map(|m| m * 60.0).unwrap_or(60.0)
    } else {
        value.parse().unwrap_or(60.0)
    }
}

pub struct ToolHandler {
    workspace: Option<Arc<dyn Workspace>>,
}

impl ToolHandler {
    pub fn new(workspace: Option<Arc<dyn Workspace>>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl NodeHandler for ToolHandler {
    async fn handle(&self, stage: &Stage, context: &Context, _graph: &PipelineGraph) -> Outcome {
        let command = stage.attr_str("tool_command");
        if command.is_empty() {
            return Outcome::fail("No tool_command specified");
        }

        let command = match render_template(&command, context) {
            Ok(rendered) => rendered,
            Err(e) => return Outcome::fail(format!("tool_command template error: {e}")),
        };

        let timeout_attr = stage.attr_str("timeout");
        let timeout = if timeout_attr.is_empty() { 60.0 } else { parse_timeout_seconds(&timeout_attr) };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        if let Some(cwd) = self.workspace.as_ref().and_then(|w| w.primary_repo_path()) {
            cmd.current_dir(cwd);
        }

        let start = Instant::now();
        let output = tokio::time::timeout(
            std::time::Duration::from_secs_f64(timeout),
            cmd.output(),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        let output = match output {
            Err(_) => {
                return Outcome::fail(format!("Command timed out after {timeout}s"))
                    .with_update("tool.duration_ms", duration_ms);
            }
            Ok(Err(e)) => return Outcome::fail(format!("Failed to spawn command: {e}")),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        let name = {
            let n = stage.attr_str("name");
            if n.is_empty() { stage.id.clone() } else { n }
        };

        // Accumulate outputs across repeat visits to the same tool
        let mut accumulated: Vec<JsonValue> = context
            .get(&format!("tools.{name}.outputs"))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        accumulated.push(stdout.clone().into());

        let apply_updates = |mut outcome: Outcome| {
            outcome = outcome
                .with_update("tool.output", stdout.clone())
                .with_update("tool.exit_code", exit_code)
                .with_update("tool.duration_ms", duration_ms)
                .with_update(format!("tools.{name}.output"), stdout.clone())
                .with_update(format!("tools.{name}.exit_code"), exit_code)
                .with_update(format!("tools.{name}.duration_ms"), duration_ms);
            outcome
                .context_updates
                .insert(format!("tools.{name}.outputs"), accumulated.clone().into());
            outcome
        };

        if exit_code != 0 {
            return apply_updates(Outcome::fail(format!(
                "Command exited with code {exit_code}: {stderr}"
            )));
        }

        apply_updates(Outcome::success().with_notes(stdout.clone()))
    }
}
