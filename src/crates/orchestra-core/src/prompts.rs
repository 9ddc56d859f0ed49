//! Prompt composition
//!
//! A stage's prompt is either composed from its agent's layer files
//! (role, persona, personality, task — discovered relative to the
//! pipeline directory) or taken from the stage's own `prompt` attribute.
//! The task layer and inline prompts render as templates against the
//! nested view of the context, so `{{ tool.output }}` works anywhere.

use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde_json::Value as JsonValue;

use crate::config::{AgentConfig, OrchestraConfig};
use crate::error::Result;
use crate::model::{Context, Stage};

const LAYER_ORDER: [&str; 4] = ["role", "persona", "personality", "task"];

fn layer_file(agent: &AgentConfig, layer: &str) -> String {
    match layer {
        "role" => agent.role.clone(),
        "persona" => agent.persona.clone(),
        "personality" => agent.personality.clone(),
        "task" => agent.task.clone(),
        _ => String::new(),
    }
}

/// Render a template string against the nested context view
pub fn render_template(template: &str, context: &Context) -> Result<String> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }
    let mut env = Environment::new();
    env.add_template("prompt", template)?;
    let rendered = env
        .get_template("prompt")?
        .render(JsonValue::Object(context.nested()))?;
    Ok(rendered)
}

/// Find a layer file relative to the pipeline directory, then the config
/// directory
fn discover_file(
    filename: &str,
    pipeline_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Option<PathBuf> {
    let candidates = [
        pipeline_dir.map(|d| d.join(filename)),
        config_dir.map(|d| d.join(filename)),
        Some(PathBuf::from(filename)),
    ];
    candidates.into_iter().flatten().find(|p| p.is_file())
}

/// Compose the layered prompt for an agent
pub fn compose_agent_prompt(
    agent: &AgentConfig,
    context: &Context,
    pipeline_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<String> {
    let mut layers = Vec::new();

    for layer_name in LAYER_ORDER {
        let filename = layer_file(agent, layer_name);
        if filename.is_empty() {
            continue;
        }
        let Some(path) = discover_file(&filename, pipeline_dir, config_dir) else {
            tracing::debug!(layer = layer_name, filename, "prompt layer file not found");
            continue;
        };
        let mut content = std::fs::read_to_string(&path)?;
        if layer_name == "task" {
            content = render_template(&content, context)?;
        }
        layers.push(content.trim_end().to_string());
    }

    Ok(layers.join("\n\n"))
}

/// Compose the effective prompt for a stage
///
/// A stage naming an `agent` uses that agent's layers; otherwise the
/// stage's own prompt renders against the context.
pub fn compose_stage_prompt(
    stage: &Stage,
    context: &Context,
    config: &OrchestraConfig,
    pipeline_dir: Option<&Path>,
) -> Result<String> {
    let agent_name = stage.attr_str("agent");
    if !agent_name.is_empty() {
        if let Some(agent) = config.agents.get(&agent_name) {
            let composed = compose_agent_prompt(
                agent,
                context,
                pipeline_dir,
                config.config_dir.as_deref(),
            )?;
            if !composed.is_empty() {
                return Ok(composed);
            }
        }
    }
    render_template(&stage.prompt, context)
}
