//! LLM-backed code generation handler

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;

use super::NodeHandler;
use crate::backend::{CodergenBackend, OnTurnCallback};
use crate::config::OrchestraConfig;
use crate::model::{AgentTurn, Context, Outcome, PipelineGraph, Stage};
use crate::prompts::compose_stage_prompt;

/// Extract `key: value` context variables from response text
///
/// Matches lines like `critic_verdict: insufficient` (markdown emphasis
/// stripped); keys are lowercase snake_case, values a single word.
pub fn extract_context_vars(text: &str) -> Vec<(String, String)> {
    let re = Regex::new(r"^([a-z][a-z0-9_]*)\s*:\s*(\w+)$").expect("static regex");
    text.lines()
        .filter_map(|line| {
            let cleaned = line.trim().trim_matches(|c| c == '*' || c == '_').trim();
            let captures = re.captures(cleaned)?;
            Some((captures[1].to_string(), captures[2].to_string()))
        })
        .collect()
}

/// Runs one agent stage through the configured backend
pub struct CodergenHandler {
    backend: Arc<dyn CodergenBackend>,
    config: Arc<OrchestraConfig>,
    on_turn: Option<OnTurnCallback>,
    pipeline_dir: Option<PathBuf>,
}

impl CodergenHandler {
    pub fn new(
        backend: Arc<dyn CodergenBackend>,
        config: Arc<OrchestraConfig>,
        on_turn: Option<OnTurnCallback>,
        pipeline_dir: Option<PathBuf>,
    ) -> Self {
        Self { backend, config, on_turn, pipeline_dir }
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    async fn handle(&self, stage: &Stage, context: &Context, _graph: &PipelineGraph) -> Outcome {
        let prompt = match compose_stage_prompt(
            stage,
            context,
            &self.config,
            self.pipeline_dir.as_deref(),
        ) {
            Ok(prompt) => prompt,
            Err(e) => return Outcome::fail(format!("prompt composition failed: {e}")),
        };

        // Commit failures are critical: wrap the callback so the first
        // error a turn reports fails the stage, whatever the backend
        // makes of the returned Err
        let commit_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let wrapped: Option<OnTurnCallback> = self.on_turn.clone().map(|inner| {
            let commit_error = commit_error.clone();
            let callback: OnTurnCallback = Arc::new(move |turn: &mut AgentTurn| {
                let result = inner(turn);
                if let Err(e) = &result {
                    let mut slot = commit_error.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e.clone());
                    }
                }
                result
            });
            callback
        });

        let mut outcome = self
            .backend
            .run(stage, &prompt, context, wrapped.as_ref())
            .await;

        if let Some(error) = commit_error.lock().unwrap().take() {
            return Outcome::fail(format!("agent turn commit failed: {error}"));
        }

        if outcome.status.is_ok() && !outcome.notes.is_empty() {
            let response = outcome.notes.clone();
            outcome
                .context_updates
                .entry("last_response".to_string())
                .or_insert_with(|| response.clone().into());
            for (key, value) in extract_context_vars(&response) {
                outcome.context_updates.insert(key, value.into());
            }
        }

        outcome
    }
}
