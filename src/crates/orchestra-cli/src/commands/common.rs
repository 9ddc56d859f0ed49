//! Shared wiring between commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use orchestra_core::backend::{CodergenBackend, OnTurnCallback, SimulationBackend};
use orchestra_core::config::OrchestraConfig;
use orchestra_core::dot::{graph_hash, parse_dot};
use orchestra_core::engine::resume::TurnRecord;
use orchestra_core::engine::session::extract_session_info;
use orchestra_core::model::PipelineGraph;
use orchestra_core::transforms::{apply_model_stylesheet, expand_variables};
use orchestra_core::validation::validate;
use orchestra_store::CxdbClient;
use orchestra_workspace::commit_message::DeterministicCommitMessageGenerator;
use orchestra_workspace::WorkspaceManager;

/// Parse, validate, and transform a pipeline file
///
/// Returns the executable graph and the source hash recorded for resume
/// verification.
pub fn load_pipeline(path: &Path) -> anyhow::Result<(PipelineGraph, String)> {
    if !path.exists() {
        bail!("file not found: {}", path.display());
    }
    let source = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let hash = graph_hash(&source);

    let graph = parse_dot(&String::from_utf8_lossy(&source))?;

    let diagnostics = validate(&graph);
    if !diagnostics.is_valid() {
        for d in diagnostics.errors() {
            eprintln!("  ERROR: [{}] {}", d.rule, d.message);
            if !d.suggestion.is_empty() {
                eprintln!("    Suggestion: {}", d.suggestion);
            }
        }
        bail!("pipeline validation failed");
    }

    let graph = apply_model_stylesheet(expand_variables(graph));
    Ok((graph, hash))
}

/// Connect to the store, check health, and publish the type bundle
pub fn connect_store(config: &OrchestraConfig) -> anyhow::Result<Arc<CxdbClient>> {
    let client = Arc::new(CxdbClient::new(&config.cxdb.url));
    client
        .health_check()
        .map_err(|e| anyhow!("{e}\nRun 'orchestra doctor' for setup instructions."))?;
    client
        .publish_type_bundle()
        .context("failed to publish type bundle")?;
    Ok(client)
}

/// Build the backend named by the configuration
///
/// LLM backends plug in through the `CodergenBackend` trait; this binary
/// ships the simulation backend.
pub fn build_backend(config: &OrchestraConfig) -> anyhow::Result<Arc<dyn CodergenBackend>> {
    match config.backend.as_str() {
        "simulation" => Ok(Arc::new(SimulationBackend::new())),
        other => bail!(
            "backend '{other}' is not available in this build; set 'backend: simulation' in orchestra.yaml"
        ),
    }
}

/// Build the workspace manager when repos are configured
pub fn build_workspace(
    config: &Arc<OrchestraConfig>,
    dispatcher: &orchestra_core::events::EventDispatcher,
) -> Option<Arc<WorkspaceManager>> {
    if config.workspace.repos.is_empty() {
        return None;
    }
    Some(Arc::new(WorkspaceManager::new(
        config.clone(),
        dispatcher.clone(),
        Arc::new(DeterministicCommitMessageGenerator),
    )))
}

/// Route agent turns through the workspace manager
///
/// A commit failure comes back as `Err`; the codergen handler fails the
/// stage on it.
pub fn build_on_turn(workspace: &Arc<WorkspaceManager>) -> OnTurnCallback {
    let workspace = workspace.clone();
    Arc::new(move |turn| workspace.on_turn(turn).map_err(|e| e.to_string()))
}

/// Resolve a display id or raw context id to a context id
pub fn resolve_session_id(client: &CxdbClient, session_id: &str) -> Option<String> {
    // A raw context id resolves directly
    if session_id.parse::<u64>().is_ok() {
        if let Ok(turns) = client.get_turns(session_id, 1) {
            if !turns.is_empty() {
                return Some(session_id.to_string());
            }
        }
    }

    // Otherwise search contexts for a matching display id
    let contexts = client.list_contexts().ok()?;
    for context in contexts {
        let context_id = context
            .get("context_id")
            .or_else(|| context.get("id"))
            .map(json_id)?;
        if context_id.is_empty() {
            continue;
        }
        let Ok(turns) = client.get_turns(&context_id, 500) else { continue };
        let info = extract_session_info(&context_id, &turns);
        if info.display_id == session_id {
            return Some(context_id);
        }
    }
    None
}

pub fn json_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Fetch a session's full turn log
pub fn session_turns(client: &CxdbClient, context_id: &str) -> anyhow::Result<Vec<TurnRecord>> {
    client
        .get_turns(context_id, 1000)
        .with_context(|| format!("failed to read session {context_id}"))
}
