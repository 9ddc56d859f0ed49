//! `orchestra replay` — fork a session at a prior turn and continue there

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use orchestra_core::config::load_config;
use orchestra_core::engine::resume::verify_graph_hash;
use orchestra_core::engine::turn_resume::{restore_from_checkpoint, restore_from_turn};
use orchestra_core::engine::PipelineRunner;
use orchestra_core::events::{EventDispatcher, StdoutObserver};
use orchestra_core::handlers::{default_registry, RegistryDeps, Workspace};
use orchestra_core::interviewer::ConsoleInterviewer;
use orchestra_store::CxdbObserver;
use orchestra_workspace::restore::restore_git_state;

use super::common;

pub fn replay(
    session_id: &str,
    turn: Option<&str>,
    checkpoint: Option<&str>,
) -> anyhow::Result<()> {
    let fork_turn_id = match (turn, checkpoint) {
        (Some(turn), None) => turn,
        (None, Some(checkpoint)) => checkpoint,
        (None, None) => bail!("must specify either --turn or --checkpoint"),
        (Some(_), Some(_)) => bail!("--turn and --checkpoint are mutually exclusive"),
    };

    let config = Arc::new(load_config(None)?);
    let client = common::connect_store(&config)?;

    let context_id = common::resolve_session_id(&client, session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    let turns = common::session_turns(&client, &context_id)?;

    let info = if checkpoint.is_some() {
        restore_from_checkpoint(&turns, fork_turn_id, &context_id)?
    } else {
        restore_from_turn(&turns, fork_turn_id, &context_id)?
    };

    // Fork the context at the target turn; subsequent writes land on an
    // independent timeline
    let base_turn_id: u64 = fork_turn_id
        .parse()
        .map_err(|_| anyhow!("turn id '{fork_turn_id}' is not numeric"))?;
    let fork = client
        .create_context(base_turn_id)
        .context("failed to fork CXDB context")?;
    println!(
        "[Replay] Forked context at turn {fork_turn_id} → new context {}",
        fork.context_id
    );

    verify_graph_hash(&info.dot_file_path, &info.graph_hash)?;

    let dot_path = Path::new(&info.dot_file_path).to_path_buf();
    let (graph, graph_hash) = common::load_pipeline(&dot_path)?;
    if graph.get_stage(&info.next_node_id).is_none() {
        bail!("next stage '{}' not found in graph", info.next_node_id);
    }

    let pipeline_dir = dot_path.parent().map(Path::to_path_buf);
    let config = Arc::new(load_config(pipeline_dir.as_deref())?);
    let config_dir = config
        .config_dir
        .clone()
        .or_else(|| pipeline_dir.clone())
        .unwrap_or_else(|| Path::new(".").to_path_buf());

    // Put the repos back at the state the replayed turn saw
    if !config.workspace.repos.is_empty() {
        if !info.workspace_snapshot.is_empty() {
            restore_git_state(&info.workspace_snapshot, &config.workspace.repos, &config_dir);
            let shas: Vec<String> = info
                .workspace_snapshot
                .iter()
                .map(|(repo, sha)| format!("{repo}={}", &sha[..8.min(sha.len())]))
                .collect();
            println!("[Replay] Workspace restored: {}", shas.join(", "));
        } else if !info.git_sha.is_empty() {
            let snapshot = config
                .workspace
                .repos
                .keys()
                .map(|repo| (repo.clone(), info.git_sha.clone()))
                .collect();
            restore_git_state(&snapshot, &config.workspace.repos, &config_dir);
            println!(
                "[Replay] Git state restored to {}",
                &info.git_sha[..8.min(info.git_sha.len())]
            );
        }
    }

    let mut dispatcher = EventDispatcher::new();
    dispatcher.add_observer(Arc::new(StdoutObserver));
    dispatcher.add_observer(Arc::new(CxdbObserver::new(
        client.clone(),
        fork.context_id.clone(),
    )));

    let workspace = common::build_workspace(&config, &dispatcher);
    let mut on_turn = None;
    if let Some(workspace) = &workspace {
        match workspace.setup_session(&info.pipeline_name, session_id) {
            Ok(()) => {
                dispatcher.add_observer(workspace.clone());
                on_turn = Some(common::build_on_turn(workspace));
            }
            Err(e) => eprintln!("Warning: workspace setup failed during replay: {e}"),
        }
    }

    let backend = common::build_backend(&config)?;
    let registry = default_registry(RegistryDeps {
        backend: Some(backend),
        interviewer: Some(Arc::new(ConsoleInterviewer::new())),
        workspace: workspace.clone().map(|w| w as Arc<dyn Workspace>),
        dispatcher: dispatcher.clone(),
        config: config.clone(),
        on_turn,
        pipeline_dir,
        ..Default::default()
    });

    println!(
        "[Replay] Replaying from turn {fork_turn_id} at stage '{}'",
        info.next_node_id
    );

    let mut runner = PipelineRunner::new(Arc::new(graph), registry, dispatcher)
        .with_session_info(session_id, &info.dot_file_path, &graph_hash)
        .with_max_steps(config.recursion_limit);
    if let Some(workspace) = &workspace {
        runner = runner.with_workspace(workspace.clone());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(runner.resume(info.state, &info.next_node_id))?;

    if let Some(workspace) = &workspace {
        workspace.teardown_session();
    }

    println!("\nSession: {session_id} (forked CXDB context: {})", fork.context_id);
    client.close();

    if !outcome.status.is_ok() {
        bail!("pipeline did not complete successfully");
    }
    Ok(())
}
