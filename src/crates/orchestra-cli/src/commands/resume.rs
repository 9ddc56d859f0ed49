//! `orchestra resume` — continue a paused session in the same context

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use orchestra_core::config::load_config;
use orchestra_core::engine::resume::{restore_from_turns, verify_graph_hash};
use orchestra_core::engine::PipelineRunner;
use orchestra_core::events::{EventDispatcher, StdoutObserver};
use orchestra_core::handlers::{default_registry, RegistryDeps};
use orchestra_core::interviewer::ConsoleInterviewer;
use orchestra_store::CxdbObserver;

use super::common;

pub fn resume(session_id: &str) -> anyhow::Result<()> {
    let config = Arc::new(load_config(None)?);
    let client = common::connect_store(&config)?;

    let context_id = common::resolve_session_id(&client, session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

    let turns = common::session_turns(&client, &context_id)?;
    let info = restore_from_turns(&turns, &context_id)?;

    verify_graph_hash(&info.dot_file_path, &info.graph_hash)?;

    let dot_path = Path::new(&info.dot_file_path).to_path_buf();
    let (graph, graph_hash) = common::load_pipeline(&dot_path)?;
    if graph.get_stage(&info.next_node_id).is_none() {
        bail!("next stage '{}' not found in graph", info.next_node_id);
    }

    // Reload config from the pipeline's directory so backend and agent
    // resolution match the original run
    let pipeline_dir = dot_path.parent().map(Path::to_path_buf);
    let config = Arc::new(load_config(pipeline_dir.as_deref())?);

    let mut dispatcher = EventDispatcher::new();
    dispatcher.add_observer(Arc::new(StdoutObserver));
    dispatcher.add_observer(Arc::new(CxdbObserver::new(client.clone(), context_id.clone())));

    let backend = common::build_backend(&config)?;
    let registry = default_registry(RegistryDeps {
        backend: Some(backend),
        interviewer: Some(Arc::new(ConsoleInterviewer::new())),
        dispatcher: dispatcher.clone(),
        config: config.clone(),
        pipeline_dir,
        ..Default::default()
    });

    println!("[Resume] Resuming session {session_id} from stage '{}'", info.next_node_id);

    let runner = PipelineRunner::new(Arc::new(graph), registry, dispatcher)
        .with_session_info(session_id, &info.dot_file_path, &graph_hash)
        .with_max_steps(config.recursion_limit);

    let runtime = tokio::runtime::Runtime::new()?;
    let pause_flag = runner.pause_flag();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Pipeline] Pause requested — completing current stage...");
            pause_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let outcome = runtime.block_on(runner.resume(info.state, &info.next_node_id))?;

    println!("\nSession: {session_id} (CXDB context: {context_id})");
    client.close();

    if !outcome.status.is_ok() {
        bail!("pipeline did not complete successfully");
    }
    Ok(())
}
