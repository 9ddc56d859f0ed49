//! `orchestra run` — execute a pipeline in a fresh session

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use orchestra_core::config::load_config;
use orchestra_core::engine::PipelineRunner;
use orchestra_core::events::{EventDispatcher, StdoutObserver};
use orchestra_core::handlers::{default_registry, RegistryDeps, Workspace};
use orchestra_core::interviewer::ConsoleInterviewer;
use orchestra_store::CxdbObserver;

use super::common;

pub fn run(pipeline: &Path) -> anyhow::Result<()> {
    let (graph, graph_hash) = common::load_pipeline(pipeline)?;
    let pipeline_dir = pipeline.parent().map(Path::to_path_buf);
    let config = Arc::new(load_config(pipeline_dir.as_deref())?);

    let client = common::connect_store(&config)?;
    let context = client.create_context(0).context("failed to create CXDB context")?;
    let display_id = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();

    let mut dispatcher = EventDispatcher::new();
    dispatcher.add_observer(Arc::new(StdoutObserver));
    dispatcher.add_observer(Arc::new(CxdbObserver::new(
        client.clone(),
        context.context_id.clone(),
    )));

    let workspace = common::build_workspace(&config, &dispatcher);
    let mut on_turn = None;
    if let Some(workspace) = &workspace {
        workspace
            .setup_session(&graph.name, &display_id)
            .context("workspace setup failed")?;
        dispatcher.add_observer(workspace.clone());
        on_turn = Some(common::build_on_turn(workspace));
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

    let mut runner = PipelineRunner::new(Arc::new(graph), registry, dispatcher)
        .with_session_info(&display_id, pipeline.to_string_lossy(), &graph_hash)
        .with_max_steps(config.recursion_limit);
    if let Some(workspace) = &workspace {
        runner = runner.with_workspace(workspace.clone());
    }

    // The runner is the only async section; store reads and writes
    // before and after it stay on this (plain) thread
    let runtime = tokio::runtime::Runtime::new()?;

    // Ctrl-C requests a cooperative pause; the runner finishes the
    // current stage and checkpoints before returning
    let pause_flag = runner.pause_flag();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Pipeline] Pause requested — completing current stage...");
            pause_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let outcome = runtime.block_on(runner.run())?;

    if let Some(workspace) = &workspace {
        workspace.teardown_session();
    }

    println!("\nSession: {display_id} (CXDB context: {})", context.context_id);
    client.close();

    if !outcome.status.is_ok() {
        anyhow::bail!("pipeline did not complete successfully");
    }
    Ok(())
}
