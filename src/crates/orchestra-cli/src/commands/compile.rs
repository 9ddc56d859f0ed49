//! `orchestra compile` — parse and validate a pipeline

use std::path::Path;

use anyhow::{bail, Context as _};
use orchestra_core::dot::parse_dot;
use orchestra_core::validation::validate;

pub fn compile(pipeline: &Path) -> anyhow::Result<()> {
    if !pipeline.exists() {
        bail!("file not found: {}", pipeline.display());
    }
    let source = std::fs::read_to_string(pipeline)
        .with_context(|| format!("failed to read {}", pipeline.display()))?;

    let graph = parse_dot(&source)?;

    let diagnostics = validate(&graph);
    for d in &diagnostics.diagnostics {
        let location = match (&d.node_id, &d.edge) {
            (_, Some((from, to))) => format!(" (edge: {from} -> {to})"),
            (Some(node), None) => format!(" (node: {node})"),
            (None, None) => String::new(),
        };
        println!("  {}: [{}] {}{location}", d.severity.as_str(), d.rule, d.message);
        if !d.suggestion.is_empty() {
            println!("    Suggestion: {}", d.suggestion);
        }
    }
    if !diagnostics.is_valid() {
        bail!("pipeline validation failed");
    }

    println!("Pipeline: {}", graph.name);
    let goal = graph.goal();
    println!("  Goal: {}", if goal.is_empty() { "(none)" } else { &goal });
    println!("  Stages: {}", graph.stages.len());
    println!("  Edges: {}", graph.edges.len());
    for stage in graph.stages.values() {
        println!("    {} [{}] — {}", stage.id, stage.shape, stage.label);
    }

    Ok(())
}
