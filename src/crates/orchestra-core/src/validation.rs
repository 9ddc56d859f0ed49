//! Structural graph validation
//!
//! Runs every rule against a parsed graph and collects diagnostics.
//! Errors make the graph unusable; warnings are surfaced by `compile` but
//! do not block execution.

use std::collections::{BTreeSet, VecDeque};

use crate::conditions::validate_condition;
use crate::engine::graph_analysis::find_fan_in;
use crate::model::{PipelineGraph, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
        }
    }
}

/// One validation finding
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: &'static str,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub suggestion: String,
}

impl Diagnostic {
    fn error(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: Severity::Error,
            message: message.into(),
            node_id: None,
            edge: None,
            suggestion: String::new(),
        }
    }

    fn warning(rule: &'static str, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, ..Self::error(rule, message) }
    }

    fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }
}

/// All findings from one validation run
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning).collect()
    }

    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }
}

/// Run every rule and collect diagnostics
pub fn validate(graph: &PipelineGraph) -> Diagnostics {
    let mut diagnostics = Vec::new();
    diagnostics.extend(rule_start_stage(graph));
    diagnostics.extend(rule_terminal_stage(graph));
    diagnostics.extend(rule_reachability(graph));
    diagnostics.extend(rule_edge_endpoints(graph));
    diagnostics.extend(rule_start_no_incoming(graph));
    diagnostics.extend(rule_exit_no_outgoing(graph));
    diagnostics.extend(rule_conditions_parse(graph));
    diagnostics.extend(rule_fan_out_pairing(graph));
    diagnostics.extend(rule_prompt_on_llm_stages(graph));
    Diagnostics { diagnostics }
}

fn rule_start_stage(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let starts: Vec<&str> = graph
        .stages
        .values()
        .filter(|s| s.shape == Shape::Start)
        .map(|s| s.id.as_str())
        .collect();
    match starts.len() {
        0 => vec![Diagnostic::error("start_stage", "No start stage found (shape=Mdiamond)")
            .with_suggestion("Add a stage with shape=Mdiamond to define the pipeline entry point")],
        1 => Vec::new(),
        _ => vec![Diagnostic::error(
            "start_stage",
            format!("Multiple start stages found: {starts:?}"),
        )
        .with_suggestion("A pipeline must have exactly one start stage (shape=Mdiamond)")],
    }
}

fn rule_terminal_stage(graph: &PipelineGraph) -> Vec<Diagnostic> {
    if graph.exit_stages().is_empty() {
        vec![Diagnostic::error("terminal_stage", "No exit stage found (shape=Msquare)")
            .with_suggestion("Add a stage with shape=Msquare to define the pipeline exit point")]
    } else {
        Vec::new()
    }
}

fn rule_reachability(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let Some(start) = graph.start_stage() else { return Vec::new() };

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start.id.as_str()]);
    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        for edge in graph.outgoing_edges(id) {
            if graph.stages.contains_key(&edge.to_id) {
                queue.push_back(&edge.to_id);
            }
        }
    }

    graph
        .stages
        .keys()
        .filter(|id| !visited.contains(id.as_str()))
        .map(|id| {
            Diagnostic::error(
                "reachability",
                format!("Stage '{id}' is not reachable from the start stage"),
            )
            .with_node(id.clone())
            .with_suggestion(format!("Add an edge path from the start stage to '{id}', or remove it"))
        })
        .collect()
}

fn rule_edge_endpoints(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for edge in &graph.edges {
        for (end, id) in [("target", &edge.to_id), ("source", &edge.from_id)] {
            if !graph.stages.contains_key(id) {
                let mut d = Diagnostic::error(
                    "edge_endpoints",
                    format!("Edge {end} '{id}' does not exist"),
                )
                .with_suggestion(format!("Define stage '{id}' or fix the edge {end}"));
                d.edge = Some((edge.from_id.clone(), edge.to_id.clone()));
                diagnostics.push(d);
            }
        }
    }
    diagnostics
}

fn rule_start_no_incoming(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let Some(start) = graph.start_stage() else { return Vec::new() };
    let incoming = graph.incoming_edges(&start.id);
    if incoming.is_empty() {
        Vec::new()
    } else {
        let sources: Vec<&str> = incoming.iter().map(|e| e.from_id.as_str()).collect();
        vec![Diagnostic::error(
            "start_no_incoming",
            format!("Start stage '{}' has incoming edges from: {sources:?}", start.id),
        )
        .with_node(start.id.clone())
        .with_suggestion("Remove edges pointing to the start stage")]
    }
}

fn rule_exit_no_outgoing(graph: &PipelineGraph) -> Vec<Diagnostic> {
    graph
        .exit_stages()
        .iter()
        .filter_map(|exit| {
            let targets: Vec<&str> = graph
                .outgoing_edges(&exit.id)
                .iter()
                .map(|e| e.to_id.as_str())
                .collect();
            if targets.is_empty() {
                return None;
            }
            Some(
                Diagnostic::error(
                    "exit_no_outgoing",
                    format!("Exit stage '{}' has outgoing edges to: {targets:?}", exit.id),
                )
                .with_node(exit.id.clone())
                .with_suggestion("Remove edges from the exit stage"),
            )
        })
        .collect()
}

fn rule_conditions_parse(graph: &PipelineGraph) -> Vec<Diagnostic> {
    graph
        .edges
        .iter()
        .filter_map(|edge| {
            let err = validate_condition(&edge.condition).err()?;
            let mut d = Diagnostic::error(
                "condition_syntax",
                format!(
                    "Edge {} -> {} has an invalid condition: {err}",
                    edge.from_id, edge.to_id
                ),
            );
            d.edge = Some((edge.from_id.clone(), edge.to_id.clone()));
            Some(d)
        })
        .collect()
}

fn rule_fan_out_pairing(graph: &PipelineGraph) -> Vec<Diagnostic> {
    graph
        .stages
        .values()
        .filter(|s| s.shape == Shape::ParallelFanOut)
        .filter_map(|fan_out| {
            if find_fan_in(graph, &fan_out.id).is_some() {
                return None;
            }
            Some(
                Diagnostic::error(
                    "fan_out_pairing",
                    format!(
                        "Fan-out stage '{}' has no fan-in reachable from every branch",
                        fan_out.id
                    ),
                )
                .with_node(fan_out.id.clone())
                .with_suggestion("Route every branch of the fan-out into one tripleoctagon stage"),
            )
        })
        .collect()
}

fn rule_prompt_on_llm_stages(graph: &PipelineGraph) -> Vec<Diagnostic> {
    graph
        .stages
        .values()
        .filter(|s| s.shape == Shape::Codergen && s.prompt.is_empty() && s.label == s.id)
        .map(|s| {
            Diagnostic::warning(
                "prompt_on_llm_stages",
                format!("Codergen stage '{}' has no prompt or descriptive label", s.id),
            )
            .with_node(s.id.clone())
            .with_suggestion(format!("Add a prompt or label attribute to stage '{}'", s.id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Stage};

    fn valid_graph() -> PipelineGraph {
        let mut g = PipelineGraph::new("g");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("work", Shape::Codergen).with_prompt("do it"));
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "work"));
        g.add_edge(Edge::new("work", "done"));
        g
    }

    #[test]
    fn test_valid_graph_passes() {
        let d = validate(&valid_graph());
        assert!(d.is_valid(), "unexpected errors: {:?}", d.errors());
    }

    #[test]
    fn test_missing_start() {
        let mut g = valid_graph();
        g.stages.remove("start");
        g.edges.retain(|e| e.from_id != "start");
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "start_stage"));
    }

    #[test]
    fn test_multiple_starts() {
        let mut g = valid_graph();
        g.add_stage(Stage::new("start2", Shape::Start));
        g.add_edge(Edge::new("start2", "work"));
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "start_stage"));
    }

    #[test]
    fn test_unreachable_stage() {
        let mut g = valid_graph();
        g.add_stage(Stage::new("island", Shape::Codergen).with_prompt("x"));
        let d = validate(&g);
        let found = d.diagnostics.iter().find(|x| x.rule == "reachability").unwrap();
        assert_eq!(found.node_id.as_deref(), Some("island"));
    }

    #[test]
    fn test_missing_edge_target() {
        let mut g = valid_graph();
        g.add_edge(Edge::new("work", "ghost"));
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "edge_endpoints"));
    }

    #[test]
    fn test_start_incoming_and_exit_outgoing() {
        let mut g = valid_graph();
        g.add_edge(Edge::new("work", "start"));
        g.add_edge(Edge::new("done", "work"));
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "start_no_incoming"));
        assert!(d.diagnostics.iter().any(|x| x.rule == "exit_no_outgoing"));
    }

    #[test]
    fn test_bad_condition_reported() {
        let mut g = valid_graph();
        g.edges[0].condition = "outcome success".to_string();
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "condition_syntax"));
    }

    #[test]
    fn test_fan_out_without_fan_in() {
        let mut g = valid_graph();
        g.add_stage(Stage::new("fan", Shape::ParallelFanOut));
        g.add_stage(Stage::new("a", Shape::Codergen).with_prompt("x"));
        g.edges.retain(|e| !(e.from_id == "work" && e.to_id == "done"));
        g.add_edge(Edge::new("work", "fan"));
        g.add_edge(Edge::new("fan", "a"));
        g.add_edge(Edge::new("a", "done"));
        let d = validate(&g);
        assert!(d.diagnostics.iter().any(|x| x.rule == "fan_out_pairing"));
    }

    #[test]
    fn test_prompt_warning_is_not_an_error() {
        let mut g = valid_graph();
        g.stages.get_mut("work").unwrap().prompt = String::new();
        let d = validate(&g);
        assert!(d.is_valid());
        assert_eq!(d.warnings().len(), 1);
    }
}
