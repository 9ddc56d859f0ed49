//! Pipeline graph: stages, edges, and graph-level attributes
//!
//! The graph is immutable after construction. Lookups by stage id and by
//! edge direction are the only queries the engine needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Discriminator determining which handler executes a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Pipeline entry point
    Start,
    /// Pipeline exit point
    Exit,
    /// LLM-backed code generation stage
    Codergen,
    /// Pure conditional routing stage
    Conditional,
    /// Shell command stage
    Tool,
    /// Human multiple-choice gate
    HumanGate,
    /// Multi-turn human/agent conversation stage
    InteractiveBox,
    /// Parallel fan-out stage
    ParallelFanOut,
    /// Parallel fan-in (join) stage
    ParallelFanIn,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Exit => "exit",
            Self::Codergen => "codergen",
            Self::Conditional => "conditional",
            Self::Tool => "tool",
            Self::HumanGate => "human_gate",
            Self::InteractiveBox => "interactive_box",
            Self::ParallelFanOut => "parallel_fan_out",
            Self::ParallelFanIn => "parallel_fan_in",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work in the pipeline graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Unique stage identifier within the graph
    pub id: String,

    /// Handler discriminator
    pub shape: Shape,

    /// Human-readable label (defaults to the id)
    pub label: String,

    /// Prompt text for LLM-backed stages
    pub prompt: String,

    /// Author-supplied attributes (retry policy, goal_gate, join_policy, ...)
    pub attributes: BTreeMap<String, JsonValue>,
}

impl Stage {
    pub fn new(id: impl Into<String>, shape: Shape) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            shape,
            prompt: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Read a string attribute, empty when absent
    pub fn attr_str(&self, key: &str) -> String {
        match self.attributes.get(key) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => String::new(),
        }
    }

    /// Read an integer attribute
    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(JsonValue::Number(n)) => n.as_i64(),
            Some(JsonValue::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read a boolean attribute; `"true"` strings count
    pub fn attr_bool(&self, key: &str) -> bool {
        match self.attributes.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => s == "true",
            _ => false,
        }
    }
}

/// A directed edge between two stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,

    /// Display label; for human gates this is the offered choice
    pub label: String,

    /// Boolean expression gating this edge; empty means unconditional
    pub condition: String,

    /// Author preference; higher wins, 0 ties break on `to_id`
    pub weight: u32,

    pub attributes: BTreeMap<String, JsonValue>,
}

impl Edge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            label: String::new(),
            condition: String::new(),
            weight: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// The validated pipeline graph the engine interprets
///
/// Stage storage is a `BTreeMap` so iteration order is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub name: String,
    pub stages: BTreeMap<String, Stage>,
    pub edges: Vec<Edge>,
    pub graph_attributes: BTreeMap<String, JsonValue>,
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.insert(stage.id.clone(), stage);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// The graph-level goal string, empty when unset
    pub fn goal(&self) -> String {
        self.graph_attr_str("goal")
    }

    pub fn graph_attr_str(&self, key: &str) -> String {
        match self.graph_attributes.get(key) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => String::new(),
        }
    }

    pub fn graph_attr_i64(&self, key: &str) -> Option<i64> {
        match self.graph_attributes.get(key) {
            Some(JsonValue::Number(n)) => n.as_i64(),
            Some(JsonValue::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_stage(&self, id: &str) -> Option<&Stage> {
        self.stages.get(id)
    }

    pub fn start_stage(&self) -> Option<&Stage> {
        self.stages.values().find(|s| s.shape == Shape::Start)
    }

    pub fn exit_stages(&self) -> Vec<&Stage> {
        self.stages.values().filter(|s| s.shape == Shape::Exit).collect()
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from_id == id).collect()
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to_id == id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> PipelineGraph {
        let mut g = PipelineGraph::new("linear");
        g.add_stage(Stage::new("start", Shape::Start));
        g.add_stage(Stage::new("plan", Shape::Codergen).with_prompt("plan it"));
        g.add_stage(Stage::new("done", Shape::Exit));
        g.add_edge(Edge::new("start", "plan"));
        g.add_edge(Edge::new("plan", "done"));
        g
    }

    #[test]
    fn test_start_and_exit_lookup() {
        let g = linear_graph();
        assert_eq!(g.start_stage().unwrap().id, "start");
        let exits = g.exit_stages();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].id, "done");
    }

    #[test]
    fn test_edge_direction_lookup() {
        let g = linear_graph();
        let out = g.outgoing_edges("plan");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_id, "done");

        let inc = g.incoming_edges("plan");
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].from_id, "start");
    }

    #[test]
    fn test_stage_attribute_readers() {
        let stage = Stage::new("s", Shape::Codergen)
            .with_attribute("max_retries", 2)
            .with_attribute("goal_gate", true)
            .with_attribute("backoff_policy", "patient");

        assert_eq!(stage.attr_i64("max_retries"), Some(2));
        assert!(stage.attr_bool("goal_gate"));
        assert_eq!(stage.attr_str("backoff_policy"), "patient");
        assert_eq!(stage.attr_str("missing"), "");
    }

    #[test]
    fn test_label_defaults_to_id() {
        let stage = Stage::new("critic", Shape::Codergen);
        assert_eq!(stage.label, "critic");
    }
}
