//! Core data model: graph, context, outcomes, agent turns

pub mod agent_turn;
pub mod context;
pub mod graph;
pub mod outcome;

pub use agent_turn::{AgentTurn, TokenUsage, ToolCall};
pub use context::Context;
pub use graph::{Edge, PipelineGraph, Shape, Stage};
pub use outcome::{Outcome, OutcomeStatus};
