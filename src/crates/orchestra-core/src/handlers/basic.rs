//! Start, exit, and conditional handlers

use async_trait::async_trait;

use super::NodeHandler;
use crate::model::{Context, Outcome, PipelineGraph, Stage};

/// Entry stage; does no work
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn handle(&self, _stage: &Stage, _context: &Context, _graph: &PipelineGraph) -> Outcome {
        Outcome::success()
    }
}

/// Terminal stage; does no work
pub struct ExitHandler;

#[async_trait]
impl NodeHandler for ExitHandler {
    async fn handle(&self, _stage: &Stage, _context: &Context, _graph: &PipelineGraph) -> Outcome {
        Outcome::success()
    }
}

/// Pure routing stage
///
/// Conditionals carry no behavior of their own; the outgoing edge
/// conditions evaluated by the selector do the branching.
pub struct ConditionalHandler;

#[async_trait]
impl NodeHandler for ConditionalHandler {
    async fn handle(&self, stage: &Stage, _context: &Context, _graph: &PipelineGraph) -> Outcome {
        Outcome::success().with_notes(format!("conditional '{}'", stage.id))
    }
}
