//! Stage handlers
//!
//! One handler per stage shape, dispatched through a registry the runner
//! consults. Handlers read the context and return an [`Outcome`]; the
//! runner owns applying updates and routing.

pub mod basic;
pub mod codergen;
pub mod fan_in;
pub mod interactive;
pub mod parallel;
pub mod tool;
pub mod wait_human;
pub mod workspace_port;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::backend::{CodergenBackend, ConversationalBackend, OnTurnCallback, SimulationBackend};
use crate::config::OrchestraConfig;
use crate::events::EventDispatcher;
use crate::interviewer::{AutoApproveInterviewer, Interviewer};
use crate::model::{Context, Outcome, PipelineGraph, Shape, Stage};

pub use workspace_port::{Workspace, WorktreeMergeSummary};

/// Executes one stage shape
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, stage: &Stage, context: &Context, graph: &PipelineGraph) -> Outcome;
}

/// Shape → handler dispatch table
///
/// Registration uses interior mutability so the parallel handler can hold
/// the same registry it is registered in.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Shape, Arc<dyn NodeHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, shape: Shape, handler: Arc<dyn NodeHandler>) {
        self.handlers.write().unwrap().insert(shape, handler);
    }

    pub fn get(&self, shape: Shape) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.read().unwrap().get(&shape).cloned()
    }
}

/// Collaborators the default registry wires into handlers
#[derive(Default)]
pub struct RegistryDeps {
    pub backend: Option<Arc<dyn CodergenBackend>>,
    pub conversational: Option<Arc<dyn ConversationalBackend>>,
    pub interviewer: Option<Arc<dyn Interviewer>>,
    pub workspace: Option<Arc<dyn Workspace>>,
    pub dispatcher: EventDispatcher,
    pub config: Arc<OrchestraConfig>,
    pub on_turn: Option<OnTurnCallback>,
    pub pipeline_dir: Option<PathBuf>,
}

/// Build the registry with one handler per shape
pub fn default_registry(deps: RegistryDeps) -> Arc<HandlerRegistry> {
    let registry = Arc::new(HandlerRegistry::new());

    let backend = deps
        .backend
        .unwrap_or_else(|| Arc::new(SimulationBackend::new()));

    registry.register(Shape::Start, Arc::new(basic::StartHandler));
    registry.register(Shape::Exit, Arc::new(basic::ExitHandler));
    registry.register(Shape::Conditional, Arc::new(basic::ConditionalHandler));

    let codergen = Arc::new(codergen::CodergenHandler::new(
        backend.clone(),
        deps.config.clone(),
        deps.on_turn.clone(),
        deps.pipeline_dir.clone(),
    ));
    registry.register(Shape::Codergen, codergen.clone());

    match (&deps.conversational, &deps.interviewer) {
        (Some(conversational), Some(interviewer)) => {
            registry.register(
                Shape::InteractiveBox,
                Arc::new(interactive::InteractiveHandler::new(
                    conversational.clone(),
                    interviewer.clone(),
                    deps.config.clone(),
                    deps.pipeline_dir.clone(),
                )),
            );
        }
        // Without a conversation channel, interactive stages degrade to a
        // single codergen turn
        _ => registry.register(Shape::InteractiveBox, codergen),
    }

    registry.register(
        Shape::Tool,
        Arc::new(tool::ToolHandler::new(deps.workspace.clone())),
    );

    let interviewer: Arc<dyn Interviewer> = deps
        .interviewer
        .unwrap_or_else(|| Arc::new(AutoApproveInterviewer));
    registry.register(
        Shape::HumanGate,
        Arc::new(wait_human::WaitHumanHandler::new(interviewer)),
    );

    registry.register(
        Shape::ParallelFanOut,
        Arc::new(parallel::ParallelHandler::new(
            registry.clone(),
            deps.dispatcher.clone(),
            deps.workspace.clone(),
        )),
    );
    registry.register(
        Shape::ParallelFanIn,
        Arc::new(fan_in::FanInHandler::new(Some(backend), deps.workspace)),
    );

    registry
}
