//! Stage runner seam shared by every workflow stage

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::EventSink;
use crate::config::SeerConfig;
use crate::error::SeerError;
use crate::model::ModelClient;
use crate::state::{RunState, Stage};
use crate::store::CheckpointStore;
use crate::tools::ToolInvoker;

/// Routing decision produced by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue with the named stage
    Advance(Stage),
    /// Pause the run until the user answers `question`
    Suspend { question: String },
}

/// Capabilities and settings every stage runs against
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<SeerConfig>,
    pub model: Arc<dyn ModelClient>,
    pub tools: Arc<dyn ToolInvoker>,
    pub store: Arc<dyn CheckpointStore>,
    pub events: EventSink,
}

/// Executes one workflow stage against the run state.
///
/// A runner may update `state` freely; the orchestrator applies the returned
/// transition and persists the result. An `Err` fails the run.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Stage this runner handles
    fn stage(&self) -> Stage;

    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError>;
}
