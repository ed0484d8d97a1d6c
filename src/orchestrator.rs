//! Main orchestrator - drives a run through the stage graph

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::brief::BriefStage;
use crate::channel::{EventSink, RunChannel, RunEvent};
use crate::clarify::ClarifyStage;
use crate::compress::CompressionStage;
use crate::config::SeerConfig;
use crate::error::SeerError;
use crate::message::{Message, Role};
use crate::model::ModelClient;
use crate::report::ReportStage;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{RunFailure, RunState, Stage};
use crate::store::CheckpointStore;
use crate::supervisor::{SufficiencyJudge, Supervisor};
use crate::tools::ToolInvoker;
use crate::types::RunId;

/// Where a run stopped
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Report produced
    Completed {
        run_id: RunId,
        report: String,
        state: Box<RunState>,
    },
    /// Suspended until the user answers `question`; continue with
    /// [`Orchestrator::resume`]
    NeedsInput { run_id: RunId, question: String },
    /// Unrecoverable failure, with the last state for diagnostics
    Failed {
        run_id: RunId,
        failure: RunFailure,
        partial_report: Option<String>,
        state: Box<RunState>,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> RunId {
        match self {
            RunOutcome::Completed { run_id, .. }
            | RunOutcome::NeedsInput { run_id, .. }
            | RunOutcome::Failed { run_id, .. } => *run_id,
        }
    }
}

/// The research orchestrator
///
/// Owns one runner per stage and the capabilities they share. Runs are
/// independent; one orchestrator can serve many.
pub struct Orchestrator {
    ctx: StageContext,
    clarify: ClarifyStage,
    brief: BriefStage,
    supervisor: Supervisor,
    compress: CompressionStage,
    report: ReportStage,
}

impl Orchestrator {
    /// Create an orchestrator. Fails if the configuration is invalid.
    pub fn new(
        config: SeerConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolInvoker>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, SeerError> {
        Self::with_events(config, model, tools, store, EventSink::disabled())
    }

    /// Create an orchestrator and return a channel carrying its events
    pub fn with_channel(
        config: SeerConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolInvoker>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<(Self, RunChannel), SeerError> {
        let (channel, sink) = RunChannel::new();
        let orchestrator = Self::with_events(config, model, tools, store, sink)?;
        Ok((orchestrator, channel))
    }

    fn with_events(
        config: SeerConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolInvoker>,
        store: Arc<dyn CheckpointStore>,
        events: EventSink,
    ) -> Result<Self, SeerError> {
        config.validate()?;
        Ok(Self {
            ctx: StageContext {
                config: Arc::new(config),
                model,
                tools,
                store,
                events,
            },
            clarify: ClarifyStage,
            brief: BriefStage,
            supervisor: Supervisor::default(),
            compress: CompressionStage,
            report: ReportStage,
        })
    }

    /// Replace the judge deciding when supervision is finished
    pub fn with_judge(mut self, judge: Arc<dyn SufficiencyJudge>) -> Self {
        self.supervisor = Supervisor::new(judge);
        self
    }

    pub fn config(&self) -> &SeerConfig {
        &self.ctx.config
    }

    /// Runner handling `stage`; `None` for stages that do no work
    fn runner(&self, stage: Stage) -> Option<&dyn StageRunner> {
        let runners: [&dyn StageRunner; 5] = [
            &self.clarify,
            &self.brief,
            &self.supervisor,
            &self.compress,
            &self.report,
        ];
        runners.into_iter().find(|runner| runner.stage() == stage)
    }

    /// Execute the current stage once.
    ///
    /// Returns the updated state and the stage it now sits in. Stages that
    /// need no work (`AwaitingInput`, terminal) come back unchanged. Errors
    /// move the run to `Failed`. Does not persist and does not touch
    /// timestamps, so the same input state routes the same way.
    #[instrument(skip_all, fields(run_id = %state.id, stage = ?state.stage))]
    pub async fn step(&self, mut state: RunState) -> (RunState, Stage) {
        let current = state.stage;
        let Some(runner) = self.runner(current) else {
            return (state, current);
        };

        self.ctx.events.emit(RunEvent::StageEntered {
            run_id: state.id,
            stage: current,
        });

        match runner.run(&mut state, &self.ctx).await {
            Ok(Transition::Advance(next)) => {
                if let Err(e) = state.advance(next) {
                    error!(error = %e, "Stage produced an invalid transition");
                    state.fail(current, e.to_string());
                }
            }
            Ok(Transition::Suspend { question }) => match state.advance(Stage::AwaitingInput) {
                Ok(()) => self.ctx.events.emit(RunEvent::ClarificationRequested {
                    run_id: state.id,
                    question,
                }),
                Err(e) => {
                    error!(error = %e, "Stage tried to suspend");
                    state.fail(current, e.to_string());
                }
            },
            Err(e) => {
                let stage = match &e {
                    SeerError::RunFatal { stage, .. } => *stage,
                    _ => current,
                };
                error!(error = %e, "Stage failed");
                state.fail(stage, e.to_string());
            }
        }

        match (&state.stage, &state.failure) {
            (Stage::Done, _) => self.ctx.events.emit(RunEvent::RunCompleted { run_id: state.id }),
            (Stage::Failed, Some(failure)) => self.ctx.events.emit(RunEvent::RunFailed {
                run_id: state.id,
                stage: failure.stage,
                message: failure.message.clone(),
            }),
            _ => {}
        }

        let next = state.stage;
        (state, next)
    }

    /// Start a new run from the user's first message
    #[instrument(skip_all)]
    pub async fn start(&self, message: impl Into<String>) -> Result<RunOutcome, SeerError> {
        let mut state = RunState::new();
        info!(run_id = %state.id, "Starting research run");
        self.ctx.events.emit(RunEvent::RunStarted { run_id: state.id });

        Self::accept_input(&mut state, message.into())?;
        self.checkpoint(&mut state).await?;
        self.drive(state).await
    }

    /// Continue a persisted run.
    ///
    /// A run suspended in `AwaitingInput` needs `message`; without one the
    /// pending question is returned again. A run interrupted elsewhere (for
    /// example by a process restart) continues from its last checkpoint and
    /// must not be given a message.
    #[instrument(skip(self, message))]
    pub async fn resume(&self, run_id: RunId, message: Option<String>) -> Result<RunOutcome, SeerError> {
        let mut state = self.load(run_id).await?;

        if state.stage.is_terminal() {
            return Err(SeerError::RunTerminated(state.stage));
        }

        match (state.stage, message) {
            (Stage::AwaitingInput, Some(message)) => {
                info!(run_id = %run_id, "Resuming with user input");
                Self::accept_input(&mut state, message)?;
                self.checkpoint(&mut state).await?;
            }
            (Stage::AwaitingInput, None) => return Ok(Self::outcome(state)),
            (stage, Some(_)) => return Err(SeerError::NotAwaitingInput(stage)),
            (stage, None) => {
                info!(run_id = %run_id, stage = ?stage, "Resuming from checkpoint");
            }
        }

        self.drive(state).await
    }

    /// Fetch a run's last checkpoint
    pub async fn load(&self, run_id: RunId) -> Result<RunState, SeerError> {
        self.ctx
            .store
            .load(run_id)
            .await?
            .ok_or(SeerError::RunNotFound(run_id))
    }

    /// Step and checkpoint until the run suspends or terminates
    pub async fn drive(&self, mut state: RunState) -> Result<RunOutcome, SeerError> {
        while state.stage != Stage::AwaitingInput && !state.stage.is_terminal() {
            let (next_state, next) = self.step(state).await;
            state = next_state;
            self.checkpoint(&mut state).await?;
            info!(run_id = %state.id, stage = ?next, "Stage boundary");
        }
        Ok(Self::outcome(state))
    }

    fn accept_input(state: &mut RunState, message: String) -> Result<(), SeerError> {
        if state.stage != Stage::AwaitingInput {
            return Err(SeerError::NotAwaitingInput(state.stage));
        }
        state.messages.append(Message::user(message));
        state.advance(Stage::Clarifying)
    }

    async fn checkpoint(&self, state: &mut RunState) -> Result<(), SeerError> {
        state.touch();
        self.ctx.store.save(state.id, state).await.map_err(|e| {
            warn!(run_id = %state.id, error = %e, "Checkpoint failed");
            SeerError::from(e)
        })
    }

    fn outcome(state: RunState) -> RunOutcome {
        let run_id = state.id;
        match state.stage {
            Stage::Done => RunOutcome::Completed {
                run_id,
                report: state.report.clone().unwrap_or_default(),
                state: Box::new(state),
            },
            Stage::Failed => RunOutcome::Failed {
                run_id,
                failure: state.failure.clone().unwrap_or(RunFailure {
                    stage: Stage::Failed,
                    message: "unknown failure".into(),
                }),
                partial_report: state.partial_report.clone(),
                state: Box::new(state),
            },
            _ => RunOutcome::NeedsInput {
                run_id,
                question: state
                    .messages
                    .last_with_role(Role::Assistant)
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            },
        }
    }
}
