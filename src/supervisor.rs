//! Supervisor - fans a research brief out into concurrent workers, one
//! delegation round per stage step
//!
//! Each round dispatches the outstanding sub-questions as independent tasks,
//! waits for all of them or the round deadline (whichever is first), merges
//! the findings of finished tasks and asks a [`SufficiencyJudge`] whether
//! another round is needed.
//!
//! Workers never see the run state. The supervisor is its only writer during
//! a round and checkpoints after every task that finishes, so a resumed run
//! does not redo tasks whose outcome is already persisted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::channel::RunEvent;
use crate::error::SeerError;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{Finding, ResearchBrief, ResearchTask, RunState, Stage, SubQuestion, TaskStatus};
use crate::types::TaskId;
use crate::worker::{ResearchWorker, WorkerLimits, WorkerOutcome, WorkerState};

/// Failure reason recorded for tasks cut off by the round deadline
pub const TIMEOUT_REASON: &str = "timeout";

/// What the judge sees after a round's fan-in
pub struct RoundReview<'a> {
    pub brief: &'a ResearchBrief,
    /// Completed rounds, including the one just finished
    pub round: u32,
    pub max_rounds: u32,
    /// Sub-questions dispatched in the round just finished
    pub dispatched: &'a [SubQuestion],
    pub tasks: &'a BTreeMap<TaskId, ResearchTask>,
    pub findings: &'a BTreeMap<TaskId, Finding>,
}

/// Judge's decision after a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The brief is answered; move on to compression
    Complete,
    /// Run another round with these sub-questions. Text matching an existing
    /// sub-question reuses its task id.
    Continue(Vec<String>),
}

/// Decides whether the brief is sufficiently answered
#[async_trait]
pub trait SufficiencyJudge: Send + Sync {
    async fn judge(&self, review: &RoundReview<'_>) -> Verdict;
}

/// Complete once every sub-question has a full (non-partial) finding;
/// otherwise re-asks the unanswered ones verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoverageJudge;

#[async_trait]
impl SufficiencyJudge for CoverageJudge {
    async fn judge(&self, review: &RoundReview<'_>) -> Verdict {
        let mut seen = HashSet::new();
        let unanswered: Vec<String> = review
            .brief
            .sub_questions
            .iter()
            .chain(review.dispatched.iter())
            .filter(|q| seen.insert(q.id))
            .filter(|q| review.findings.get(&q.id).map_or(true, |f| f.partial))
            .map(|q| q.text.clone())
            .collect();

        if unanswered.is_empty() {
            Verdict::Complete
        } else {
            Verdict::Continue(unanswered)
        }
    }
}

/// Runs the `Supervising` stage
pub struct Supervisor {
    judge: Arc<dyn SufficiencyJudge>,
}

impl Supervisor {
    pub fn new(judge: Arc<dyn SufficiencyJudge>) -> Self {
        Self { judge }
    }

    /// Mark the round's tasks running, skipping ones already finished in this
    /// round (resumed after a crash). Returns the sub-questions to dispatch.
    fn prepare_round(state: &mut RunState, questions: &[SubQuestion]) -> Vec<SubQuestion> {
        let round = state.round;
        let mut dispatch = Vec::new();

        for question in questions {
            let task = state
                .tasks
                .entry(question.id)
                .or_insert_with(|| ResearchTask::new(question, round));

            if task.round == round && task.status.is_finished() && task.attempts > 0 {
                info!(task_id = %task.id, "Outcome already persisted, not re-dispatching");
                continue;
            }

            task.round = round;
            task.question = question.text.clone();
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.result = None;
            task.failure = None;
            dispatch.push(question.clone());
        }
        dispatch
    }

    /// Store a worker's finding on its task. Returns the task's new status,
    /// or `None` if the outcome was dropped.
    fn record(state: &mut RunState, outcome: WorkerOutcome) -> Option<TaskStatus> {
        let Some(task) = state.tasks.get_mut(&outcome.task_id) else {
            warn!(task_id = %outcome.task_id, "Outcome for unknown task dropped");
            return None;
        };
        if task.status != TaskStatus::Running {
            warn!(task_id = %task.id, status = ?task.status, "Outcome for task not running dropped");
            return None;
        }
        if outcome.state == WorkerState::Exhausted {
            info!(task_id = %task.id, "Task finished with a partial finding");
        }
        task.complete(outcome.finding);
        Some(task.status)
    }

    async fn checkpoint(state: &RunState, ctx: &StageContext) {
        if let Err(e) = ctx.store.save(state.id, state).await {
            warn!(run_id = %state.id, error = %e, "Mid-round checkpoint failed");
        }
    }

    /// Dispatch workers and collect their outcomes until all finish or the
    /// round deadline passes. Tasks still running afterwards are failed.
    async fn fan_out(&self, state: &mut RunState, ctx: &StageContext, dispatch: Vec<SubQuestion>) {
        let objective = state.brief.as_ref().map(|b| b.objective.clone());
        let limits = WorkerLimits {
            max_calls: ctx.config.max_tool_calls,
            model_retries: ctx.config.model_retries,
            tool_retries: ctx.config.tool_retries,
        };
        let permits = Arc::new(Semaphore::new(ctx.config.max_concurrent_workers));
        let mut workers = JoinSet::new();

        for question in dispatch {
            let worker = ResearchWorker::new(
                question.id,
                question.text,
                objective.as_deref(),
                Arc::clone(&ctx.model),
                Arc::clone(&ctx.tools),
                ctx.config.model.clone(),
                limits,
            );
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                worker.run().await
            });
        }

        let deadline = tokio::time::Instant::now() + ctx.config.round_timeout();
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    let task_id = outcome.task_id;
                    if let Some(status) = Self::record(state, outcome) {
                        ctx.events.emit(RunEvent::TaskFinished {
                            run_id: state.id,
                            task_id,
                            status,
                        });
                        Self::checkpoint(state, ctx).await;
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(run_id = %state.id, error = %e, "Research worker aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    workers.shutdown().await;
                    break;
                }
            }
        }

        let round = state.round;
        let mut cut_off = Vec::new();
        for task in state.tasks.values_mut() {
            if task.round != round || task.status != TaskStatus::Running {
                continue;
            }
            if timed_out {
                warn!(run_id = %state.id, "{}", SeerError::WorkerTimeout { task_id: task.id });
                task.fail(TIMEOUT_REASON);
            } else {
                task.fail("worker aborted");
            }
            cut_off.push(task.id);
        }
        for task_id in cut_off {
            ctx.events.emit(RunEvent::TaskFinished {
                run_id: state.id,
                task_id,
                status: TaskStatus::Failed,
            });
        }
    }

    /// Copy findings of the round's finished tasks into the aggregate set
    fn merge_round(state: &mut RunState) -> usize {
        let round = state.round;
        let findings: Vec<Finding> = state
            .round_tasks(round)
            .filter(|t| t.status == TaskStatus::Done)
            .filter_map(|t| t.result.clone())
            .collect();
        let merged = findings.len();
        for finding in findings {
            state.merge_finding(finding);
        }
        merged
    }

    /// Turn judge output into sub-questions, reusing ids for known text
    fn refine(state: &mut RunState, texts: Vec<String>) -> Vec<SubQuestion> {
        let mut seen = HashSet::new();
        let mut questions = Vec::new();
        for text in texts {
            let text = text.trim().to_string();
            if text.is_empty() || !seen.insert(text.clone()) {
                continue;
            }
            let id = match state.find_question(&text) {
                Some(id) => id,
                None => state.allocate_task_id(),
            };
            questions.push(SubQuestion { id, text });
        }
        questions
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(Arc::new(CoverageJudge))
    }
}

#[async_trait]
impl StageRunner for Supervisor {
    fn stage(&self) -> Stage {
        Stage::Supervising
    }

    #[instrument(skip_all, fields(run_id = %state.id, round = state.round))]
    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError> {
        let brief = state
            .brief
            .clone()
            .ok_or_else(|| SeerError::fatal(Stage::Supervising, "no research brief"))?;

        let mut seen = HashSet::new();
        let questions: Vec<SubQuestion> = state
            .outstanding
            .iter()
            .filter(|q| seen.insert(q.id))
            .cloned()
            .collect();
        if questions.is_empty() {
            info!("No outstanding sub-questions");
            return Ok(Transition::Advance(Stage::Compressing));
        }

        let dispatch = Self::prepare_round(state, &questions);
        ctx.events.emit(RunEvent::RoundStarted {
            run_id: state.id,
            round: state.round,
            tasks: dispatch.iter().map(|q| q.id).collect(),
        });
        info!(tasks = dispatch.len(), "Starting delegation round");
        if !dispatch.is_empty() {
            Self::checkpoint(state, ctx).await;
            self.fan_out(state, ctx, dispatch).await;
        }

        let merged = Self::merge_round(state);
        state.round += 1;
        ctx.events.emit(RunEvent::RoundCompleted {
            run_id: state.id,
            round: state.round,
            findings: merged,
        });
        info!(merged, total = state.findings.len(), "Delegation round complete");

        if state.round >= ctx.config.max_rounds {
            info!(max_rounds = ctx.config.max_rounds, "Round limit reached");
            return Ok(Transition::Advance(Stage::Compressing));
        }

        let verdict = {
            let review = RoundReview {
                brief: &brief,
                round: state.round,
                max_rounds: ctx.config.max_rounds,
                dispatched: &questions,
                tasks: &state.tasks,
                findings: &state.findings,
            };
            self.judge.judge(&review).await
        };

        match verdict {
            Verdict::Complete => Ok(Transition::Advance(Stage::Compressing)),
            Verdict::Continue(texts) => {
                let next = Self::refine(state, texts);
                if next.is_empty() {
                    return Ok(Transition::Advance(Stage::Compressing));
                }
                info!(questions = next.len(), "Another delegation round requested");
                state.outstanding = next;
                Ok(Transition::Advance(Stage::Supervising))
            }
        }
    }
}
