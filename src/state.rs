//! Run state - the orchestration-wide record persisted at every stage boundary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SeerError;
use crate::message::MessageLog;
use crate::types::{CallId, RunId, TaskId};

/// Workflow stage. Closed set; routing always names one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingInput,
    Clarifying,
    BriefSynthesis,
    Supervising,
    Compressing,
    ReportGeneration,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether `self -> to` is in the transition table.
    ///
    /// Once a brief exists the run may never return to `AwaitingInput` or
    /// `Clarifying`.
    pub fn can_transition_to(&self, to: Stage, has_brief: bool) -> bool {
        use Stage::*;

        if has_brief && matches!(to, AwaitingInput | Clarifying) {
            return false;
        }
        match (self, to) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (AwaitingInput, Clarifying) => true,
            (Clarifying, AwaitingInput | BriefSynthesis) => true,
            (BriefSynthesis, Supervising) => true,
            (Supervising, Supervising | Compressing) => true,
            (Compressing, ReportGeneration) => true,
            (ReportGeneration, Done) => true,
            _ => false,
        }
    }
}

/// One sub-question of the research brief
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: TaskId,
    pub text: String,
}

/// Structured research plan derived from the clarified request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub objective: String,
    pub sub_questions: Vec<SubQuestion>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// A tool call that contributed evidence to a finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub call_id: CallId,
    pub tool: String,
    pub arguments: Value,
}

/// A worker's answer to one sub-question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub task_id: TaskId,
    pub summary: String,
    pub provenance: Vec<Provenance>,
    /// Built from an exhausted transcript rather than a final answer
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// One sub-question assigned to a research worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTask {
    /// Same id as the sub-question it answers
    pub id: TaskId,
    /// Sub-question text as last dispatched
    pub question: String,
    pub status: TaskStatus,
    /// Delegation round the task was last dispatched in
    pub round: u32,
    /// Times the task has been dispatched
    pub attempts: u32,
    /// Finding of the last successful attempt
    #[serde(default)]
    pub result: Option<Finding>,
    /// Failure reason, e.g. `timeout`
    #[serde(default)]
    pub failure: Option<String>,
}

impl ResearchTask {
    pub fn new(question: &SubQuestion, round: u32) -> Self {
        Self {
            id: question.id,
            question: question.text.clone(),
            status: TaskStatus::Pending,
            round,
            attempts: 0,
            result: None,
            failure: None,
        }
    }

    pub fn complete(&mut self, finding: Finding) {
        self.status = TaskStatus::Done;
        self.result = Some(finding);
        self.failure = None;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.failure = Some(reason.into());
    }
}

/// Deduplicated finding ready for report synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedFinding {
    pub summary: String,
    /// Every task whose finding was folded into this one, ascending
    pub source_tasks: Vec<TaskId>,
    /// Tool calls backing the representative finding
    pub provenance: Vec<Provenance>,
    pub partial: bool,
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub message: String,
}

/// Orchestration-wide state for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier, also the checkpoint key
    pub id: RunId,
    /// Current stage
    pub stage: Stage,
    /// Conversation with the user
    pub messages: MessageLog,
    /// Research plan, set once by brief synthesis
    pub brief: Option<ResearchBrief>,
    /// Sub-questions to dispatch in the current delegation round
    pub outstanding: Vec<SubQuestion>,
    /// Every task ever dispatched
    pub tasks: BTreeMap<TaskId, ResearchTask>,
    /// Aggregate findings, keyed by the task that produced them
    pub findings: BTreeMap<TaskId, Finding>,
    /// Completed delegation rounds
    pub round: u32,
    /// Clarifying questions asked so far
    pub clarifications: u32,
    /// Deduplicated evidence for the report
    pub condensed: Vec<CondensedFinding>,
    /// Final report
    pub report: Option<String>,
    /// Report text gathered before the report stage failed
    pub partial_report: Option<String>,
    /// Set when the run is `Failed`
    pub failure: Option<RunFailure>,
    /// Next id handed out by `allocate_task_id`
    next_task_id: u64,
    pub created_at: DateTime<Utc>,
    /// Last checkpoint time
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new() -> Self {
        Self::with_id(RunId::new())
    }

    pub fn with_id(id: RunId) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: Stage::AwaitingInput,
            messages: MessageLog::new(),
            brief: None,
            outstanding: Vec::new(),
            tasks: BTreeMap::new(),
            findings: BTreeMap::new(),
            round: 0,
            clarifications: 0,
            condensed: Vec::new(),
            report: None,
            partial_report: None,
            failure: None,
            next_task_id: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, enforcing the transition table
    pub fn advance(&mut self, to: Stage) -> Result<(), SeerError> {
        if !self.stage.can_transition_to(to, self.brief.is_some()) {
            return Err(SeerError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    /// Mark the run failed. No-op on an already terminal run.
    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        if self.stage.is_terminal() {
            return;
        }
        self.failure = Some(RunFailure {
            stage,
            message: message.into(),
        });
        self.stage = Stage::Failed;
    }

    pub fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    /// Id of an existing sub-question with exactly this text, if any
    pub fn find_question(&self, text: &str) -> Option<TaskId> {
        let text = text.trim();
        self.brief
            .iter()
            .flat_map(|b| b.sub_questions.iter())
            .find(|q| q.text.trim() == text)
            .map(|q| q.id)
            .or_else(|| {
                self.tasks
                    .values()
                    .find(|t| t.question.trim() == text)
                    .map(|t| t.id)
            })
    }

    /// Merge a finding into the aggregate set.
    ///
    /// Keyed by task id: a finding for an id already present replaces the
    /// earlier one. Returns true if an entry was replaced.
    pub fn merge_finding(&mut self, finding: Finding) -> bool {
        self.findings.insert(finding.task_id, finding).is_some()
    }

    /// Tasks dispatched in the given round
    pub fn round_tasks(&self, round: u32) -> impl Iterator<Item = &ResearchTask> {
        self.tasks.values().filter(move |t| t.round == round)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
