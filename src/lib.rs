//! # Seer
//!
//! Deep research orchestration engine - the seer that looks further.
//!
//! A run takes a user's research request through a fixed pipeline of
//! stages: clarify the request, synthesize a research brief, fan research
//! out to parallel workers, condense what they found and write a cited
//! report. Models, tools and storage are capabilities supplied by the
//! caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           ORCHESTRATOR                               │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────────┐  │
//! │  │  Clarify   │─▶│   Brief    │─▶│ Supervisor │─▶│   Compress   │─▶ Report
//! │  └─────┬──────┘  └────────────┘  └─────┬──────┘  └──────────────┘  │
//! │        │ suspend                       │ rounds                     │
//! │        ▼                               │                            │
//! │  AwaitingInput                         │                            │
//! └────────────────────────────────────────┼────────────────────────────┘
//!                                          │
//!                      ┌───────────────────┼───────────────────┐
//!                      ▼                   ▼                   ▼
//!               ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!               │   Worker    │     │   Worker    │     │   Worker    │
//!               │ think ⇄ tool│     │ think ⇄ tool│     │ think ⇄ tool│
//!               └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **RunState**: Everything about one run, checkpointed at each stage boundary
//! - **Stage**: Where the run is; transitions follow a closed table
//! - **Brief**: The objective and sub-questions research is planned from
//! - **Worker**: A bounded think/act loop answering one sub-question
//! - **Finding**: A worker's answer with the tool calls backing it

pub mod brief;
pub mod channel;
pub mod clarify;
pub mod compress;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod stage;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod tools;
pub mod types;
pub mod worker;

pub use channel::{EventSink, RunChannel, RunEvent};
pub use config::{load_config, SeerConfig};
pub use error::{ModelError, SeerError, StoreError, ToolError};
pub use message::{Message, MessageLog, Role, ToolCallRequest};
pub use model::{FinishReason, ModelClient, ModelConfig, ModelResponse};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use stage::{StageContext, StageRunner, Transition};
pub use state::{
    CondensedFinding, Finding, Provenance, ResearchBrief, ResearchTask, RunFailure, RunState,
    Stage, SubQuestion, TaskStatus,
};
pub use store::{CheckpointStore, JsonFileStore, MemoryStore};
pub use supervisor::{CoverageJudge, RoundReview, SufficiencyJudge, Supervisor, Verdict};
pub use tools::{FnProvider, ToolInvoker, ToolOutput, ToolProvider, ToolRegistry, ToolSpec};
pub use types::{CallId, RunId, TaskId};
pub use worker::{ResearchWorker, WorkerLimits, WorkerOutcome, WorkerState};
