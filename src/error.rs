//! Seer error types

use thiserror::Error;

use crate::state::Stage;
use crate::types::{RunId, TaskId};

/// Errors raised by tool invocation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// No registered provider exposes this tool
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Arguments did not match what the tool expects
    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// Failure that may succeed when retried (rate limit, network blip)
    #[error("Tool '{name}' failed transiently: {message}")]
    Transient { name: String, message: String },

    /// Permanent failure
    #[error("Tool '{name}' failed: {message}")]
    Failed { name: String, message: String },

    /// Two providers claim the same tool name
    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },
}

impl ToolError {
    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient { .. })
    }
}

/// Errors raised by the model capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model request failed: {message}")]
    Request { message: String },

    /// The response could not be interpreted
    #[error("Malformed model response: {message}")]
    Malformed { message: String },

    #[error("Rate limited by model provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors raised by checkpoint storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while orchestrating a research run
#[derive(Debug, Error)]
pub enum SeerError {
    /// Tool error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Storage error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A research task was still running when its round deadline passed
    #[error("Worker for {task_id} timed out")]
    WorkerTimeout { task_id: TaskId },

    /// A single-point stage failed irrecoverably
    #[error("Run failed during {stage:?}: {message}")]
    RunFatal { stage: Stage, message: String },

    /// No checkpoint exists for this run
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Attempted stage change is not in the transition table
    #[error("Invalid stage transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    /// User input was supplied to a run that is not waiting for it
    #[error("Run is not awaiting input (stage {0:?})")]
    NotAwaitingInput(Stage),

    /// The run already reached Done or Failed
    #[error("Run already terminated in {0:?}")]
    RunTerminated(Stage),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SeerError {
    pub(crate) fn fatal(stage: Stage, message: impl Into<String>) -> Self {
        SeerError::RunFatal {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = ToolError::Transient {
            name: "search".into(),
            message: "503".into(),
        };
        let permanent = ToolError::Failed {
            name: "search".into(),
            message: "bad query".into(),
        };
        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SeerError::fatal(Stage::ReportGeneration, "model unavailable");
        assert_eq!(
            err.to_string(),
            "Run failed during ReportGeneration: model unavailable"
        );

        let err: SeerError = ToolError::UnknownTool {
            name: "fetch".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Tool error: Unknown tool: fetch");
    }
}
