//! Research worker - a bounded tool-use loop answering one sub-question

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{ModelError, ToolError};
use crate::message::{Message, MessageLog, Role, ToolCallRequest};
use crate::model::{generate_checked, ModelClient, ModelConfig, ModelResponse};
use crate::prompts;
use crate::state::{Finding, Provenance};
use crate::tools::{ToolInvoker, ToolSpec};
use crate::types::TaskId;

/// Observations quoted in a partial finding
const PARTIAL_EVIDENCE_LIMIT: usize = 3;

/// Where the worker loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Awaiting a model response
    Thinking,
    /// Awaiting a tool result
    ToolCall,
    /// Model gave a final answer
    Answered,
    /// Budget spent or model unusable
    Exhausted,
}

/// Budgets for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLimits {
    /// Model calls allowed (K)
    pub max_calls: u32,
    pub model_retries: u32,
    pub tool_retries: u32,
}

/// What a worker hands back to the supervisor
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub task_id: TaskId,
    /// `Answered` or `Exhausted`
    pub state: WorkerState,
    pub finding: Finding,
    pub transcript: MessageLog,
    pub model_calls: u32,
    pub tool_calls: u32,
}

/// Answers a single sub-question with tools.
///
/// Owns its transcript; never touches run state. Model and tool steps run
/// strictly in sequence.
pub struct ResearchWorker {
    task_id: TaskId,
    question: String,
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolInvoker>,
    model_config: ModelConfig,
    limits: WorkerLimits,
    state: WorkerState,
    transcript: MessageLog,
    provenance: Vec<Provenance>,
}

impl ResearchWorker {
    pub fn new(
        task_id: TaskId,
        question: impl Into<String>,
        objective: Option<&str>,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolInvoker>,
        model_config: ModelConfig,
        limits: WorkerLimits,
    ) -> Self {
        let question = question.into();
        let mut transcript = MessageLog::new();
        transcript.append(Message::user(prompts::worker_prompt(&question, objective)));

        Self {
            task_id,
            question,
            model,
            tools,
            model_config,
            limits,
            state: WorkerState::Thinking,
            transcript,
            provenance: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the loop to completion
    #[instrument(skip(self), fields(task_id = %self.task_id))]
    pub async fn run(mut self) -> WorkerOutcome {
        let specs = self.tools.specs();
        let mut model_calls = 0;
        let mut tool_calls = 0;
        let mut answer = None;

        while model_calls < self.limits.max_calls {
            self.state = WorkerState::Thinking;
            model_calls += 1;

            match self.think(&specs).await {
                Ok(ModelResponse::FinalAnswer { content, .. }) => {
                    self.transcript.append(Message::assistant(content.clone()));
                    answer = Some(content.trim().to_string());
                    break;
                }
                Ok(ModelResponse::ToolCall(request)) => {
                    self.state = WorkerState::ToolCall;
                    tool_calls += self.call_tool(request).await;
                }
                Err(e) => {
                    warn!(error = %e, "Model unusable, worker exhausted");
                    break;
                }
            }
        }

        let finding = match answer {
            Some(summary) => {
                self.state = WorkerState::Answered;
                info!(model_calls, tool_calls, "Sub-question answered");
                Finding {
                    task_id: self.task_id,
                    summary,
                    provenance: self.provenance.clone(),
                    partial: false,
                }
            }
            None => {
                self.state = WorkerState::Exhausted;
                info!(model_calls, tool_calls, "Worker exhausted without a final answer");
                self.partial_finding()
            }
        };

        WorkerOutcome {
            task_id: self.task_id,
            state: self.state,
            finding,
            transcript: self.transcript,
            model_calls,
            tool_calls,
        }
    }

    async fn think(&self, specs: &[ToolSpec]) -> Result<ModelResponse, ModelError> {
        generate_checked(
            self.model.as_ref(),
            self.transcript.messages(),
            specs,
            &self.model_config,
            self.limits.model_retries,
            |response| match response {
                ModelResponse::FinalAnswer { content, .. } if content.trim().is_empty() => {
                    Err(ModelError::Malformed {
                        message: "empty answer".into(),
                    })
                }
                ModelResponse::ToolCall(call) if call.name.trim().is_empty() => {
                    Err(ModelError::Malformed {
                        message: "tool call without a name".into(),
                    })
                }
                _ => Ok(()),
            },
        )
        .await
    }

    /// Invoke a requested tool and record the observation. Returns the
    /// number of invocations made.
    async fn call_tool(&mut self, request: ToolCallRequest) -> u32 {
        self.transcript.append(Message::tool_request(request.clone()));

        let mut invocations = 0;
        let result = loop {
            invocations += 1;
            match self.tools.invoke(&request.name, &request.arguments).await {
                Err(e) if e.is_transient() && invocations <= self.limits.tool_retries => {
                    debug!(tool = %request.name, error = %e, "Transient tool failure, retrying");
                }
                other => break other,
            }
        };

        match result {
            Ok(output) => {
                debug!(tool = %request.name, "Tool call succeeded");
                self.transcript
                    .append(Message::tool_result(request.id.clone(), output.content));
                self.provenance.push(Provenance {
                    call_id: request.id,
                    tool: request.name,
                    arguments: request.arguments,
                });
            }
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Tool call failed");
                self.transcript
                    .append(Message::tool_error(request.id, observation_for(&e)));
            }
        }
        invocations
    }

    /// Best-effort finding from whatever the transcript holds
    fn partial_finding(&self) -> Finding {
        let observations: Vec<&str> = self
            .transcript
            .iter()
            .filter(|m| m.role == Role::Tool && !m.is_error && !m.content.trim().is_empty())
            .map(|m| m.content.trim())
            .collect();

        let summary = if observations.is_empty() {
            let last_error = self
                .transcript
                .iter()
                .rev()
                .find(|m| m.role == Role::Tool && m.is_error)
                .map(|m| m.content.as_str());
            match last_error {
                Some(error) => format!(
                    "No conclusive evidence found for \"{}\". Last tool error: {}",
                    self.question, error
                ),
                None => format!("No conclusive evidence found for \"{}\".", self.question),
            }
        } else {
            let start = observations.len().saturating_sub(PARTIAL_EVIDENCE_LIMIT);
            let mut summary = format!("Partial evidence for \"{}\":", self.question);
            for observation in &observations[start..] {
                summary.push_str("\n- ");
                summary.push_str(observation);
            }
            summary
        };

        Finding {
            task_id: self.task_id,
            summary,
            provenance: self.provenance.clone(),
            partial: true,
        }
    }
}

fn observation_for(error: &ToolError) -> String {
    format!("error: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnProvider, ToolOutput, ToolRegistry};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed script; records how many messages each call saw
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(
            &self,
            messages: &[Message],
            _tools: &[ToolSpec],
            _config: &ModelConfig,
        ) -> Result<ModelResponse, ModelError> {
            self.seen.lock().push(messages.len());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::ToolCall(search_call("again"))))
        }
    }

    fn search_call(query: &str) -> ToolCallRequest {
        ToolCallRequest::new("search", json!({ "query": query }))
    }

    fn search_tools(calls: Arc<AtomicU32>, fail: bool) -> Arc<dyn ToolInvoker> {
        let provider = FnProvider::new("web").tool(
            ToolSpec::new("search", "web search", json!({"type": "object"})),
            move |args: Value| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        return Err(ToolError::Transient {
                            name: "search".into(),
                            message: "503 service unavailable".into(),
                        });
                    }
                    Ok(ToolOutput::text(format!(
                        "result for {}",
                        args["query"].as_str().unwrap_or_default()
                    )))
                }
            },
        );
        Arc::new(ToolRegistry::new().with_provider(Arc::new(provider)).unwrap())
    }

    fn limits(max_calls: u32) -> WorkerLimits {
        WorkerLimits {
            max_calls,
            model_retries: 1,
            tool_retries: 1,
        }
    }

    fn worker(model: Arc<ScriptedModel>, tools: Arc<dyn ToolInvoker>, max_calls: u32) -> ResearchWorker {
        ResearchWorker::new(
            TaskId::new(1),
            "capital of France",
            None,
            model,
            tools,
            ModelConfig::default(),
            limits(max_calls),
        )
    }

    #[tokio::test]
    async fn test_answers_after_tool_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::ToolCall(search_call("capital of France"))),
            Ok(ModelResponse::answer("Paris")),
        ]);

        let outcome = worker(Arc::clone(&model), search_tools(Arc::clone(&calls), false), 5)
            .run()
            .await;

        assert_eq!(outcome.state, WorkerState::Answered);
        assert_eq!(outcome.finding.summary, "Paris");
        assert!(!outcome.finding.partial);
        assert_eq!(outcome.finding.provenance.len(), 1);
        assert_eq!(outcome.finding.provenance[0].tool, "search");
        assert_eq!(outcome.model_calls, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // prompt, then prompt + request + result
        assert_eq!(*model.seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_transient_tool_failures_exhaust_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let model = ScriptedModel::new(vec![]);

        let outcome = worker(model, search_tools(Arc::clone(&calls), true), 4)
            .run()
            .await;

        assert_eq!(outcome.state, WorkerState::Exhausted);
        assert!(outcome.finding.partial);
        assert!(outcome.finding.provenance.is_empty());
        assert!(outcome.finding.summary.contains("503 service unavailable"));
        assert_eq!(outcome.model_calls, 4);
        // every step retried once
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(outcome.tool_calls, 8);
        let errors = outcome.transcript.iter().filter(|m| m.is_error).count();
        assert_eq!(errors, 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let calls = Arc::new(AtomicU32::new(0));
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::ToolCall(ToolCallRequest::new("browse", json!({})))),
            Ok(ModelResponse::answer("Paris, found without browsing")),
        ]);

        let outcome = worker(model, search_tools(calls, false), 5).run().await;

        assert_eq!(outcome.state, WorkerState::Answered);
        let error = outcome.transcript.iter().find(|m| m.is_error).unwrap();
        assert_eq!(error.content, "error: Unknown tool: browse");
        assert!(outcome.finding.provenance.is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_after_retries_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::ToolCall(search_call("paris"))),
            Ok(ModelResponse::answer("   ")),
            Ok(ModelResponse::answer("")),
        ]);

        let outcome = worker(model, search_tools(calls, false), 5).run().await;

        assert_eq!(outcome.state, WorkerState::Exhausted);
        assert!(outcome.finding.partial);
        assert!(outcome.finding.summary.contains("result for paris"));
        assert_eq!(outcome.finding.provenance.len(), 1);
        assert_eq!(outcome.model_calls, 2);
    }

    #[tokio::test]
    async fn test_partial_finding_keeps_latest_observations() {
        let calls = Arc::new(AtomicU32::new(0));
        let model = ScriptedModel::new(vec![
            Ok(ModelResponse::ToolCall(search_call("a"))),
            Ok(ModelResponse::ToolCall(search_call("b"))),
            Ok(ModelResponse::ToolCall(search_call("c"))),
            Ok(ModelResponse::ToolCall(search_call("d"))),
        ]);

        let outcome = worker(model, search_tools(calls, false), 4).run().await;

        assert_eq!(outcome.state, WorkerState::Exhausted);
        let summary = &outcome.finding.summary;
        assert!(!summary.contains("result for a"));
        assert!(summary.contains("result for b"));
        assert!(summary.contains("result for d"));
        assert_eq!(outcome.finding.provenance.len(), 4);
    }
}
