//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use seer::prompts;
use seer::{
    CallId, FnProvider, Message, ModelClient, ModelConfig, ModelError, ModelResponse, Role,
    ToolCallRequest, ToolInvoker, ToolOutput, ToolRegistry, ToolSpec,
};

pub const NO_CLARIFICATION: &str =
    r#"{"need_clarification": false, "question": "", "verification": "I will research this now."}"#;

pub const FRANCE_BRIEF: &str = r#"{
    "objective": "Find the capital of France and its population",
    "sub_questions": ["What is the capital of France?", "What is the population of Paris?"],
    "success_criteria": ["names the capital", "gives a population figure"]
}"#;

/// Model fake that recognizes which stage is calling it and answers from
/// per-stage scripts
pub struct ResearchModel {
    clarify: Mutex<VecDeque<String>>,
    brief: String,
    answers: Vec<(String, String)>,
    worker_delay: Duration,
    report: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    worker_calls: Mutex<HashMap<String, u32>>,
    report_calls: AtomicU32,
}

impl ResearchModel {
    pub fn new(brief: &str) -> Self {
        Self {
            clarify: Mutex::new(VecDeque::new()),
            brief: brief.to_string(),
            answers: Vec::new(),
            worker_delay: Duration::ZERO,
            report: Mutex::new(VecDeque::new()),
            worker_calls: Mutex::new(HashMap::new()),
            report_calls: AtomicU32::new(0),
        }
    }

    /// Queue a clarification decision. Once the queue is empty every
    /// request is accepted as given.
    pub fn clarify(self, decision: &str) -> Self {
        self.clarify.lock().push_back(decision.to_string());
        self
    }

    /// Workers asking `question` answer with `answer` after one search.
    /// Questions without an answer keep searching until their budget runs out.
    pub fn answer(mut self, question: &str, answer: &str) -> Self {
        self.answers.push((question.to_string(), answer.to_string()));
        self
    }

    pub fn worker_delay(mut self, delay: Duration) -> Self {
        self.worker_delay = delay;
        self
    }

    /// Queue a report-stage response. Once the queue is empty the report
    /// restates the evidence list.
    pub fn report(self, response: Result<ModelResponse, ModelError>) -> Self {
        self.report.lock().push_back(response);
        self
    }

    pub fn worker_calls(&self, question: &str) -> u32 {
        self.worker_calls.lock().get(question).copied().unwrap_or(0)
    }

    pub fn report_calls(&self) -> u32 {
        self.report_calls.load(Ordering::SeqCst)
    }

    async fn research(&self, messages: &[Message]) -> Result<ModelResponse, ModelError> {
        tokio::time::sleep(self.worker_delay).await;

        let prompt = &messages[0].content;
        let question = prompt
            .rsplit("Your question: ")
            .next()
            .unwrap_or_default()
            .to_string();
        *self.worker_calls.lock().entry(question.clone()).or_default() += 1;

        let observed = messages
            .last()
            .map_or(false, |m| m.role == Role::Tool && !m.is_error);
        let answer = self.answers.iter().find(|(q, _)| *q == question);

        match answer {
            Some((_, answer)) if observed => Ok(ModelResponse::answer(answer.clone())),
            _ => Ok(ModelResponse::ToolCall(ToolCallRequest {
                id: CallId::new(format!("call-{}", messages.len())),
                name: "search".into(),
                arguments: json!({ "query": question }),
            })),
        }
    }

    fn write_report(&self, prompt: &str) -> ModelResponse {
        let evidence: Vec<&str> = prompt
            .lines()
            .filter(|line| line.starts_with('['))
            .collect();
        ModelResponse::answer(format!("Research report\n{}", evidence.join("\n")))
    }
}

#[async_trait]
impl ModelClient for ResearchModel {
    async fn generate(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
        _config: &ModelConfig,
    ) -> Result<ModelResponse, ModelError> {
        let first = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();

        if first.starts_with(prompts::WORKER_INSTRUCTIONS) {
            return self.research(messages).await;
        }
        if last == prompts::CLARIFY_INSTRUCTIONS {
            let decision = self
                .clarify
                .lock()
                .pop_front()
                .unwrap_or_else(|| NO_CLARIFICATION.to_string());
            return Ok(ModelResponse::answer(decision));
        }
        if last == prompts::BRIEF_INSTRUCTIONS {
            return Ok(ModelResponse::answer(self.brief.clone()));
        }
        if first.starts_with("Write the final research report") {
            self.report_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.report.lock().pop_front();
            return scripted.unwrap_or_else(|| Ok(self.write_report(first)));
        }
        Err(ModelError::Malformed {
            message: format!("unexpected prompt: {last}"),
        })
    }
}

/// A `search` tool that echoes its query and counts invocations
pub fn search_tools(calls: Arc<AtomicU32>) -> Arc<dyn ToolInvoker> {
    let provider = FnProvider::new("web").tool(
        ToolSpec::new(
            "search",
            "Search the web",
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        ),
        move |args: Value| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let query = args["query"].as_str().unwrap_or_default().to_string();
                Ok(ToolOutput::text(format!("Top results for {query}")))
            }
        },
    );
    Arc::new(
        ToolRegistry::new()
            .with_provider(Arc::new(provider))
            .expect("single provider"),
    )
}
