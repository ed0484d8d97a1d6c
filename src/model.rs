//! Model capability and call helpers

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ModelError;
use crate::message::{Message, ToolCallRequest};
use crate::tools::ToolSpec;

/// Per-call model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider-qualified model identifier
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "openai:gpt-4.1".into(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Why the model stopped producing text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    /// Output hit the token limit and may be continued
    Length,
}

/// Result of one model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
    FinalAnswer { content: String, finish: FinishReason },
    ToolCall(ToolCallRequest),
}

impl ModelResponse {
    pub fn answer(content: impl Into<String>) -> Self {
        ModelResponse::FinalAnswer {
            content: content.into(),
            finish: FinishReason::Stop,
        }
    }
}

/// The language-model capability
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        config: &ModelConfig,
    ) -> Result<ModelResponse, ModelError>;
}

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Call the model, retrying failed calls up to `retries` extra times
pub async fn generate_with_retry(
    model: &dyn ModelClient,
    messages: &[Message],
    tools: &[ToolSpec],
    config: &ModelConfig,
    retries: u32,
) -> Result<ModelResponse, ModelError> {
    generate_checked(model, messages, tools, config, retries, |_| Ok(())).await
}

/// Like [`generate_with_retry`], but a response rejected by `check` counts
/// as a failed attempt and is retried too.
pub async fn generate_checked<F>(
    model: &dyn ModelClient,
    messages: &[Message],
    tools: &[ToolSpec],
    config: &ModelConfig,
    retries: u32,
    check: F,
) -> Result<ModelResponse, ModelError>
where
    F: Fn(&ModelResponse) -> Result<(), ModelError>,
{
    let mut attempt = 0;
    loop {
        let result = model
            .generate(messages, tools, config)
            .await
            .and_then(|response| check(&response).map(|()| response));

        match result {
            Ok(response) => return Ok(response),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(error = %e, attempt, "Model call failed, retrying");
                match e {
                    ModelError::RateLimited { retry_after_secs } => {
                        tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    }
                    ModelError::Malformed { .. } => {}
                    _ => tokio::time::sleep(RETRY_BACKOFF * attempt).await,
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Call the model without tools and parse its answer as JSON into `T`.
///
/// Malformed answers (tool calls, unparseable text) count as failed attempts
/// and are retried like transport errors.
pub async fn generate_structured<T: DeserializeOwned>(
    model: &dyn ModelClient,
    messages: &[Message],
    config: &ModelConfig,
    retries: u32,
) -> Result<T, ModelError> {
    let response = generate_checked(model, messages, &[], config, retries, |response| {
        match response {
            ModelResponse::FinalAnswer { content, .. } => parse_json_answer::<T>(content).map(|_| ()),
            ModelResponse::ToolCall(call) => Err(ModelError::Malformed {
                message: format!("expected a structured answer, got tool call '{}'", call.name),
            }),
        }
    })
    .await?;

    match response {
        ModelResponse::FinalAnswer { content, .. } => parse_json_answer(&content),
        ModelResponse::ToolCall(call) => Err(ModelError::Malformed {
            message: format!("expected a structured answer, got tool call '{}'", call.name),
        }),
    }
}

/// Parse a JSON object out of model text, tolerating code fences and prose
/// around the object.
pub fn parse_json_answer<T: DeserializeOwned>(content: &str) -> Result<T, ModelError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => {
            return Err(ModelError::Malformed {
                message: "no JSON object in answer".into(),
            })
        }
    };
    serde_json::from_str(body).map_err(|e| ModelError::Malformed {
        message: e.to_string(),
    })
}
