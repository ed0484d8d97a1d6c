//! Clarification - decides whether the request is specific enough to research

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::SeerError;
use crate::message::{Message, Role};
use crate::model::generate_structured;
use crate::prompts;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{RunState, Stage};

const DEFAULT_QUESTION: &str =
    "Could you tell me more about what you would like researched, and what the result should cover?";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClarifyDecision {
    need_clarification: bool,
    question: String,
    verification: String,
}

/// Runs the `Clarifying` stage
#[derive(Debug, Default)]
pub struct ClarifyStage;

impl ClarifyStage {
    fn ask(state: &mut RunState, question: String) -> Transition {
        state.messages.append(Message::assistant(question.clone()));
        state.clarifications += 1;
        info!(run_id = %state.id, clarifications = state.clarifications, "Asking user for clarification");
        Transition::Suspend { question }
    }
}

#[async_trait]
impl StageRunner for ClarifyStage {
    fn stage(&self) -> Stage {
        Stage::Clarifying
    }

    #[instrument(skip_all, fields(run_id = %state.id))]
    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError> {
        let config = &ctx.config;
        if !config.allow_clarification || state.clarifications >= config.max_clarifications {
            return Ok(Transition::Advance(Stage::BriefSynthesis));
        }

        let latest_blank = state
            .messages
            .last_with_role(Role::User)
            .map_or(true, |m| m.content.trim().is_empty());
        if latest_blank {
            return Ok(Self::ask(state, DEFAULT_QUESTION.to_string()));
        }

        let mut messages = state.messages.messages().to_vec();
        messages.push(Message::user(prompts::CLARIFY_INSTRUCTIONS));

        let decision: ClarifyDecision =
            match generate_structured(ctx.model.as_ref(), &messages, &config.model, config.model_retries)
                .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(error = %e, "Clarification check failed, proceeding with the request as given");
                    return Ok(Transition::Advance(Stage::BriefSynthesis));
                }
            };

        if decision.need_clarification {
            let question = match decision.question.trim() {
                "" => DEFAULT_QUESTION.to_string(),
                q => q.to_string(),
            };
            return Ok(Self::ask(state, question));
        }

        let verification = decision.verification.trim();
        if !verification.is_empty() {
            state.messages.append(Message::assistant(verification));
        }
        Ok(Transition::Advance(Stage::BriefSynthesis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventSink;
    use crate::config::SeerConfig;
    use crate::error::ModelError;
    use crate::model::{ModelClient, ModelConfig, ModelResponse};
    use crate::store::MemoryStore;
    use crate::tools::{ToolRegistry, ToolSpec};
    use std::sync::Arc;

    struct Fixed(Result<&'static str, ModelError>);

    #[async_trait]
    impl ModelClient for Fixed {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[ToolSpec],
            _config: &ModelConfig,
        ) -> Result<ModelResponse, ModelError> {
            self.0.clone().map(ModelResponse::answer)
        }
    }

    fn context(reply: Result<&'static str, ModelError>) -> StageContext {
        StageContext {
            config: Arc::new(SeerConfig {
                model_retries: 0,
                ..Default::default()
            }),
            model: Arc::new(Fixed(reply)),
            tools: Arc::new(ToolRegistry::new()),
            store: Arc::new(MemoryStore::new()),
            events: EventSink::disabled(),
        }
    }

    fn request(text: &str) -> RunState {
        let mut state = RunState::new();
        state.messages.append(Message::user(text));
        state.stage = Stage::Clarifying;
        state
    }

    #[tokio::test]
    async fn test_specific_request_proceeds() {
        let ctx = context(Ok(
            r#"{"need_clarification": false, "verification": "Researching the capital of France."}"#,
        ));
        let mut state = request("What is the capital of France?");

        let transition = ClarifyStage.run(&mut state, &ctx).await.unwrap();
        assert_eq!(transition, Transition::Advance(Stage::BriefSynthesis));
        assert_eq!(state.clarifications, 0);
        assert_eq!(
            state.messages.last().unwrap().content,
            "Researching the capital of France."
        );
    }

    #[tokio::test]
    async fn test_ambiguous_request_asks() {
        let ctx = context(Ok(r#"{"need_clarification": true, "question": "About what?"}"#));
        let mut state = request("Tell me about it");

        let transition = ClarifyStage.run(&mut state, &ctx).await.unwrap();
        assert_eq!(
            transition,
            Transition::Suspend {
                question: "About what?".into()
            }
        );
        assert_eq!(state.clarifications, 1);
        assert_eq!(state.messages.last_with_role(Role::Assistant).unwrap().content, "About what?");
    }

    #[tokio::test]
    async fn test_blank_request_asks_without_model() {
        let ctx = context(Err(ModelError::Request {
            message: "should not be called".into(),
        }));
        let mut state = request("   ");

        let transition = ClarifyStage.run(&mut state, &ctx).await.unwrap();
        assert_eq!(
            transition,
            Transition::Suspend {
                question: DEFAULT_QUESTION.into()
            }
        );
    }

    #[tokio::test]
    async fn test_model_failure_proceeds_with_request() {
        let ctx = context(Err(ModelError::Request {
            message: "offline".into(),
        }));
        let mut state = request("What is the capital of France?");

        let transition = ClarifyStage.run(&mut state, &ctx).await.unwrap();
        assert_eq!(transition, Transition::Advance(Stage::BriefSynthesis));
        assert_eq!(state.messages.len(), 1);
    }
}
