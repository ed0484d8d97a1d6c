//! Report generation - the terminal model call over condensed evidence

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::compress::truncate_chars;
use crate::error::{ModelError, SeerError};
use crate::message::Message;
use crate::model::{generate_checked, FinishReason, ModelResponse};
use crate::prompts;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{RunState, Stage};

/// Citation numbers in `report` that do not refer to one of the `count`
/// numbered findings. Citations look like `[3]`.
pub fn unknown_citations(report: &str, count: usize) -> Vec<usize> {
    let mut unknown = BTreeSet::new();
    let mut rest = report;

    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        let inner = &rest[..close];
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = inner.parse::<usize>() {
                if n == 0 || n > count {
                    unknown.insert(n);
                }
            }
        }
    }
    unknown.into_iter().collect()
}

fn require_text(response: &ModelResponse) -> Result<(), ModelError> {
    match response {
        ModelResponse::FinalAnswer { content, .. } if !content.trim().is_empty() => Ok(()),
        ModelResponse::FinalAnswer { .. } => Err(ModelError::Malformed {
            message: "empty report".into(),
        }),
        ModelResponse::ToolCall(call) => Err(ModelError::Malformed {
            message: format!("report call requested tool '{}'", call.name),
        }),
    }
}

/// Runs the `ReportGeneration` stage
#[derive(Debug, Default)]
pub struct ReportStage;

#[async_trait]
impl StageRunner for ReportStage {
    fn stage(&self) -> Stage {
        Stage::ReportGeneration
    }

    #[instrument(skip_all, fields(run_id = %state.id))]
    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError> {
        let brief = state
            .brief
            .as_ref()
            .ok_or_else(|| SeerError::fatal(Stage::ReportGeneration, "no research brief"))?;
        if state.condensed.is_empty() {
            return Err(SeerError::fatal(Stage::ReportGeneration, "no condensed findings"));
        }

        let max_chars = ctx.config.max_report_chars;
        let mut messages = vec![Message::user(prompts::report_prompt(
            brief,
            &state.condensed,
            max_chars,
        ))];
        let mut parts: Vec<String> = Vec::new();

        loop {
            let response = generate_checked(
                ctx.model.as_ref(),
                &messages,
                &[],
                ctx.config.report_model(),
                ctx.config.model_retries,
                require_text,
            )
            .await
            .and_then(|response| match response {
                ModelResponse::FinalAnswer { content, finish } => Ok((content, finish)),
                ModelResponse::ToolCall(call) => Err(ModelError::Malformed {
                    message: format!("report call requested tool '{}'", call.name),
                }),
            });

            let (content, finish) = match response {
                Ok(answer) => answer,
                Err(e) => {
                    if !parts.is_empty() {
                        state.partial_report = Some(truncate_chars(&parts.concat(), max_chars));
                    }
                    return Err(SeerError::fatal(Stage::ReportGeneration, e.to_string()));
                }
            };

            parts.push(content.clone());
            let more = finish == FinishReason::Length
                && parts.len() < ctx.config.max_report_parts as usize
                && parts.iter().map(|p| p.chars().count()).sum::<usize>() < max_chars;
            if !more {
                break;
            }
            messages.push(Message::assistant(content));
            messages.push(Message::user(prompts::REPORT_CONTINUE));
        }

        let report = truncate_chars(&parts.concat(), max_chars);
        let unknown = unknown_citations(&report, state.condensed.len());
        if !unknown.is_empty() {
            warn!(citations = ?unknown, "Report cites findings that do not exist");
        }
        info!(parts = parts.len(), chars = report.chars().count(), "Report generated");

        state.messages.append(Message::assistant(report.clone()));
        state.report = Some(report);
        Ok(Transition::Advance(Stage::Done))
    }
}
