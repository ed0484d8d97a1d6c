//! Brief synthesis - turns the clarified conversation into a research plan

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::SeerError;
use crate::message::{Message, Role};
use crate::model::generate_structured;
use crate::prompts;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{ResearchBrief, RunState, Stage, SubQuestion};

#[derive(Debug, Deserialize)]
struct BriefDraft {
    #[serde(default)]
    objective: String,
    #[serde(default)]
    sub_questions: Vec<String>,
    #[serde(default)]
    success_criteria: Vec<String>,
}

/// Runs the `BriefSynthesis` stage
#[derive(Debug, Default)]
pub struct BriefStage;

#[async_trait]
impl StageRunner for BriefStage {
    fn stage(&self) -> Stage {
        Stage::BriefSynthesis
    }

    #[instrument(skip_all, fields(run_id = %state.id))]
    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError> {
        let mut messages = state.messages.messages().to_vec();
        messages.push(Message::user(prompts::BRIEF_INSTRUCTIONS));

        let draft: BriefDraft = generate_structured(
            ctx.model.as_ref(),
            &messages,
            &ctx.config.model,
            ctx.config.model_retries,
        )
        .await
        .map_err(|e| SeerError::fatal(Stage::BriefSynthesis, e.to_string()))?;

        let objective = match draft.objective.trim() {
            "" => state
                .messages
                .last_with_role(Role::User)
                .map(|m| m.content.trim().to_string())
                .unwrap_or_default(),
            objective => objective.to_string(),
        };
        if objective.is_empty() {
            return Err(SeerError::fatal(
                Stage::BriefSynthesis,
                "brief has no objective and the request is empty",
            ));
        }

        let mut seen = HashSet::new();
        let mut texts: Vec<String> = draft
            .sub_questions
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty() && seen.insert(q.clone()))
            .collect();
        if texts.is_empty() {
            texts.push(objective.clone());
        }

        let sub_questions: Vec<SubQuestion> = texts
            .into_iter()
            .map(|text| SubQuestion {
                id: state.allocate_task_id(),
                text,
            })
            .collect();

        info!(
            objective = %objective,
            sub_questions = sub_questions.len(),
            "Research brief synthesized"
        );

        state.outstanding = sub_questions.clone();
        state.brief = Some(ResearchBrief {
            objective,
            sub_questions,
            success_criteria: draft
                .success_criteria
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        });
        Ok(Transition::Advance(Stage::Supervising))
    }
}
