//! Instruction templates for each model-backed stage

use crate::state::{CondensedFinding, ResearchBrief};

pub const CLARIFY_INSTRUCTIONS: &str = "\
You are preparing a research assignment. Read the conversation above and decide whether \
the user's request is specific enough to research. Ask for clarification only if the \
request is ambiguous, missing essential scope, or refers to context you do not have. \
Do not ask again about anything the user already answered.

Respond with a single JSON object:
{\"need_clarification\": bool, \"question\": string, \"verification\": string}
- If clarification is needed, put one concise question in \"question\" and leave \"verification\" empty.
- Otherwise leave \"question\" empty and put a one-sentence acknowledgement of what will be researched in \"verification\".";

pub const BRIEF_INSTRUCTIONS: &str = "\
Turn the conversation above into a research brief. Split the request into independent \
sub-questions that can each be answered on their own by a researcher with search tools. \
Do not invent requirements the user did not state.

Respond with a single JSON object:
{\"objective\": string, \"sub_questions\": [string], \"success_criteria\": [string]}";

pub const WORKER_INSTRUCTIONS: &str = "\
You are a research assistant answering exactly one question. Use the available tools to \
gather evidence. Request one tool call at a time. When you have enough evidence, reply \
with a concise final answer that states the facts you found. If a tool returns an error, \
adjust your request instead of repeating it unchanged.";

pub const REPORT_CONTINUE: &str = "Continue the report exactly where you stopped. Do not repeat earlier text.";

/// Opening message for a research worker
pub fn worker_prompt(question: &str, objective: Option<&str>) -> String {
    match objective {
        Some(objective) => format!(
            "{WORKER_INSTRUCTIONS}\n\nOverall research objective: {objective}\n\nYour question: {question}"
        ),
        None => format!("{WORKER_INSTRUCTIONS}\n\nYour question: {question}"),
    }
}

/// Final report request listing the numbered evidence
pub fn report_prompt(brief: &ResearchBrief, findings: &[CondensedFinding], max_chars: usize) -> String {
    let mut prompt = format!(
        "Write the final research report.\n\nObjective: {}\n",
        brief.objective
    );

    if !brief.success_criteria.is_empty() {
        prompt.push_str("\nThe report should satisfy:\n");
        for criterion in &brief.success_criteria {
            prompt.push_str(&format!("- {criterion}\n"));
        }
    }

    prompt.push_str("\nEvidence:\n");
    for (i, finding) in findings.iter().enumerate() {
        let marker = if finding.partial { " (incomplete)" } else { "" };
        prompt.push_str(&format!("[{}]{} {}\n", i + 1, marker, finding.summary));
    }

    prompt.push_str(&format!(
        "\nUse only the evidence above and cite it inline by number, e.g. [1]. \
         Do not cite numbers that are not listed. Keep the report under {max_chars} characters."
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    #[test]
    fn test_report_prompt_numbers_findings() {
        let brief = ResearchBrief {
            objective: "find capital and population of France".into(),
            sub_questions: vec![],
            success_criteria: vec!["cite sources".into()],
        };
        let findings = vec![
            CondensedFinding {
                summary: "Paris is the capital.".into(),
                source_tasks: vec![TaskId::new(1)],
                provenance: vec![],
                partial: false,
            },
            CondensedFinding {
                summary: "About 2.1 million people live in Paris.".into(),
                source_tasks: vec![TaskId::new(2)],
                provenance: vec![],
                partial: true,
            },
        ];

        let prompt = report_prompt(&brief, &findings, 500);
        assert!(prompt.contains("[1] Paris is the capital."));
        assert!(prompt.contains("[2] (incomplete) About 2.1 million"));
        assert!(prompt.contains("- cite sources"));
        assert!(prompt.contains("under 500 characters"));
    }

    #[test]
    fn test_worker_prompt_includes_objective() {
        let prompt = worker_prompt("capital of France", Some("France facts"));
        assert!(prompt.ends_with("Your question: capital of France"));
        assert!(prompt.contains("Overall research objective: France facts"));
    }
}
