//! Compression - deduplicates the aggregate findings into a bounded evidence
//! bundle for report generation

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::SeerError;
use crate::stage::{StageContext, StageRunner, Transition};
use crate::state::{CondensedFinding, Finding, RunState, Stage};
use crate::types::TaskId;

struct Cluster<'a> {
    representative: &'a Finding,
    tokens: BTreeSet<String>,
    sources: Vec<TaskId>,
}

/// Lowercased alphanumeric words
fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Truncate to at most `max` chars on a char boundary, marking the cut
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

/// Merge near-duplicate findings.
///
/// Findings are visited in task-id order. Each joins the first cluster whose
/// representative is at least `similarity` alike, otherwise starts a new
/// one. A cluster's representative is the member with the most provenance;
/// ties keep the earliest task id. Output keeps cluster creation order, and
/// summaries are cut to an even share of `max_chars` when the total exceeds
/// it.
pub fn condense(
    findings: &BTreeMap<TaskId, Finding>,
    similarity: f64,
    max_chars: usize,
) -> Vec<CondensedFinding> {
    let mut clusters: Vec<Cluster<'_>> = Vec::new();

    for (task_id, finding) in findings {
        let finding_tokens = tokens(&finding.summary);
        let existing = clusters
            .iter_mut()
            .find(|c| jaccard(&c.tokens, &finding_tokens) >= similarity);

        match existing {
            Some(cluster) => {
                cluster.sources.push(*task_id);
                if finding.provenance.len() > cluster.representative.provenance.len() {
                    cluster.representative = finding;
                    cluster.tokens = finding_tokens;
                }
            }
            None => clusters.push(Cluster {
                representative: finding,
                tokens: finding_tokens,
                sources: vec![*task_id],
            }),
        }
    }

    let total: usize = clusters
        .iter()
        .map(|c| c.representative.summary.chars().count())
        .sum();
    let share = if total > max_chars && !clusters.is_empty() {
        Some(max_chars / clusters.len())
    } else {
        None
    };

    clusters
        .into_iter()
        .map(|cluster| {
            let summary = match share {
                Some(limit) => truncate_chars(&cluster.representative.summary, limit),
                None => cluster.representative.summary.clone(),
            };
            CondensedFinding {
                summary,
                source_tasks: cluster.sources,
                provenance: cluster.representative.provenance.clone(),
                partial: cluster.representative.partial,
            }
        })
        .collect()
}

/// Runs the `Compressing` stage
#[derive(Debug, Default)]
pub struct CompressionStage;

#[async_trait]
impl StageRunner for CompressionStage {
    fn stage(&self) -> Stage {
        Stage::Compressing
    }

    #[instrument(skip_all, fields(run_id = %state.id))]
    async fn run(&self, state: &mut RunState, ctx: &StageContext) -> Result<Transition, SeerError> {
        if state.findings.is_empty() {
            return Err(SeerError::fatal(
                Stage::Compressing,
                "no research task produced a finding",
            ));
        }

        state.condensed = condense(
            &state.findings,
            ctx.config.dedup_similarity,
            ctx.config.max_evidence_chars,
        );
        info!(
            findings = state.findings.len(),
            condensed = state.condensed.len(),
            "Findings condensed"
        );
        Ok(Transition::Advance(Stage::ReportGeneration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Provenance;
    use crate::types::CallId;
    use serde_json::json;

    fn finding(id: u64, summary: &str, calls: usize) -> (TaskId, Finding) {
        let task_id = TaskId::new(id);
        let provenance = (0..calls)
            .map(|i| Provenance {
                call_id: CallId::new(format!("call-{id}-{i}")),
                tool: "search".into(),
                arguments: json!({}),
            })
            .collect();
        (
            task_id,
            Finding {
                task_id,
                summary: summary.into(),
                provenance,
                partial: false,
            },
        )
    }

    #[test]
    fn test_distinct_findings_kept() {
        let findings: BTreeMap<_, _> = [
            finding(1, "Paris is the capital of France", 1),
            finding(2, "About 2.1 million people live in Paris", 1),
        ]
        .into_iter()
        .collect();

        let condensed = condense(&findings, 0.8, 10_000);
        assert_eq!(condensed.len(), 2);
        assert_eq!(condensed[0].source_tasks, vec![TaskId::new(1)]);
        assert_eq!(condensed[1].source_tasks, vec![TaskId::new(2)]);
    }

    #[test]
    fn test_duplicates_prefer_most_provenance() {
        let findings: BTreeMap<_, _> = [
            finding(1, "Paris is the capital of France.", 1),
            finding(2, "paris is the capital of france", 3),
            finding(3, "The Eiffel Tower is in Paris", 0),
        ]
        .into_iter()
        .collect();

        let condensed = condense(&findings, 0.8, 10_000);
        assert_eq!(condensed.len(), 2);
        assert_eq!(condensed[0].summary, "paris is the capital of france");
        assert_eq!(condensed[0].provenance.len(), 3);
        assert_eq!(condensed[0].source_tasks, vec![TaskId::new(1), TaskId::new(2)]);
    }

    #[test]
    fn test_duplicate_tie_keeps_earliest() {
        let findings: BTreeMap<_, _> = [
            finding(4, "Paris is the capital of France", 2),
            finding(9, "PARIS is the capital of France!", 2),
        ]
        .into_iter()
        .collect();

        let condensed = condense(&findings, 0.8, 10_000);
        assert_eq!(condensed.len(), 1);
        assert_eq!(condensed[0].summary, "Paris is the capital of France");
        assert_eq!(condensed[0].source_tasks, vec![TaskId::new(4), TaskId::new(9)]);
    }

    #[test]
    fn test_evidence_budget_truncates() {
        let long = "word ".repeat(100);
        let findings: BTreeMap<_, _> = [finding(1, &long, 1), finding(2, "short and distinct", 1)]
            .into_iter()
            .collect();

        let condensed = condense(&findings, 0.8, 100);
        assert_eq!(condensed[0].summary.chars().count(), 50);
        assert!(condensed[0].summary.ends_with('…'));
        assert_eq!(condensed[1].summary, "short and distinct");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo wörld", 4), "hél…");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&tokens("a b"), &tokens("A, B")), 1.0);
        assert_eq!(jaccard(&tokens("a b"), &tokens("c d")), 0.0);
        assert!((jaccard(&tokens("a b c"), &tokens("a b d")) - 0.5).abs() < f64::EPSILON);
    }
}
