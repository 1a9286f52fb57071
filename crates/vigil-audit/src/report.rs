//! `run_report.md`: a human-readable digest of a run, built purely from the
//! artifacts `summary` collects. Never makes a live call — if a repo's
//! summary is missing, it is reported as missing rather than recomputed.

use vigil_core::run_state::RunState;
use vigil_core::types::BeadOutcome;

use crate::summary::{RepoSummary, RepoSummaryOutcome, RunSummary};

/// Render the run report markdown for one run from its already-collected
/// summaries. `ai_model`/`ai_reasoning_effort` come from the enforced
/// unattended AI policy, not from a live query.
pub fn render_run_report(
    run: &RunState,
    run_summary: &RunSummary,
    repo_summaries: &[RepoSummary],
    ai_model: &str,
    ai_reasoning_effort: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Run Report: {}\n\n", run.run_id));

    out.push_str("## Summary\n\n");
    out.push_str(&format!("- Mode: {:?}\n", run.mode));
    out.push_str(&format!("- Created: {}\n", run.created_at));
    out.push_str(&format!("- Ticks: {}\n", run.tick_count));
    out.push_str(&format!("- Repos attempted: {}\n", run_summary.totals.repos_attempted));
    out.push_str(&format!("- Repos skipped: {}\n", run_summary.totals.repos_skipped));
    out.push_str(&format!("- Beads attempted: {}\n", run_summary.totals.beads_attempted));
    out.push_str(&format!("- Beads closed: {}\n", run_summary.totals.beads_closed));
    out.push_str(&format!("- Beads failed: {}\n\n", run_summary.totals.beads_failed));

    out.push_str("## AI configuration\n\n");
    out.push_str(&format!("- Model: {ai_model}\n"));
    out.push_str(&format!("- Reasoning effort: {ai_reasoning_effort}\n\n"));

    out.push_str("## Repos\n\n");
    for summary in repo_summaries {
        out.push_str(&format!("### {}\n\n", summary.repo_id));
        match &summary.outcome {
            RepoSummaryOutcome::Skipped { reason, detail } => {
                out.push_str(&format!("Skipped ({reason:?}): {detail}\n\n"));
            }
            RepoSummaryOutcome::Completed {
                stop_reason,
                attempts,
                tool_versions,
            } => {
                out.push_str(&format!("Stopped: {stop_reason:?}\n\n"));
                if attempts.is_empty() {
                    out.push_str("No beads attempted.\n\n");
                } else {
                    out.push_str("| Bead | Outcome | Validations | Commit |\n");
                    out.push_str("|---|---|---|---|\n");
                    for attempt in attempts {
                        let validations = attempt
                            .validation_summary
                            .iter()
                            .map(|v| format!("{}:{}", v.command, if v.passed() { "ok" } else { "fail" }))
                            .collect::<Vec<_>>()
                            .join(", ");
                        let commit = attempt.commit_hash.as_deref().unwrap_or("-");
                        out.push_str(&format!(
                            "| {} | {:?} | {} | {} |\n",
                            attempt.bead_id, attempt.outcome, validations, commit
                        ));
                    }
                    out.push('\n');

                    let failures: Vec<_> = attempts.iter().filter(|a| a.outcome == BeadOutcome::Failed).collect();
                    if !failures.is_empty() {
                        out.push_str("Failures:\n\n");
                        for failure in failures {
                            out.push_str(&format!("- {}: {}\n", failure.bead_id, failure.detail));
                        }
                        out.push('\n');
                    }

                    let follow_ups: Vec<_> = attempts.iter().filter(|a| !a.dependents_updated.is_empty()).collect();
                    if !follow_ups.is_empty() {
                        out.push_str("Follow-ups unblocked:\n\n");
                        for attempt in follow_ups {
                            out.push_str(&format!("- {} unblocked {}\n", attempt.bead_id, attempt.dependents_updated.join(", ")));
                        }
                        out.push('\n');
                    }
                }

                out.push_str("Tool versions:\n\n");
                for (tool, version) in tool_versions {
                    out.push_str(&format!("- {tool}: {version}\n"));
                }
                out.push('\n');
            }
        }
    }

    out
}
