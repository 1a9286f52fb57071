//! Final Review & Signoff (C11).
//!
//! The final review is built once from artifacts already on disk — no live
//! calls — and is deliberately idempotent so a crashed or re-run tick never
//! clobbers a review a human may already be reading.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_audit::report::render_run_report;
use vigil_audit::summary::{self, RepoSummary, RepoSummaryOutcome, RunSummary};
use vigil_core::atomic::{self, AtomicError};
use vigil_core::paths;
use vigil_core::run_state::RunState;
use vigil_core::signoff::{RunSignoff, SignoffError};
use vigil_core::types::{BeadAttemptRecord, RepoPolicy, RunDeck};
use vigil_exec::agent::AgentCli;
use vigil_exec::git::GitRepo;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error(transparent)]
    Artifact(#[from] AtomicError),
    #[error("review-only agent pass found {0} dirty before it even started")]
    DirtyBeforeReview(String),
    #[error("review-only agent pass left {0} dirty")]
    DirtyAfterReview(String),
    #[error("review-only agent pass moved HEAD in {repo_id} ({before} -> {after})")]
    HeadMoved { repo_id: String, before: String, after: String },
    #[error("review-only agent pass exited non-zero for {repo_id}: {detail}")]
    AgentNonZero { repo_id: String, detail: String },
    #[error(transparent)]
    Signoff(#[from] SignoffError),
    #[error("run {0} has not ended yet; cannot sign off")]
    RunNotEnded(String),
    #[error("final_review.json for {0} is missing; nothing to sign off")]
    FinalReviewMissing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReviewRepo {
    pub repo_id: String,
    pub outcome: String,
    pub planned_bead_ids: Vec<String>,
    pub attempts: Vec<BeadAttemptRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReview {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub repos: Vec<FinalReviewRepo>,
    pub totals: vigil_audit::summary::RunTotals,
}

impl FinalReview {
    fn build(cache: &Path, run_id: &str, summaries: &[RepoSummary]) -> Self {
        let mut totals = vigil_audit::summary::RunTotals::default();
        let mut repos = Vec::with_capacity(summaries.len());
        let today = Utc::now().format("%Y-%m-%d").to_string();

        for summary in summaries {
            totals.accumulate(summary);
            let deck_path = paths::repo_deck_path(cache, run_id, &summary.repo_id, &today);
            let planned_bead_ids = atomic::read_json::<RunDeck>(&deck_path)
                .ok()
                .flatten()
                .map(|deck| deck.items.into_iter().map(|item| item.bead_id).collect())
                .unwrap_or_default();

            let (outcome, attempts) = match &summary.outcome {
                RepoSummaryOutcome::Skipped { reason, .. } => (format!("skipped:{reason:?}"), Vec::new()),
                RepoSummaryOutcome::Completed { stop_reason, attempts, .. } => {
                    (format!("completed:{stop_reason:?}"), attempts.clone())
                }
            };

            repos.push(FinalReviewRepo {
                repo_id: summary.repo_id.clone(),
                outcome,
                planned_bead_ids,
                attempts,
            });
        }

        Self {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            repos,
            totals,
        }
    }
}

/// Build and write `final_review.json`/`.md` if they don't already exist.
/// Idempotent: if both already exist, only `run_summary.json` is updated to
/// reference them.
pub fn write_final_review(
    cache: &Path,
    run: &RunState,
    summaries: &[RepoSummary],
    ai_model: &str,
    ai_reasoning_effort: &str,
) -> Result<(), ReviewError> {
    let json_path = paths::final_review_json_path(cache, &run.run_id);
    let md_path = paths::final_review_md_path(cache, &run.run_id);

    let already_written = atomic::read_json::<FinalReview>(&json_path)?.is_some() && md_path.exists();
    if !already_written {
        let review = FinalReview::build(cache, &run.run_id, summaries);
        atomic::write_json_atomic(&json_path, &review)?;

        let run_summary = RunSummary::build(&run.run_id, Utc::now(), summaries);
        let report = render_run_report(run, &run_summary, summaries, ai_model, ai_reasoning_effort);
        atomic::append_text(&md_path, &report)?;
    }

    let json_name = file_name(&json_path, "final_review.json");
    let md_name = file_name(&md_path, "final_review.md");
    let run_summary = RunSummary::build(&run.run_id, Utc::now(), summaries).with_final_review(json_name, md_name);
    summary::write_run_summary(cache, &run.run_id, &run_summary)?;
    Ok(())
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or(fallback).to_string()
}

/// Run the agent with a read-only, no-shell prompt against each non-skipped
/// repo and verify it left no trace: no dirty paths, no moved HEAD, exit 0.
pub async fn run_review_only_pass(
    agent: &AgentCli,
    repos: &[(&RepoPolicy, &RepoSummaryOutcome)],
    review_timeout: Duration,
) -> Result<Vec<String>, ReviewError> {
    let mut transcripts = Vec::new();
    for (policy, outcome) in repos {
        if matches!(outcome, RepoSummaryOutcome::Skipped { .. }) {
            continue;
        }
        let repo = GitRepo::new(&policy.path);
        let dirty_before = repo.dirty_paths(&policy.dirty_ignore_globs).await.unwrap_or_default();
        if !dirty_before.is_empty() {
            return Err(ReviewError::DirtyBeforeReview(policy.repo_id.clone()));
        }
        let head_before = repo.head_sha().await.unwrap_or_default();

        let prompt = "Summarize the work done on this branch so far. Do not modify any files, run any shell commands, or make any commits. Respond with a short summary only.";
        let output = agent.run(&policy.path, prompt, review_timeout).await;
        let output = match output {
            Ok(o) if o.success() => o,
            Ok(o) => {
                return Err(ReviewError::AgentNonZero {
                    repo_id: policy.repo_id.clone(),
                    detail: format!("exit_code={:?} timed_out={}", o.exit_code, o.timed_out),
                });
            }
            Err(e) => {
                return Err(ReviewError::AgentNonZero {
                    repo_id: policy.repo_id.clone(),
                    detail: e.to_string(),
                });
            }
        };

        let head_after = repo.head_sha().await.unwrap_or_default();
        if head_before != head_after {
            return Err(ReviewError::HeadMoved {
                repo_id: policy.repo_id.clone(),
                before: head_before,
                after: head_after,
            });
        }
        let dirty_after = repo.dirty_paths(&policy.dirty_ignore_globs).await.unwrap_or_default();
        if !dirty_after.is_empty() {
            return Err(ReviewError::DirtyAfterReview(policy.repo_id.clone()));
        }

        transcripts.push(format!("## {}\n\n{}\n", policy.repo_id, output.stdout.trim()));
    }
    Ok(transcripts)
}

/// Build and persist a human signoff for the given run, after verifying the
/// final review it attests to actually exists on disk.
pub fn write_run_signoff(
    cache: &Path,
    run_id: &str,
    reviewer: &str,
    reviewed_at: DateTime<Utc>,
    notes: Option<String>,
) -> Result<RunSignoff, ReviewError> {
    let json_path = paths::final_review_json_path(cache, run_id);
    let final_review_bytes = std::fs::read(&json_path).map_err(|_| ReviewError::FinalReviewMissing(run_id.to_string()))?;
    let json_name = file_name(&json_path, "final_review.json");
    let md_name = file_name(&paths::final_review_md_path(cache, run_id), "final_review.md");

    let signoff = RunSignoff::new(run_id, reviewer, reviewed_at, json_name, md_name, &final_review_bytes, notes)?;
    atomic::write_json_atomic(&paths::run_signoff_json_path(cache, run_id), &signoff)?;
    atomic::append_text(
        &paths::run_signoff_md_path(cache, run_id),
        &format!("Signed off by {reviewer} at {reviewed_at}\n"),
    )?;
    Ok(signoff)
}

/// Recheck a run's signoff against the final review bytes currently on
/// disk. Returns `Ok(true)` only when both exist and validate.
pub fn validate_run_signoff(cache: &Path, run_id: &str) -> Result<bool, ReviewError> {
    let Some(signoff) = atomic::read_json::<RunSignoff>(&paths::run_signoff_json_path(cache, run_id))? else {
        return Ok(false);
    };
    let json_path = paths::final_review_json_path(cache, run_id);
    let Ok(bytes) = std::fs::read(&json_path) else {
        return Ok(false);
    };
    let json_name = file_name(&json_path, "final_review.json");
    let md_name = file_name(&paths::final_review_md_path(cache, run_id), "final_review.md");
    Ok(signoff.validates(&json_name, &md_name, &bytes))
}

/// Minimal input bundle the CLI's `signoff` subcommand collects before
/// calling [`write_run_signoff`].
pub struct SignoffInput {
    pub run_id: String,
    pub reviewer: String,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use vigil_core::run_state::RunMode;
    use vigil_core::types::RepoSkipReason;

    fn tmp_cache() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vigil-review-test-{}-{}", std::process::id(), rand_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    fn now() -> DateTime<Utc> {
        "2025-01-15T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn write_final_review_is_idempotent() {
        let cache = tmp_cache();
        let run = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        let summary = RepoSummary::from_tick_result(
            "r1",
            "widgets",
            now(),
            &vigil_exec::executor::RepoTickResult::Skipped {
                reason: RepoSkipReason::GitDirty,
                detail: "dirty".into(),
            },
            Default::default(),
        );
        write_final_review(&cache, &run, &[summary.clone()], "m", "high").unwrap();
        let first = std::fs::read_to_string(paths::final_review_json_path(&cache, "r1")).unwrap();
        write_final_review(&cache, &run, &[summary], "m", "high").unwrap();
        let second = std::fs::read_to_string(paths::final_review_json_path(&cache, "r1")).unwrap();
        assert_eq!(first, second);
        let _ = std::fs::remove_dir_all(&cache);
    }

    #[test]
    fn signoff_round_trips() {
        let cache = tmp_cache();
        let run = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        write_final_review(&cache, &run, &[], "m", "high").unwrap();
        write_run_signoff(&cache, "r1", "alice", now(), None).unwrap();
        assert!(validate_run_signoff(&cache, "r1").unwrap());
        let _ = std::fs::remove_dir_all(&cache);
    }

    #[test]
    fn missing_final_review_refuses_signoff() {
        let cache = tmp_cache();
        let err = write_run_signoff(&cache, "ghost", "alice", now(), None).unwrap_err();
        assert!(matches!(err, ReviewError::FinalReviewMissing(_)));
        let _ = std::fs::remove_dir_all(&cache);
    }
}
