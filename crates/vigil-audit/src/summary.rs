//! Per-repo and per-run summary artifacts: `<repo_id>.summary.json` and
//! `run_summary.json`. These are the aggregate view the Final Review reads
//! back; every field here is derived from a `RepoTickResult`, never
//! recomputed independently.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::atomic::{self, AtomicError};
use vigil_core::paths;
use vigil_core::types::{BeadAttemptRecord, BeadOutcome, RepoSkipReason, RepoStopReason};
use vigil_exec::executor::RepoTickResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepoSummaryOutcome {
    Skipped {
        reason: RepoSkipReason,
        detail: String,
    },
    Completed {
        stop_reason: RepoStopReason,
        attempts: Vec<BeadAttemptRecord>,
        tool_versions: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSummary {
    pub run_id: String,
    pub repo_id: String,
    pub generated_at: DateTime<Utc>,
    pub outcome: RepoSummaryOutcome,
    pub beads_attempted: u32,
    pub beads_closed: u32,
    pub beads_failed: u32,
}

impl RepoSummary {
    pub fn from_tick_result(
        run_id: impl Into<String>,
        repo_id: impl Into<String>,
        now: DateTime<Utc>,
        result: &RepoTickResult,
        tool_versions: BTreeMap<String, String>,
    ) -> Self {
        match result {
            RepoTickResult::Skipped { reason, detail } => Self {
                run_id: run_id.into(),
                repo_id: repo_id.into(),
                generated_at: now,
                outcome: RepoSummaryOutcome::Skipped {
                    reason: *reason,
                    detail: detail.clone(),
                },
                beads_attempted: 0,
                beads_closed: 0,
                beads_failed: 0,
            },
            RepoTickResult::Completed { stop_reason, attempts, .. } => {
                let beads_closed = attempts.iter().filter(|a| a.outcome == BeadOutcome::Closed).count() as u32;
                let beads_failed = attempts.iter().filter(|a| a.outcome == BeadOutcome::Failed).count() as u32;
                Self {
                    run_id: run_id.into(),
                    repo_id: repo_id.into(),
                    generated_at: now,
                    outcome: RepoSummaryOutcome::Completed {
                        stop_reason: *stop_reason,
                        attempts: attempts.clone(),
                        tool_versions,
                    },
                    beads_attempted: attempts.len() as u32,
                    beads_closed,
                    beads_failed,
                }
            }
        }
    }

    pub fn actionable(&self) -> bool {
        self.beads_attempted > 0
    }
}

pub fn write_repo_summary(cache: &Path, run_id: &str, repo_id: &str, summary: &RepoSummary) -> Result<(), AtomicError> {
    atomic::write_json_atomic(&paths::repo_summary_path(cache, run_id, repo_id), summary)
}

pub fn load_repo_summary(cache: &Path, run_id: &str, repo_id: &str) -> Result<Option<RepoSummary>, AtomicError> {
    atomic::read_json(&paths::repo_summary_path(cache, run_id, repo_id))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub repos_attempted: u32,
    pub repos_skipped: u32,
    pub beads_attempted: u32,
    pub beads_closed: u32,
    pub beads_failed: u32,
}

impl RunTotals {
    pub fn accumulate(&mut self, summary: &RepoSummary) {
        match &summary.outcome {
            RepoSummaryOutcome::Skipped { .. } => self.repos_skipped += 1,
            RepoSummaryOutcome::Completed { .. } => self.repos_attempted += 1,
        }
        self.beads_attempted += summary.beads_attempted;
        self.beads_closed += summary.beads_closed;
        self.beads_failed += summary.beads_failed;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub repo_ids: Vec<String>,
    pub totals: RunTotals,
    pub final_review_json: Option<String>,
    pub final_review_md: Option<String>,
}

impl RunSummary {
    pub fn build(run_id: impl Into<String>, now: DateTime<Utc>, summaries: &[RepoSummary]) -> Self {
        let mut totals = RunTotals::default();
        let mut repo_ids: Vec<String> = summaries.iter().map(|s| s.repo_id.clone()).collect();
        repo_ids.sort();
        for summary in summaries {
            totals.accumulate(summary);
        }
        Self {
            run_id: run_id.into(),
            generated_at: now,
            repo_ids,
            totals,
            final_review_json: None,
            final_review_md: None,
        }
    }

    pub fn with_final_review(mut self, json_name: impl Into<String>, md_name: impl Into<String>) -> Self {
        self.final_review_json = Some(json_name.into());
        self.final_review_md = Some(md_name.into());
        self
    }
}

pub fn write_run_summary(cache: &Path, run_id: &str, summary: &RunSummary) -> Result<(), AtomicError> {
    atomic::write_json_atomic(&paths::run_summary_path(cache, run_id), summary)
}

pub fn load_run_summary(cache: &Path, run_id: &str) -> Result<Option<RunSummary>, AtomicError> {
    atomic::read_json(&paths::run_summary_path(cache, run_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::ValidationResult;

    fn attempt(outcome: BeadOutcome) -> BeadAttemptRecord {
        BeadAttemptRecord {
            bead_id: "bd-1".into(),
            title: "fix thing".into(),
            outcome,
            detail: "done".into(),
            commit_hash: None,
            changed_paths: vec![],
            validation_summary: vec![ValidationResult {
                command: "pytest".into(),
                exit_code: Some(0),
                timed_out: false,
            }],
            dependents_updated: vec![],
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-01-15T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn summary_counts_closed_and_failed() {
        let result = RepoTickResult::Completed {
            stop_reason: RepoStopReason::Completed,
            attempts: vec![attempt(BeadOutcome::Closed), attempt(BeadOutcome::Failed), attempt(BeadOutcome::Closed)],
            tool_versions: Default::default(),
        };
        let summary = RepoSummary::from_tick_result("r1", "widgets", now(), &result, BTreeMap::new());
        assert_eq!(summary.beads_attempted, 3);
        assert_eq!(summary.beads_closed, 2);
        assert_eq!(summary.beads_failed, 1);
        assert!(summary.actionable());
    }

    #[test]
    fn skipped_repo_is_not_actionable() {
        let result = RepoTickResult::Skipped {
            reason: RepoSkipReason::GitDirty,
            detail: "2 dirty paths".into(),
        };
        let summary = RepoSummary::from_tick_result("r1", "widgets", now(), &result, BTreeMap::new());
        assert!(!summary.actionable());
        assert_eq!(summary.beads_attempted, 0);
    }

    #[test]
    fn run_totals_accumulate_across_repos() {
        let completed = RepoSummary::from_tick_result(
            "r1",
            "widgets",
            now(),
            &RepoTickResult::Completed {
                stop_reason: RepoStopReason::Completed,
                attempts: vec![attempt(BeadOutcome::Closed)],
                tool_versions: Default::default(),
            },
            BTreeMap::new(),
        );
        let skipped = RepoSummary::from_tick_result(
            "r1",
            "gadgets",
            now(),
            &RepoTickResult::Skipped {
                reason: RepoSkipReason::LockBusy,
                detail: "busy".into(),
            },
            BTreeMap::new(),
        );
        let run_summary = RunSummary::build("r1", now(), &[completed, skipped]);
        assert_eq!(run_summary.totals.repos_attempted, 1);
        assert_eq!(run_summary.totals.repos_skipped, 1);
        assert_eq!(run_summary.totals.beads_closed, 1);
        assert_eq!(run_summary.repo_ids, vec!["gadgets".to_string(), "widgets".to_string()]);
    }
}
