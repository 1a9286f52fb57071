//! The shared data model: repo policy, contracts, decks, and outcomes.
//!
//! These types are pure data — no I/O, no subprocess calls — so every
//! crate in the workspace can agree on their shape without circular
//! dependencies. Parsing (TOML) lives in `vigil-config`; resolution logic
//! lives in `vigil-contract`; all of them serialize through this crate's
//! `vigil_core::atomic` writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TickBudget
// ---------------------------------------------------------------------------

/// Immutable time window for one cycle's tick, shared read-only by every
/// repo executor the cycle controller dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBudget {
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl TickBudget {
    pub fn new(started_at: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self {
            started_at,
            ends_at: started_at + duration,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        let delta = self.ends_at - now;
        delta.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

// ---------------------------------------------------------------------------
// NotebookOutputPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotebookOutputPolicy {
    Strip,
    Keep,
}

// ---------------------------------------------------------------------------
// RepoPolicy
// ---------------------------------------------------------------------------

/// Read-only per-repo configuration, loaded from `repos.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPolicy {
    pub repo_id: String,
    pub path: std::path::PathBuf,
    pub base_branch: String,
    pub env: Option<String>,
    #[serde(default)]
    pub allowed_roots: Vec<String>,
    #[serde(default)]
    pub deny_roots: Vec<String>,
    #[serde(default)]
    pub notebook_roots: Vec<String>,
    #[serde(default)]
    pub validation_commands: Vec<String>,
    #[serde(default = "default_notebook_output_policy")]
    pub notebook_output_policy: NotebookOutputPolicy,
    #[serde(default)]
    pub dirty_ignore_globs: Vec<String>,
    #[serde(default)]
    pub dirty_cleanup: bool,
}

fn default_notebook_output_policy() -> NotebookOutputPolicy {
    NotebookOutputPolicy::Strip
}

// ---------------------------------------------------------------------------
// ContractOverlayPatch
// ---------------------------------------------------------------------------

/// A sparse patch over a `RepoPolicy`: every field may be unset, in which
/// case it falls through to the next-lower precedence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractOverlayPatch {
    pub time_budget_minutes: Option<u32>,
    #[serde(default)]
    pub validation_commands: Option<Vec<String>>,
    pub env: Option<String>,
    pub allow_env_creation: Option<bool>,
    pub requires_notebook_execution: Option<bool>,
    pub enforce_given_when_then: Option<bool>,
    #[serde(default)]
    pub allowed_roots: Option<Vec<String>>,
    #[serde(default)]
    pub deny_roots: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// ResolvedExecutionContract
// ---------------------------------------------------------------------------

/// Fully-populated execution contract for one bead in one run. Produced by
/// `vigil_contract::resolve`; never partially filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedExecutionContract {
    pub time_budget_minutes: u32,
    pub validation_commands: Vec<String>,
    pub env: String,
    pub allow_env_creation: bool,
    pub requires_notebook_execution: bool,
    pub allowed_roots: Vec<String>,
    pub deny_roots: Vec<String>,
    pub notebook_roots: Vec<String>,
    pub notebook_output_policy: NotebookOutputPolicy,
    pub enforce_given_when_then: bool,
}

// ---------------------------------------------------------------------------
// ReadyBead
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyBead {
    pub bead_id: String,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub description: Option<String>,
    pub issue_type: String,
}

// ---------------------------------------------------------------------------
// BeadStatus (as reported by the bead store)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

// ---------------------------------------------------------------------------
// Validation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// DiffCaps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCaps {
    pub max_files_changed: u32,
    pub max_lines_added: u64,
}

impl Default for DiffCaps {
    fn default() -> Self {
        Self {
            max_files_changed: 25,
            max_lines_added: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Deck
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckItem {
    pub bead_id: String,
    pub title: String,
    pub resolved_contract: ResolvedExecutionContract,
    pub baseline_validation_results: Vec<ValidationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedBead {
    pub bead_id: String,
    pub title: String,
    pub next_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDeck {
    pub run_id: String,
    pub repo_id: String,
    pub items: Vec<DeckItem>,
    pub skipped_beads: Vec<SkippedBead>,
}

// ---------------------------------------------------------------------------
// BeadOutcome / attempt records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadOutcome {
    SkippedClosed,
    SkippedBlocked,
    SkippedNotOpen,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadAttemptRecord {
    pub bead_id: String,
    pub title: String,
    pub outcome: BeadOutcome,
    pub detail: String,
    pub commit_hash: Option<String>,
    pub changed_paths: Vec<String>,
    pub validation_summary: Vec<ValidationResult>,
    pub dependents_updated: Vec<String>,
}

// ---------------------------------------------------------------------------
// Repo-level skip/stop reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoSkipReason {
    MissingTools,
    GitDirty,
    GitDetached,
    GitFetchFailed,
    GitBranchFailed,
    PlanningFailed,
    LockBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStopReason {
    Completed,
    BeadCap,
    TickTimeRemaining,
    Blocked,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_result_passes_only_on_zero_exit() {
        let ok = ValidationResult {
            command: "pytest".into(),
            exit_code: Some(0),
            timed_out: false,
        };
        assert!(ok.passed());

        let failed = ValidationResult {
            command: "pytest".into(),
            exit_code: Some(1),
            timed_out: false,
        };
        assert!(!failed.passed());

        let timed_out = ValidationResult {
            command: "pytest".into(),
            exit_code: Some(0),
            timed_out: true,
        };
        assert!(!timed_out.passed());
    }

    #[test]
    fn resolved_contract_roundtrips_through_json() {
        let contract = ResolvedExecutionContract {
            time_budget_minutes: 30,
            validation_commands: vec!["pytest".into()],
            env: "py311".into(),
            allow_env_creation: false,
            requires_notebook_execution: false,
            allowed_roots: vec!["src".into()],
            deny_roots: vec![],
            notebook_roots: vec![],
            notebook_output_policy: NotebookOutputPolicy::Strip,
            enforce_given_when_then: false,
        };
        let json = serde_json::to_string(&contract).unwrap();
        let back: ResolvedExecutionContract = serde_json::from_str(&json).unwrap();
        assert_eq!(contract, back);
    }

    #[test]
    fn diff_caps_default_is_conservative() {
        let caps = DiffCaps::default();
        assert!(caps.max_files_changed > 0);
        assert!(caps.max_lines_added > 0);
    }

    #[test]
    fn tick_budget_remaining_shrinks_toward_zero() {
        let start = chrono::DateTime::parse_from_rfc3339("2025-01-15T02:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let budget = TickBudget::new(start, chrono::Duration::minutes(30));
        let remaining = budget.remaining(start + chrono::Duration::minutes(10));
        assert_eq!(remaining, std::time::Duration::from_secs(20 * 60));
        assert!(!budget.is_expired(start + chrono::Duration::minutes(10)));
        assert!(budget.is_expired(start + chrono::Duration::minutes(30)));
    }
}
