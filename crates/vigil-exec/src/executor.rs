//! The repo executor: the protocol core that turns one repo's deck into
//! commits. Everything here is deliberately linear — tool check, clean-start
//! check, fetch, branch, plan, then one bead at a time — because the
//! invariants that matter (commit ownership, path policy, diff caps) only
//! hold if each step either succeeds outright or the tick stops.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use vigil_core::types::{
    BeadAttemptRecord, BeadOutcome, BeadStatus, ContractOverlayPatch, DiffCaps, RepoPolicy,
    RepoSkipReason, RepoStopReason, TickBudget, ValidationResult,
};
use vigil_harness::allowlist::ValidationAllowlist;
use vigil_harness::subprocess::{self, SubprocessSpec};
use vigil_planner::{build_or_reuse_deck, BeadStore};

use crate::agent::{clamp_agent_timeout, AgentCli};
use crate::env_manager::{touches_dependency_manifest, EnvManager};
use crate::git::GitRepo;
use crate::prompt::build_bead_prompt;

/// Padding added on top of a bead's own time budget when clamping the
/// agent's subprocess timeout, so the agent isn't killed the instant its
/// budget elapses if it's mid-flush.
const AGENT_TIMEOUT_PADDING: Duration = Duration::from_secs(60);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_beads_per_tick: u32,
    pub min_minutes_to_start_new_bead: u32,
    pub diff_caps: DiffCaps,
    pub replan: bool,
    pub commit_on_failure: bool,
}

pub enum RepoTickResult {
    Skipped {
        reason: RepoSkipReason,
        detail: String,
    },
    Completed {
        stop_reason: RepoStopReason,
        attempts: Vec<BeadAttemptRecord>,
        tool_versions: HashMap<String, String>,
    },
}

pub struct RepoExecutor<'a> {
    pub store: &'a dyn BeadStore,
    pub agent: &'a AgentCli,
    pub env_manager: &'a dyn EnvManager,
    pub allowlist: &'a ValidationAllowlist,
    pub cache_dir: &'a Path,
}

/// Outcome of a single bead attempt, folded back into the loop by the
/// caller so stop conditions stay in one place.
struct AttemptResult {
    record: BeadAttemptRecord,
    stop: Option<RepoStopReason>,
    files_changed: u32,
    lines_added: u64,
}

impl<'a> RepoExecutor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub async fn run_tick(
        &self,
        run_id: &str,
        policy: &RepoPolicy,
        overlay_defaults: Option<&ContractOverlayPatch>,
        overlay_beads: &BTreeMap<String, ContractOverlayPatch>,
        focus: Option<&str>,
        tick: &TickBudget,
        config: &ExecutorConfig,
    ) -> RepoTickResult {
        let repo = GitRepo::new(&policy.path);

        let Some(git_version) = repo.version().await else {
            return skip(RepoSkipReason::MissingTools, "git not found on PATH");
        };
        let Some(agent_version) = self.agent.version().await else {
            return skip(RepoSkipReason::MissingTools, "agent CLI not found on PATH");
        };
        if let Err(e) = self.store.doctor().await {
            return skip(RepoSkipReason::MissingTools, &format!("bead store doctor failed: {e}"));
        }

        if policy.dirty_cleanup {
            let _ = repo.clean_untracked_ignored(&policy.dirty_ignore_globs).await;
        }
        match repo.dirty_paths(&policy.dirty_ignore_globs).await {
            Ok(dirty) if !dirty.is_empty() => {
                return skip(RepoSkipReason::GitDirty, &format!("{} dirty path(s) outside ignore globs", dirty.len()));
            }
            Err(e) => return skip(RepoSkipReason::GitDirty, &e.to_string()),
            Ok(_) => {}
        }
        match repo.is_detached_head().await {
            Ok(true) => return skip(RepoSkipReason::GitDetached, "HEAD is detached"),
            Err(e) => return skip(RepoSkipReason::GitDetached, &e.to_string()),
            Ok(false) => {}
        }

        if let Err(e) = repo.fetch_all_prune().await {
            return skip(RepoSkipReason::GitFetchFailed, &e.to_string());
        }

        let branch = format!("run/{run_id}");
        let branch_result: Result<(), crate::git::GitError> = async {
            if repo.branch_exists(&branch).await? {
                repo.checkout(&branch).await
            } else {
                repo.checkout(&policy.base_branch).await?;
                repo.checkout_new(&branch).await
            }
        }
        .await;
        if let Err(e) = branch_result {
            return skip(RepoSkipReason::GitBranchFailed, &e.to_string());
        }

        let deck = match build_or_reuse_deck(
            self.store,
            self.cache_dir,
            run_id,
            policy,
            overlay_defaults,
            overlay_beads,
            focus,
            config.replan,
        )
        .await
        {
            Ok(d) => d,
            Err(e) => return skip(RepoSkipReason::PlanningFailed, &e.to_string()),
        };

        let mut attempts = Vec::new();
        let mut files_changed_total: u32 = 0;
        let mut lines_added_total: u64 = 0;
        let mut stop_reason = RepoStopReason::Completed;

        for item in &deck.items {
            if attempts.len() as u32 >= config.max_beads_per_tick {
                stop_reason = RepoStopReason::BeadCap;
                break;
            }
            let remaining = tick.remaining(Utc::now());
            let min_remaining = Duration::from_secs(config.min_minutes_to_start_new_bead as u64 * 60);
            if remaining < min_remaining {
                stop_reason = RepoStopReason::TickTimeRemaining;
                break;
            }

            let outcome = self
                .attempt_bead(
                    run_id,
                    policy,
                    &repo,
                    &branch,
                    item,
                    tick,
                    config,
                    files_changed_total,
                    lines_added_total,
                )
                .await;

            files_changed_total += outcome.files_changed;
            lines_added_total += outcome.lines_added;
            attempts.push(outcome.record);
            if let Some(reason) = outcome.stop {
                stop_reason = reason;
                break;
            }
        }

        let mut tool_versions = HashMap::new();
        tool_versions.insert("git".to_string(), git_version);
        tool_versions.insert("agent".to_string(), agent_version);
        if let Some(env_version) = self.env_manager.version().await {
            tool_versions.insert("env_manager".to_string(), env_version);
        }

        RepoTickResult::Completed {
            stop_reason,
            attempts,
            tool_versions,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_bead(
        &self,
        run_id: &str,
        policy: &RepoPolicy,
        repo: &GitRepo,
        branch: &str,
        item: &vigil_core::types::DeckItem,
        tick: &TickBudget,
        config: &ExecutorConfig,
        files_changed_so_far: u32,
        lines_added_so_far: u64,
    ) -> AttemptResult {
        let bead_id = &item.bead_id;

        let status = match self.store.status(bead_id).await {
            Ok(s) => s,
            Err(e) => {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("could not read bead status: {e}")),
                    stop: None,
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        };
        match status {
            BeadStatus::Closed => {
                return AttemptResult {
                    record: skip_record(bead_id, &item.title, BeadOutcome::SkippedClosed, "already closed"),
                    stop: None,
                    files_changed: 0,
                    lines_added: 0,
                };
            }
            BeadStatus::Blocked => {
                return AttemptResult {
                    record: skip_record(bead_id, &item.title, BeadOutcome::SkippedBlocked, "blocked on a dependency"),
                    stop: None,
                    files_changed: 0,
                    lines_added: 0,
                };
            }
            BeadStatus::Open | BeadStatus::InProgress => {}
        }

        if let Err(e) = self.store.update_status(bead_id, "in_progress", None).await {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, &format!("could not mark in_progress: {e}")),
                stop: None,
                files_changed: 0,
                lines_added: 0,
            };
        }

        let head_before = match repo.head_sha().await {
            Ok(sha) => sha,
            Err(e) => {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("could not snapshot HEAD: {e}")),
                    stop: Some(RepoStopReason::Error),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        };

        let contract = &item.resolved_contract;
        let prompt = build_bead_prompt(
            run_id,
            &policy.repo_id,
            branch,
            bead_id,
            &item.title,
            None,
            contract,
        );
        let budget = Duration::from_secs(contract.time_budget_minutes as u64 * 60);
        let timeout = clamp_agent_timeout(tick.remaining(Utc::now()), budget, AGENT_TIMEOUT_PADDING);

        if let Err(e) = self.agent.run(&policy.path, &prompt, timeout).await {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, &format!("agent invocation failed: {e}")),
                stop: None,
                files_changed: 0,
                lines_added: 0,
            };
        }

        let head_after = match repo.head_sha().await {
            Ok(sha) => sha,
            Err(e) => {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("could not read HEAD after run: {e}")),
                    stop: Some(RepoStopReason::Error),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        };
        if head_after != head_before {
            return AttemptResult {
                record: failed_record(
                    bead_id,
                    &item.title,
                    "commit ownership invariant violated: the agent created commits itself",
                ),
                stop: Some(RepoStopReason::Error),
                files_changed: 0,
                lines_added: 0,
            };
        }

        let changed = match repo.diff_numstat().await {
            Ok(c) => c,
            Err(e) => {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("could not read diff: {e}")),
                    stop: Some(RepoStopReason::Error),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        };
        if changed.is_empty() {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, "no changes detected after agent run"),
                stop: Some(RepoStopReason::Blocked),
                files_changed: 0,
                lines_added: 0,
            };
        }

        let changed_paths: Vec<String> = changed.iter().map(|c| c.path.clone()).collect();
        if let Some(violation) = path_policy_violation(&changed_paths, &contract.allowed_roots, &contract.deny_roots) {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, &format!("path policy violation: {violation}")),
                stop: Some(RepoStopReason::Blocked),
                files_changed: 0,
                lines_added: 0,
            };
        }

        let files_changed = changed.len() as u32;
        let lines_added: u64 = changed.iter().map(|c| c.lines_added).sum();
        if files_changed_so_far + files_changed > config.diff_caps.max_files_changed
            || lines_added_so_far + lines_added > config.diff_caps.max_lines_added
        {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, "tick-wide diff cap exceeded"),
                stop: Some(RepoStopReason::Blocked),
                files_changed: 0,
                lines_added: 0,
            };
        }

        let manifests_touched = touches_dependency_manifest(&changed_paths);
        if let Err(e) = self
            .env_manager
            .ensure(&contract.env, contract.allow_env_creation, &manifests_touched, &policy.path)
            .await
        {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, &format!("environment not ready: {e}")),
                stop: Some(RepoStopReason::Blocked),
                files_changed: 0,
                lines_added: 0,
            };
        }

        for command in &contract.validation_commands {
            if let Err(e) = self.allowlist.check(command) {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("validation command policy violation: {e}")),
                    stop: Some(RepoStopReason::Error),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        }

        let baseline: HashMap<&str, &ValidationResult> = item
            .baseline_validation_results
            .iter()
            .map(|r| (r.command.as_str(), r))
            .collect();

        let mut validation_summary = Vec::new();
        let mut ran_test_command = false;
        for command in &contract.validation_commands {
            let result = run_validation(&contract.env, &policy.path, command, self.env_manager).await;
            if is_test_command(command) {
                ran_test_command = true;
            }
            if !result.passed() {
                let was_already_failing = baseline.get(command.as_str()).map(|b| !b.passed()).unwrap_or(false);
                if !was_already_failing {
                    validation_summary.push(result);
                    let commit_hash =
                        self.maybe_commit_failure_snapshot(repo, config, bead_id, &item.title).await;
                    return AttemptResult {
                        record: BeadAttemptRecord {
                            bead_id: bead_id.clone(),
                            title: item.title.clone(),
                            outcome: BeadOutcome::Failed,
                            detail: format!("validation regression: `{command}`"),
                            commit_hash,
                            changed_paths,
                            validation_summary,
                            dependents_updated: Vec::new(),
                        },
                        stop: Some(RepoStopReason::Blocked),
                        files_changed: 0,
                        lines_added: 0,
                    };
                }
            }
            validation_summary.push(result);
        }

        if !ran_test_command {
            let commit_hash = self.maybe_commit_failure_snapshot(repo, config, bead_id, &item.title).await;
            return AttemptResult {
                record: BeadAttemptRecord {
                    bead_id: bead_id.clone(),
                    title: item.title.clone(),
                    outcome: BeadOutcome::Failed,
                    detail: "no behavioral test command validated this change".to_string(),
                    commit_hash,
                    changed_paths,
                    validation_summary,
                    dependents_updated: Vec::new(),
                },
                stop: Some(RepoStopReason::Blocked),
                files_changed: 0,
                lines_added: 0,
            };
        }

        if contract.enforce_given_when_then {
            if let Some(path) = missing_given_when_then(&policy.path, &changed_paths) {
                let commit_hash = self.maybe_commit_failure_snapshot(repo, config, bead_id, &item.title).await;
                return AttemptResult {
                    record: BeadAttemptRecord {
                        bead_id: bead_id.clone(),
                        title: item.title.clone(),
                        outcome: BeadOutcome::Failed,
                        detail: format!("test file `{path}` is missing given/when/then"),
                        commit_hash,
                        changed_paths,
                        validation_summary,
                        dependents_updated: Vec::new(),
                    },
                    stop: Some(RepoStopReason::Blocked),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        }

        if let Err(e) = repo.add_all().await {
            return AttemptResult {
                record: failed_record(bead_id, &item.title, &format!("git add failed: {e}")),
                stop: Some(RepoStopReason::Error),
                files_changed: 0,
                lines_added: 0,
            };
        }
        let subject = format!("beads({bead_id}): {}", item.title);
        let body = format!(
            "RUN_ID: {run_id}\nBEAD_ID: {bead_id}\nvalidation: {}",
            validation_summary
                .iter()
                .map(|r| format!("{} ({})", r.command, if r.passed() { "pass" } else { "pre-existing failure" }))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let commit_hash = match repo.commit(&subject, &body).await {
            Ok(sha) => sha,
            Err(e) => {
                return AttemptResult {
                    record: failed_record(bead_id, &item.title, &format!("commit failed: {e}")),
                    stop: Some(RepoStopReason::Error),
                    files_changed: 0,
                    lines_added: 0,
                };
            }
        };

        let closing_summary = format!(
            "Closed by run {run_id}: {} file(s) changed, validated by {}.",
            changed_paths.len(),
            contract.validation_commands.join(", ")
        );
        let _ = self.store.add_note(bead_id, &closing_summary).await;
        let _ = self.store.close(bead_id, &closing_summary).await;

        let dependents_updated = self.notify_dependents(bead_id, &closing_summary).await;
        self.maybe_close_epic(bead_id).await;

        AttemptResult {
            record: BeadAttemptRecord {
                bead_id: bead_id.clone(),
                title: item.title.clone(),
                outcome: BeadOutcome::Closed,
                detail: "closed".to_string(),
                commit_hash: Some(commit_hash),
                changed_paths,
                validation_summary,
                dependents_updated,
            },
            stop: None,
            files_changed,
            lines_added,
        }
    }

    /// Best-effort: `commit_on_failure` is opt-in, and a failed snapshot
    /// commit is never allowed to turn a `failed`/`blocked` bead into an
    /// `error` that poisons the rest of the tick, so any git error here is
    /// swallowed and the attempt is recorded without a `commit_hash`.
    async fn maybe_commit_failure_snapshot(
        &self,
        repo: &GitRepo,
        config: &ExecutorConfig,
        bead_id: &str,
        title: &str,
    ) -> Option<String> {
        if !config.commit_on_failure {
            return None;
        }
        repo.add_all().await.ok()?;
        let subject = format!("beads({bead_id}): {title} (failed)");
        repo.commit(&subject, "failure snapshot").await.ok()
    }

    async fn notify_dependents(&self, bead_id: &str, closing_summary: &str) -> Vec<String> {
        let dependents = self.store.dependents(bead_id).await.unwrap_or_default();
        let mut updated = Vec::new();
        for dependent in dependents {
            let note = format!("Upstream bead {bead_id} closed: {closing_summary}");
            if self.store.add_note(&dependent, &note).await.is_ok() {
                updated.push(dependent);
            }
        }
        updated
    }

    async fn maybe_close_epic(&self, bead_id: &str) {
        let Ok(Some(parent_id)) = self.store.parent(bead_id).await else {
            return;
        };
        let Ok(children) = self.store.children(&parent_id).await else {
            return;
        };
        if !children.is_empty() && children.iter().all(|(_, status)| *status == BeadStatus::Closed) {
            let _ = self
                .store
                .close(&parent_id, "auto-closed: every child bead is closed")
                .await;
        }
    }
}

fn skip(reason: RepoSkipReason, detail: &str) -> RepoTickResult {
    RepoTickResult::Skipped {
        reason,
        detail: detail.to_string(),
    }
}

fn failed_record(bead_id: &str, title: &str, detail: &str) -> BeadAttemptRecord {
    BeadAttemptRecord {
        bead_id: bead_id.to_string(),
        title: title.to_string(),
        outcome: BeadOutcome::Failed,
        detail: detail.to_string(),
        commit_hash: None,
        changed_paths: Vec::new(),
        validation_summary: Vec::new(),
        dependents_updated: Vec::new(),
    }
}

fn skip_record(bead_id: &str, title: &str, outcome: BeadOutcome, detail: &str) -> BeadAttemptRecord {
    BeadAttemptRecord {
        bead_id: bead_id.to_string(),
        title: title.to_string(),
        outcome,
        detail: detail.to_string(),
        commit_hash: None,
        changed_paths: Vec::new(),
        validation_summary: Vec::new(),
        dependents_updated: Vec::new(),
    }
}

/// Empty `allowed_roots` means unrestricted; any entry in `deny_roots`
/// always wins over `allowed_roots`.
///
/// Known divergence: `ResolvedExecutionContract.allowed_roots` is a plain
/// `Vec<String>`, so a bead overlay that writes `allowed_roots = []` to
/// mean "deny every path" is indistinguishable here from no `allowed_roots`
/// having been configured at any layer. Telling those apart would require
/// carrying `Option<Vec<String>>` through contract resolution instead of
/// collapsing it with `unwrap_or_default()` (see `vigil-contract`'s
/// `resolve`); an operator who wants to lock a bead down to nothing should
/// use `deny_roots` for that instead, since `deny_roots` has no such
/// "empty means unrestricted" reading.
fn path_policy_violation(changed_paths: &[String], allowed_roots: &[String], deny_roots: &[String]) -> Option<String> {
    for path in changed_paths {
        if deny_roots.iter().any(|root| is_under_root(path, root)) {
            return Some(format!("{path} is under a denied root"));
        }
        if !allowed_roots.is_empty() && !allowed_roots.iter().any(|root| is_under_root(path, root)) {
            return Some(format!("{path} is outside every allowed root"));
        }
    }
    None
}

fn is_under_root(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path == root || path.starts_with(&format!("{root}/"))
}

fn is_test_command(command: &str) -> bool {
    let program = command.split_whitespace().next().unwrap_or("");
    matches!(program, "pytest" | "jest" | "vitest" | "tox" | "nox")
        || command.contains(" test")
        || command.ends_with(" test")
}

fn missing_given_when_then(repo_path: &Path, changed_paths: &[String]) -> Option<String> {
    for path in changed_paths {
        let lower = path.to_lowercase();
        if !lower.contains("test") {
            continue;
        }
        let full = repo_path.join(path);
        let Ok(content) = std::fs::read_to_string(&full) else {
            continue;
        };
        let lower_content = content.to_lowercase();
        if !(lower_content.contains("given") && lower_content.contains("when") && lower_content.contains("then")) {
            return Some(path.clone());
        }
    }
    None
}

async fn run_validation(env: &str, repo_path: &Path, command: &str, env_manager: &dyn EnvManager) -> ValidationResult {
    match env_manager.run_in_env(env, repo_path, command, VALIDATION_TIMEOUT).await {
        Ok(out) => ValidationResult {
            command: command.to_string(),
            exit_code: out.exit_code,
            timed_out: out.timed_out,
        },
        Err(_) => {
            let mut parts = command.split_whitespace();
            let program = parts.next().unwrap_or(command);
            let args: Vec<&str> = parts.collect();
            let spec = SubprocessSpec::new(program, args).cwd(repo_path).timeout(VALIDATION_TIMEOUT);
            match subprocess::run(spec).await {
                Ok(out) => ValidationResult {
                    command: command.to_string(),
                    exit_code: out.exit_code,
                    timed_out: out.timed_out,
                },
                Err(_) => ValidationResult {
                    command: command.to_string(),
                    exit_code: None,
                    timed_out: false,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_policy_allows_paths_under_allowed_root() {
        let changed = vec!["src/lib.rs".to_string()];
        assert!(path_policy_violation(&changed, &["src".to_string()], &[]).is_none());
    }

    #[test]
    fn path_policy_rejects_paths_outside_allowed_root() {
        let changed = vec!["docs/notes.md".to_string()];
        assert!(path_policy_violation(&changed, &["src".to_string()], &[]).is_some());
    }

    #[test]
    fn deny_root_wins_even_if_also_allowed() {
        let changed = vec!["src/secrets/key.rs".to_string()];
        let violation = path_policy_violation(&changed, &["src".to_string()], &["src/secrets".to_string()]);
        assert!(violation.is_some());
    }

    #[test]
    fn empty_allowed_roots_means_unrestricted() {
        let changed = vec!["anywhere/file.rs".to_string()];
        assert!(path_policy_violation(&changed, &[], &[]).is_none());
    }

    #[test]
    fn test_command_detection_matches_known_runners() {
        assert!(is_test_command("pytest tests/"));
        assert!(is_test_command("cargo test"));
        assert!(!is_test_command("ruff check ."));
    }
}
