//! The Cycle Controller (C10): one tick across every selected repo under
//! one active run.
//!
//! Ordering follows §4.10 exactly: acquire the run lock, ensure a run is
//! active, resolve the repo selection, dispatch a bounded pool of repo
//! executors, fold the results back into the run's counters, and only
//! then decide whether this tick ended the run.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use vigil_audit::capture_tool_versions;
use vigil_audit::summary::{RepoSummary, RunSummary};
use vigil_config::{BeadContractsToml, ReposToml};
use vigil_core::atomic::AtomicError;
use vigil_core::lifecycle::{self, EnsureOutcome, LifecycleError, TickOutcome};
use vigil_core::lockfile::{ExclusiveLock, LockError};
use vigil_core::night_window::NightWindow;
use vigil_core::paths;
use vigil_core::run_state::RunMode;
use vigil_core::types::{ContractOverlayPatch, RepoPolicy, TickBudget};
use vigil_exec::agent::AgentCli;
use vigil_exec::env_manager::EnvManager;
use vigil_exec::executor::{ExecutorConfig, RepoExecutor, RepoTickResult};
use vigil_harness::allowlist::ValidationAllowlist;
use vigil_planner::BdCli;

use crate::maintenance;

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Artifact(#[from] AtomicError),
    #[error(transparent)]
    Review(#[from] crate::review::ReviewError),
}

/// Which repos a cycle should touch this tick.
#[derive(Debug, Clone)]
pub enum RepoSelection {
    All,
    Ids(Vec<String>),
    Group(String),
}

impl RepoSelection {
    pub fn resolve(&self, repos: &ReposToml) -> Vec<String> {
        let mut ids: Vec<String> = match self {
            RepoSelection::All => repos.repos.keys().cloned().collect(),
            RepoSelection::Ids(ids) => ids.iter().filter(|id| repos.repos.contains_key(*id)).cloned().collect(),
            RepoSelection::Group(name) => repos
                .repo_groups
                .iter()
                .find(|g| &g.name == name)
                .map(|g| g.repo_ids.clone())
                .unwrap_or_default(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

/// `max_parallel = min(#repos, cpu, 4)`, never below 1.
pub fn default_max_parallel(n_repos: usize) -> usize {
    let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    n_repos.clamp(1, cpu.min(4))
}

/// Everything the Cycle Controller needs to run one tick. Constructed by
/// the CLI layer from loaded config.
#[derive(Clone)]
pub struct CycleParams {
    pub cache_dir: PathBuf,
    pub mode: RunMode,
    pub night_window: NightWindow,
    pub manual_ttl: ChronoDuration,
    pub idle_ticks_to_end: u64,
    pub review_every_n_beads: u64,
    pub tick_duration: ChronoDuration,
    pub selection: RepoSelection,
    pub focus: Option<String>,
    pub replan: bool,
    pub max_parallel: Option<usize>,
    pub repos: ReposToml,
    pub overlays: HashMap<String, BeadContractsToml>,
    pub executor_config: ExecutorConfig,
    pub agent: Arc<AgentCli>,
    pub env_manager: Arc<dyn EnvManager>,
    pub allowlist: Arc<ValidationAllowlist>,
    pub ai_model: String,
    pub ai_reasoning_effort: String,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// The run wasn't active (outside the night window for automated mode).
    OutsideWindow,
    /// One tick ran; `ended` is set when this tick closed out the run.
    Ticked {
        run_id: String,
        beads_attempted: u64,
        actionable_work_found: bool,
        ended: bool,
    },
}

pub async fn run_cycle(params: CycleParams) -> Result<CycleOutcome, CycleError> {
    let lock = ExclusiveLock::acquire(&paths::run_lock_path(&params.cache_dir))?;
    let result = run_cycle_locked(&params).await;
    lock.release();
    result
}

async fn run_cycle_locked(params: &CycleParams) -> Result<CycleOutcome, CycleError> {
    let now = Utc::now();
    let outcome = lifecycle::ensure_active_run(
        &params.cache_dir,
        params.mode,
        now,
        params.night_window,
        params.manual_ttl,
        params.idle_ticks_to_end,
    )?;

    let run = match outcome {
        EnsureOutcome::OutsideWindow => return Ok(CycleOutcome::OutsideWindow),
        EnsureOutcome::Active(run) => run,
    };

    let marker = lifecycle::CycleInProgress::for_current_process(&run.run_id, now);
    lifecycle::write_cycle_in_progress(&params.cache_dir, &marker)?;

    let repo_ids = params.selection.resolve(&params.repos);
    let tick = TickBudget::new(now, params.tick_duration);
    let max_parallel = params.max_parallel.unwrap_or_else(|| default_max_parallel(repo_ids.len().max(1)));

    info!(run_id = %run.run_id, repos = repo_ids.len(), max_parallel, "cycle starting");

    let run_id = run.run_id.clone();
    let mut per_repo_results: Vec<(String, RepoTickResult)> = stream::iter(repo_ids.iter().cloned())
        .map(|repo_id| dispatch_repo(params, &run_id, repo_id, &tick))
        .buffer_unordered(max_parallel.max(1))
        .collect()
        .await;
    per_repo_results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summaries = Vec::with_capacity(per_repo_results.len());
    let mut beads_attempted: u64 = 0;
    let mut actionable_work_found = false;
    for (repo_id, result) in &per_repo_results {
        if let RepoTickResult::Completed { attempts, .. } = result {
            beads_attempted += attempts.len() as u64;
            if !attempts.is_empty() {
                actionable_work_found = true;
            }
        }
        let tool_versions = tool_versions_for(params, repo_id, result).await;
        let summary = RepoSummary::from_tick_result(&run.run_id, repo_id, Utc::now(), result, tool_versions);
        vigil_audit::summary::write_repo_summary(&params.cache_dir, &run.run_id, repo_id, &summary)?;
        summaries.push(summary);
    }

    let run_summary = RunSummary::build(&run.run_id, Utc::now(), &summaries);
    vigil_audit::summary::write_run_summary(&params.cache_dir, &run.run_id, &run_summary)?;

    let tick_outcome = lifecycle::tick_run(
        &params.cache_dir,
        &run.run_id,
        Utc::now(),
        actionable_work_found,
        params.manual_ttl,
        params.idle_ticks_to_end,
        beads_attempted,
    )?;

    lifecycle::clear_cycle_in_progress(&params.cache_dir);

    let (ended, final_state) = match &tick_outcome {
        TickOutcome::Active(state) => (false, state.clone()),
        TickOutcome::Ended { state, .. } => (true, state.clone()),
    };

    if ended {
        crate::review::write_final_review(&params.cache_dir, &final_state, &summaries, &params.ai_model, &params.ai_reasoning_effort)?;
    } else if params.review_every_n_beads > 0 && final_state.review_due(params.review_every_n_beads) {
        crate::review::write_final_review(&params.cache_dir, &final_state, &summaries, &params.ai_model, &params.ai_reasoning_effort)?;
        vigil_core::lifecycle::mark_reviewed(&params.cache_dir, &final_state)?;
    }

    if params.mode == RunMode::Manual && !actionable_work_found {
        maintenance::run_best_effort(&params.repos, &repo_ids).await;
    }

    Ok(CycleOutcome::Ticked {
        run_id: run.run_id,
        beads_attempted,
        actionable_work_found,
        ended,
    })
}

async fn dispatch_repo(params: &CycleParams, run_id: &str, repo_id: String, tick: &TickBudget) -> (String, RepoTickResult) {
    let Some(policy) = params.repos.repos.get(&repo_id) else {
        return (
            repo_id,
            RepoTickResult::Skipped {
                reason: vigil_core::types::RepoSkipReason::PlanningFailed,
                detail: "repo not present in repos.toml".to_string(),
            },
        );
    };

    let repo_lock_path = paths::repo_lock_path(&params.cache_dir, &repo_id);
    let lock = match ExclusiveLock::acquire(&repo_lock_path) {
        Ok(lock) => lock,
        Err(LockError::Busy(_)) | Err(LockError::AlreadyHeldByThisProcess(_)) => {
            return (
                repo_id,
                RepoTickResult::Skipped {
                    reason: vigil_core::types::RepoSkipReason::LockBusy,
                    detail: "another worker already holds this repo's lock".to_string(),
                },
            );
        }
        Err(e) => {
            warn!(repo_id = %repo_id, error = %e, "failed to acquire repo lock");
            return (
                repo_id,
                RepoTickResult::Skipped {
                    reason: vigil_core::types::RepoSkipReason::LockBusy,
                    detail: e.to_string(),
                },
            );
        }
    };

    let result = run_one_repo(params, run_id, policy, tick).await;
    lock.release();
    (repo_id, result)
}

async fn run_one_repo(params: &CycleParams, run_id: &str, policy: &RepoPolicy, tick: &TickBudget) -> RepoTickResult {
    let store = BdCli::new(&policy.path);
    let overlay_defaults: Option<&ContractOverlayPatch> = params
        .overlays
        .get(&policy.repo_id)
        .map(|bct| &bct.defaults);
    let empty = BTreeMap::new();
    let overlay_beads = params
        .overlays
        .get(&policy.repo_id)
        .map(|bct| &bct.beads)
        .unwrap_or(&empty);

    let executor = RepoExecutor {
        store: &store,
        agent: params.agent.as_ref(),
        env_manager: params.env_manager.as_ref(),
        allowlist: params.allowlist.as_ref(),
        cache_dir: &params.cache_dir,
    };

    executor
        .run_tick(
            run_id,
            policy,
            overlay_defaults,
            overlay_beads,
            params.focus.as_deref(),
            tick,
            &params.executor_config,
        )
        .await
}

async fn tool_versions_for(params: &CycleParams, repo_id: &str, result: &RepoTickResult) -> BTreeMap<String, String> {
    if let RepoTickResult::Completed { tool_versions, .. } = result {
        if !tool_versions.is_empty() {
            return tool_versions.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
    }
    let Some(policy) = params.repos.repos.get(repo_id) else {
        return BTreeMap::new();
    };
    capture_tool_versions(&policy.path, "bd", &params.agent.model, "conda").await
}
