//! Shared config-loading and collaborator-construction code every
//! subcommand needs: load `config/orchestrator.toml` and enforce the
//! unattended AI policy, load `config/repos.toml` and its per-repo
//! contract overlays, and build the external-collaborator handles
//! (`AgentCli`, `EnvManager`, `ValidationAllowlist`) from them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use vigil_audit::summary::{load_repo_summary, RepoSummaryOutcome};
use vigil_config::{BeadContractsToml, OrchestratorToml, ReposToml};
use vigil_core::atomic;
use vigil_core::paths;
use vigil_exec::agent::AgentCli;
use vigil_exec::env_manager::{CliEnvManager, EnvManager};
use vigil_harness::allowlist::ValidationAllowlist;

/// The loaded, policy-enforced configuration every subcommand starts from.
#[derive(Clone)]
pub struct LoadedConfig {
    pub ai: OrchestratorToml,
    pub repos: ReposToml,
    pub overlays: HashMap<String, BeadContractsToml>,
}

/// Load and validate `config/orchestrator.toml` and `config/repos.toml`
/// under `config_dir`, plus every repo's `bead_contracts/<repo_id>.toml`
/// overlay that actually exists on disk (overlays are optional per repo).
pub fn load_config(config_dir: &Path) -> Result<LoadedConfig> {
    let orchestrator_path = OrchestratorToml::default_path(config_dir);
    let ai = OrchestratorToml::load(&orchestrator_path)
        .with_context(|| format!("loading {}", orchestrator_path.display()))?;
    ai.enforce_policy().with_context(|| "unattended AI policy check failed")?;

    let repos_path = config_dir.join("repos.toml");
    let repos = ReposToml::load(&repos_path).with_context(|| format!("loading {}", repos_path.display()))?;

    let mut overlays = HashMap::new();
    for repo_id in repos.repos.keys() {
        let overlay_path = config_dir.join("bead_contracts").join(format!("{repo_id}.toml"));
        if !overlay_path.exists() {
            continue;
        }
        let overlay = BeadContractsToml::load(&overlay_path)
            .with_context(|| format!("loading {}", overlay_path.display()))?;
        overlays.insert(repo_id.clone(), overlay);
    }

    Ok(LoadedConfig { ai, repos, overlays })
}

pub fn build_agent(ai: &OrchestratorToml) -> Arc<AgentCli> {
    Arc::new(AgentCli::new(ai.ai.model.clone(), ai.ai.reasoning_effort.clone()))
}

pub fn build_env_manager() -> Arc<dyn EnvManager> {
    Arc::new(CliEnvManager::default())
}

pub fn build_allowlist() -> Arc<ValidationAllowlist> {
    Arc::new(ValidationAllowlist::new())
}

/// `--max-parallel` if given, else the `MAX_PARALLEL` env var, else `None`
/// (letting the Cycle Controller fall back to its own default).
pub fn resolve_max_parallel(flag: Option<usize>) -> Option<usize> {
    flag.or_else(|| std::env::var("MAX_PARALLEL").ok().and_then(|v| v.parse().ok()))
}

/// Resolves the cache directory: `--cache-dir` if given, else
/// `vigil_core::paths::cache_dir()`'s own env/XDG/home precedence.
pub fn resolve_cache_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(vigil_core::paths::cache_dir)
}

/// `--final-review-codex`: after a run ends, run a read-only agent pass
/// against every non-skipped repo this tick touched and append the
/// transcripts to `final_review.md`. Never blocks a run from ending —
/// failures here are logged and swallowed.
pub async fn run_optional_codex_review(
    config: &LoadedConfig,
    agent: &AgentCli,
    cache_dir: &Path,
    run_id: &str,
    repo_ids: &[String],
) {
    let mut summaries = Vec::new();
    for repo_id in repo_ids {
        let Some(policy) = config.repos.repos.get(repo_id) else {
            continue;
        };
        match load_repo_summary(cache_dir, run_id, repo_id) {
            Ok(Some(summary)) => {
                summaries.push((policy, summary));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(repo_id = %repo_id, error = %e, "failed to load repo summary for codex review"),
        }
    }
    let pairs: Vec<(&vigil_core::types::RepoPolicy, &RepoSummaryOutcome)> =
        summaries.iter().map(|(p, s)| (*p, &s.outcome)).collect();

    if pairs.is_empty() {
        return;
    }

    let timeout = std::time::Duration::from_secs(600);
    match vigil_cycle::review::run_review_only_pass(agent, &pairs, timeout).await {
        Ok(transcripts) if !transcripts.is_empty() => {
            let md_path = paths::final_review_md_path(cache_dir, run_id);
            let mut body = String::from("\n## Review-only agent pass\n\n");
            for t in transcripts {
                body.push_str(&t);
            }
            if let Err(e) = atomic::append_text(&md_path, &body) {
                tracing::warn!(run_id = %run_id, error = %e, "failed to append codex review transcript");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(run_id = %run_id, error = %e, "review-only codex pass failed"),
    }
}
