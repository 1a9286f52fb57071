//! Best-effort maintenance for manual runs that found no actionable work.
//!
//! Neither `doctor` nor `sync` are allowed to fail a tick: a wedged bead
//! store is something for a human to notice in the logs, not a reason to
//! end the run early.

use tracing::{info, warn};

use vigil_config::ReposToml;
use vigil_planner::{BdCli, BeadStore};

/// Run `doctor` then `sync` against every selected repo's bead store,
/// logging the outcome of each. Errors are swallowed after logging.
pub async fn run_best_effort(repos: &ReposToml, repo_ids: &[String]) {
    for repo_id in repo_ids {
        let Some(policy) = repos.repos.get(repo_id) else {
            continue;
        };
        let store = BdCli::new(&policy.path);

        match store.doctor().await {
            Ok(report) => info!(repo_id = %repo_id, "doctor: {}", report.trim()),
            Err(e) => warn!(repo_id = %repo_id, error = %e, "doctor failed"),
        }

        match store.sync().await {
            Ok(report) => info!(repo_id = %repo_id, "sync: {}", report.trim()),
            Err(e) => warn!(repo_id = %repo_id, error = %e, "sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vigil_core::types::{NotebookOutputPolicy, RepoPolicy};

    fn repos_with(ids: &[&str]) -> ReposToml {
        let mut repos = BTreeMap::new();
        for id in ids {
            repos.insert(
                id.to_string(),
                RepoPolicy {
                    repo_id: id.to_string(),
                    path: "/nonexistent/path/for/tests".into(),
                    base_branch: "main".into(),
                    env: None,
                    allowed_roots: vec![],
                    deny_roots: vec![],
                    notebook_roots: vec![],
                    validation_commands: vec![],
                    notebook_output_policy: NotebookOutputPolicy::Strip,
                    dirty_ignore_globs: vec![],
                    dirty_cleanup: false,
                },
            );
        }
        ReposToml { repos, repo_groups: vec![] }
    }

    #[tokio::test]
    async fn unknown_repo_ids_are_skipped_without_panicking() {
        let repos = repos_with(&["widgets"]);
        run_best_effort(&repos, &["ghost".to_string()]).await;
    }

    #[tokio::test]
    async fn missing_bd_binary_does_not_panic() {
        let repos = repos_with(&["widgets"]);
        run_best_effort(&repos, &["widgets".to_string()]).await;
    }
}
