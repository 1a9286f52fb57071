//! Tool version capture: one line per external collaborator, on a short
//! leash. A missing or hanging tool never blocks the report — it just
//! shows up as `<unavailable>`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use vigil_harness::subprocess::{self, SubprocessSpec};

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const UNAVAILABLE: &str = "<unavailable>";

async fn version_line(program: &str, args: &[&str], cwd: Option<&Path>) -> String {
    let mut spec = SubprocessSpec::new(program, args.iter().map(|s| s.to_string())).timeout(VERSION_TIMEOUT);
    if let Some(cwd) = cwd {
        spec = spec.cwd(cwd);
    }
    match subprocess::run(spec).await {
        Ok(out) if out.success() => out.stdout.lines().next().unwrap_or(UNAVAILABLE).trim().to_string(),
        _ => UNAVAILABLE.to_string(),
    }
}

/// Capture `git --version`, the bead-store CLI's `--version`, the agent
/// CLI's `--version`, and the environment manager's `--version`, each
/// collapsed to a single line.
pub async fn capture_tool_versions(
    repo_path: &Path,
    bead_store_binary: &str,
    agent_binary: &str,
    env_manager_binary: &str,
) -> BTreeMap<String, String> {
    let (git, bead_store, agent, env_manager) = tokio::join!(
        version_line("git", &["--version"], Some(repo_path)),
        version_line(bead_store_binary, &["--version"], Some(repo_path)),
        version_line(agent_binary, &["--version"], None),
        version_line(env_manager_binary, &["--version"], None),
    );

    let mut versions = BTreeMap::new();
    versions.insert("git".to_string(), git);
    versions.insert(bead_store_binary.to_string(), bead_store);
    versions.insert(agent_binary.to_string(), agent);
    versions.insert(env_manager_binary.to_string(), env_manager);
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_binary_reports_unavailable() {
        let line = version_line("vigil-definitely-not-a-real-binary", &["--version"], None).await;
        assert_eq!(line, UNAVAILABLE);
    }

    #[tokio::test]
    async fn capture_returns_an_entry_per_tool() {
        let versions = capture_tool_versions(
            Path::new("."),
            "bd",
            "codex",
            "conda",
        )
        .await;
        assert_eq!(versions.len(), 4);
        assert!(versions.contains_key("git"));
        assert!(versions.contains_key("bd"));
    }
}
