//! Canonical layout of the cache directory and its per-run/per-repo
//! artifact paths. Pure — no I/O happens here, only path arithmetic, so the
//! rest of the workspace can agree on "where does X live" without each
//! caller re-deriving it.

use std::env;
use std::path::PathBuf;

/// Resolves the root cache directory.
///
/// Precedence: `VIGIL_CACHE_DIR` env override, then `$XDG_CACHE_HOME/vigil`,
/// then `~/.cache/vigil`.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = env::var("VIGIL_CACHE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(xdg) = env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("vigil");
        }
    }
    let home = env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".cache").join("vigil")
}

/// Path to the run-lifecycle lock file.
pub fn run_lock_path(cache: &std::path::Path) -> PathBuf {
    cache.join("run.lock")
}

/// Path to the `current_run.json` marker.
pub fn current_run_path(cache: &std::path::Path) -> PathBuf {
    cache.join("current_run.json")
}

/// Path to the `cycle_in_progress.json` orphan-detection marker.
pub fn cycle_in_progress_path(cache: &std::path::Path) -> PathBuf {
    cache.join("cycle_in_progress.json")
}

/// Path to a given repo's advisory execution lock.
pub fn repo_lock_path(cache: &std::path::Path, repo_id: &str) -> PathBuf {
    cache.join("repo_locks").join(format!("{repo_id}.lock"))
}

/// Directory holding all artifacts for one run.
pub fn run_dir(cache: &std::path::Path, run_id: &str) -> PathBuf {
    cache.join("runs").join(run_id)
}

pub fn run_json_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("run.json")
}

pub fn run_end_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("run_end.json")
}

pub fn orchestrator_log_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("orchestrator.log")
}

pub fn run_summary_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("run_summary.json")
}

pub fn final_review_json_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("final_review.json")
}

pub fn final_review_md_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("final_review.md")
}

pub fn run_signoff_json_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("run_signoff.json")
}

pub fn run_signoff_md_path(cache: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(cache, run_id).join("run_signoff.md")
}

pub fn repo_deck_path(cache: &std::path::Path, run_id: &str, repo_id: &str, date: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.deck.{date}.json"))
}

pub fn repo_summary_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.summary.json"))
}

pub fn repo_exec_log_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.exec.log"))
}

pub fn repo_events_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.events.jsonl"))
}

pub fn repo_stdout_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.stdout.log"))
}

pub fn repo_stderr_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.stderr.log"))
}

pub fn planning_audit_json_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.planning_audit.json"))
}

pub fn planning_audit_md_path(cache: &std::path::Path, run_id: &str, repo_id: &str) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.planning_audit.md"))
}

pub fn agent_prompt_path(
    cache: &std::path::Path,
    run_id: &str,
    repo_id: &str,
    bead_id: &str,
    attempt: u32,
) -> PathBuf {
    run_dir(cache, run_id).join(format!("{repo_id}.{bead_id}.prompt.{attempt}.txt"))
}

pub fn final_codex_review_path(
    cache: &std::path::Path,
    run_id: &str,
    repo_id: &str,
    suffix: Option<&str>,
) -> PathBuf {
    match suffix {
        Some(s) => run_dir(cache, run_id).join(format!("final_codex_review.{repo_id}.{s}.json")),
        None => run_dir(cache, run_id).join(format!("final_codex_review.{repo_id}.json")),
    }
}

/// Path to the human-readable run report written inside the managed repo
/// itself (not the cache dir).
pub fn repo_run_report_path(repo_path: &std::path::Path, run_id: &str) -> PathBuf {
    repo_path.join("docs").join("runs").join(format!("{run_id}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn run_dir_nests_under_runs() {
        let cache = Path::new("/cache");
        assert_eq!(
            run_dir(cache, "20250115-023000-abcd1234"),
            Path::new("/cache/runs/20250115-023000-abcd1234")
        );
    }

    #[test]
    fn repo_lock_path_is_scoped_per_repo() {
        let cache = Path::new("/cache");
        assert_eq!(
            repo_lock_path(cache, "my-repo"),
            Path::new("/cache/repo_locks/my-repo.lock")
        );
    }

    #[test]
    fn artifact_paths_are_distinct_per_repo() {
        let cache = Path::new("/cache");
        let run_id = "r1";
        let a = repo_summary_path(cache, run_id, "repo-a");
        let b = repo_summary_path(cache, run_id, "repo-b");
        assert_ne!(a, b);
    }

    #[test]
    fn cache_dir_honors_env_override() {
        // SAFETY: test-only, single-threaded within this process's test runner
        // for this particular var; restored immediately after read.
        unsafe {
            std::env::set_var("VIGIL_CACHE_DIR", "/tmp/vigil-test-override");
        }
        assert_eq!(cache_dir(), PathBuf::from("/tmp/vigil-test-override"));
        unsafe {
            std::env::remove_var("VIGIL_CACHE_DIR");
        }
    }
}
