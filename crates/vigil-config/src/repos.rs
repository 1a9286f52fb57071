//! `repos.toml`: `[repos.<repo_id>]` tables parsed into `RepoPolicy`, plus
//! `[repo_groups.<name>]` named unions of repo ids used by `--repos` /
//! `--group` CLI selectors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use vigil_core::types::{NotebookOutputPolicy, RepoPolicy};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
struct RawRepoEntry {
    path: PathBuf,
    base_branch: String,
    env: Option<String>,
    #[serde(default)]
    allowed_roots: Vec<String>,
    #[serde(default)]
    deny_roots: Vec<String>,
    #[serde(default)]
    notebook_roots: Vec<String>,
    #[serde(default)]
    validation_commands: Vec<String>,
    #[serde(default)]
    notebook_output_policy: Option<NotebookOutputPolicyRaw>,
    #[serde(default)]
    dirty_ignore_globs: Vec<String>,
    #[serde(default)]
    dirty_cleanup: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NotebookOutputPolicyRaw {
    Strip,
    Keep,
}

impl From<NotebookOutputPolicyRaw> for NotebookOutputPolicy {
    fn from(raw: NotebookOutputPolicyRaw) -> Self {
        match raw {
            NotebookOutputPolicyRaw::Strip => NotebookOutputPolicy::Strip,
            NotebookOutputPolicyRaw::Keep => NotebookOutputPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawReposToml {
    #[serde(default)]
    repos: BTreeMap<String, RawRepoEntry>,
    #[serde(default)]
    repo_groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct RepoGroup {
    pub name: String,
    pub repo_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReposToml {
    pub repos: BTreeMap<String, RepoPolicy>,
    pub repo_groups: Vec<RepoGroup>,
}

impl ReposToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let raw: RawReposToml = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut repos = BTreeMap::new();
        for (repo_id, entry) in raw.repos {
            validate_repo_path(path, &repo_id, &entry.path)?;
            validate_roots(path, &repo_id, &entry.allowed_roots, &entry.deny_roots)?;
            check_reachable(path, &repo_id, &entry.allowed_roots, &entry.deny_roots, ".beads")?;
            check_reachable(path, &repo_id, &entry.allowed_roots, &entry.deny_roots, "docs/runs")?;

            let policy = RepoPolicy {
                repo_id: repo_id.clone(),
                path: entry.path,
                base_branch: entry.base_branch,
                env: entry.env,
                allowed_roots: entry.allowed_roots,
                deny_roots: entry.deny_roots,
                notebook_roots: entry.notebook_roots,
                validation_commands: entry.validation_commands,
                notebook_output_policy: entry
                    .notebook_output_policy
                    .map(Into::into)
                    .unwrap_or(NotebookOutputPolicy::Strip),
                dirty_ignore_globs: entry.dirty_ignore_globs,
                dirty_cleanup: entry.dirty_cleanup,
            };
            repos.insert(repo_id, policy);
        }

        let mut repo_groups = Vec::new();
        for (name, repo_ids) in raw.repo_groups {
            for repo_id in &repo_ids {
                if !repos.contains_key(repo_id) {
                    return Err(ConfigError::UnknownBeadId {
                        path: path.to_path_buf(),
                        bead_id: format!("repo_group {name:?} references unknown repo {repo_id:?}"),
                    });
                }
            }
            repo_groups.push(RepoGroup { name, repo_ids });
        }

        Ok(ReposToml { repos, repo_groups })
    }
}

/// A repo's own filesystem path, unlike `allowed_roots`/`deny_roots`, must
/// actually resolve to something on disk: absolute, existing, a directory.
fn validate_repo_path(path: &Path, repo_id: &str, repo_path: &Path) -> Result<(), ConfigError> {
    if !repo_path.is_absolute() {
        return Err(ConfigError::RepoPathInvalid {
            path: path.to_path_buf(),
            repo_id: repo_id.to_string(),
            reason: format!("must be an absolute path, got {repo_path:?}"),
        });
    }
    if !repo_path.exists() {
        return Err(ConfigError::RepoPathInvalid {
            path: path.to_path_buf(),
            repo_id: repo_id.to_string(),
            reason: format!("does not exist: {repo_path:?}"),
        });
    }
    if !repo_path.is_dir() {
        return Err(ConfigError::RepoPathInvalid {
            path: path.to_path_buf(),
            repo_id: repo_id.to_string(),
            reason: format!("must be a directory, got {repo_path:?}"),
        });
    }
    Ok(())
}

/// `allowed_roots`/`deny_roots` entries are repo-relative glob roots, not
/// filesystem paths, but they must still be free of `..` escapes.
fn validate_roots(
    path: &Path,
    repo_id: &str,
    allowed_roots: &[String],
    deny_roots: &[String],
) -> Result<(), ConfigError> {
    for root in allowed_roots.iter().chain(deny_roots.iter()) {
        if root.split('/').any(|seg| seg == "..") {
            return Err(ConfigError::PathNotAbsoluteOrContainsDotDot {
                path: path.to_path_buf(),
                value: format!("repos.{repo_id}: {root}"),
            });
        }
    }
    Ok(())
}

/// `.beads` and `docs/runs` must be reachable under `allowed_roots` (or
/// `allowed_roots` empty, meaning everything is allowed) and must not be
/// covered by any `deny_roots` prefix.
fn check_reachable(
    path: &Path,
    repo_id: &str,
    allowed_roots: &[String],
    deny_roots: &[String],
    target: &str,
) -> Result<(), ConfigError> {
    let under_allowed =
        allowed_roots.is_empty() || allowed_roots.iter().any(|root| is_prefix_of(root, target));
    let under_denied = deny_roots.iter().any(|root| is_prefix_of(root, target));

    if !under_allowed || under_denied {
        return Err(ConfigError::OutputsUnreachable {
            path: path.to_path_buf(),
            dir: format!("repos.{repo_id}: {target}"),
        });
    }
    Ok(())
}

fn is_prefix_of(root: &str, target: &str) -> bool {
    let root = root.trim_end_matches('/');
    target == root || target.starts_with(&format!("{root}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vigil-repos-toml-test-{}-{}.toml",
            std::process::id(),
            rand_suffix()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    /// An absolute, existing directory every test can point a repo's
    /// `path` at, TOML-quoted.
    fn existing_dir_toml() -> String {
        format!("{:?}", std::env::temp_dir())
    }

    #[test]
    fn parses_repo_and_group() {
        let dir = existing_dir_toml();
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"

[repos.gadgets]
path = {dir}
base_branch = "main"

[repo_groups]
all = ["widgets", "gadgets"]
"#,
        ));
        let parsed = ReposToml::load(&path).unwrap();
        assert_eq!(parsed.repos.len(), 2);
        assert_eq!(parsed.repo_groups.len(), 1);
        assert_eq!(parsed.repo_groups[0].repo_ids, vec!["widgets", "gadgets"]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn relative_repo_path_is_rejected() {
        let path = write_tmp(
            r#"
[repos.widgets]
path = "relative/widgets"
base_branch = "main"
"#,
        );
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::RepoPathInvalid { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn nonexistent_repo_path_is_rejected() {
        let dir = format!("{:?}", std::env::temp_dir().join("vigil-repos-toml-test-does-not-exist"));
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"
"#,
        ));
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::RepoPathInvalid { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn repo_path_that_is_a_file_not_a_directory_is_rejected() {
        let file_path = write_tmp("not a repo");
        let dir = format!("{:?}", &file_path);
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"
"#,
        ));
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::RepoPathInvalid { .. }));
        let _ = std::fs::remove_file(&file_path);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn dotdot_in_root_is_rejected() {
        let dir = existing_dir_toml();
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"
allowed_roots = ["src/../../etc"]
"#,
        ));
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::PathNotAbsoluteOrContainsDotDot { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn beads_dir_denied_is_rejected() {
        let dir = existing_dir_toml();
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"
deny_roots = [".beads"]
"#,
        ));
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::OutputsUnreachable { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_repo_in_group_is_rejected() {
        let dir = existing_dir_toml();
        let path = write_tmp(&format!(
            r#"
[repos.widgets]
path = {dir}
base_branch = "main"

[repo_groups]
all = ["widgets", "ghost"]
"#,
        ));
        let err = ReposToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBeadId { .. }));
        let _ = std::fs::remove_file(path);
    }
}
