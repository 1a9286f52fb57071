//! Git as a subprocess contract: porcelain status, fetch, branch
//! management, diffs, and commits. No libgit2 bindings — every operation is
//! a `git` invocation through the shared subprocess wrapper, matching the
//! external-interface contract of shelling out rather than linking.

use std::path::PathBuf;
use std::time::Duration;

use vigil_harness::subprocess::{self, SubprocessSpec};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git not found on PATH")]
    NotFound,
    #[error("git {command} failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl From<subprocess::SubprocessError> for GitError {
    fn from(err: subprocess::SubprocessError) -> Self {
        match err {
            subprocess::SubprocessError::NotFound { .. } => GitError::NotFound,
            subprocess::SubprocessError::SpawnFailed { source, .. } => GitError::CommandFailed {
                command: "spawn".into(),
                exit_code: None,
                stderr: source.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangedPath {
    pub path: String,
    pub lines_added: u64,
}

pub struct GitRepo {
    pub path: PathBuf,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let spec = SubprocessSpec::new("git", args.iter().map(|s| s.to_string()))
            .cwd(&self.path)
            .timeout(GIT_TIMEOUT);
        let out = subprocess::run(spec).await?;
        if out.timed_out || out.exit_code != Some(0) {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    pub async fn version(&self) -> Option<String> {
        let spec = SubprocessSpec::new("git", ["--version"]).timeout(Duration::from_secs(5));
        subprocess::run(spec)
            .await
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout.lines().next().unwrap_or_default().to_string())
    }

    pub async fn is_detached_head(&self) -> Result<bool, GitError> {
        let spec = SubprocessSpec::new("git", ["symbolic-ref", "-q", "HEAD"])
            .cwd(&self.path)
            .timeout(GIT_TIMEOUT);
        let out = subprocess::run(spec).await?;
        Ok(out.exit_code != Some(0))
    }

    pub async fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    pub async fn fetch_all_prune(&self) -> Result<(), GitError> {
        self.run(&["fetch", "--all", "--prune"]).await.map(|_| ())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let spec = SubprocessSpec::new(
            "git",
            ["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .cwd(&self.path)
        .timeout(GIT_TIMEOUT);
        let out = subprocess::run(spec).await?;
        Ok(out.exit_code == Some(0))
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", branch]).await.map(|_| ())
    }

    pub async fn checkout_new(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-b", branch]).await.map(|_| ())
    }

    /// `git status --porcelain -z`, returning (status code, path) pairs.
    /// The status code is the raw two-character `XY` prefix (`"??"` for
    /// untracked, `" M"`/`"M "` etc. for modified/staged).
    async fn status_entries(&self) -> Result<Vec<(String, String)>, GitError> {
        let spec = SubprocessSpec::new("git", ["status", "--porcelain", "-z"])
            .cwd(&self.path)
            .timeout(GIT_TIMEOUT);
        let out = subprocess::run(spec).await?;
        if out.timed_out || out.exit_code != Some(0) {
            return Err(GitError::CommandFailed {
                command: "status --porcelain -z".into(),
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        let mut entries = Vec::new();
        for raw in out.stdout.split('\0').filter(|s| !s.is_empty()) {
            if raw.len() < 3 {
                continue;
            }
            entries.push((raw[..2].to_string(), raw[3..].to_string()));
        }
        Ok(entries)
    }

    /// `git status --porcelain -z`, filtering entries whose path matches any
    /// of `ignore_globs`.
    pub async fn dirty_paths(&self, ignore_globs: &[String]) -> Result<Vec<String>, GitError> {
        Ok(self
            .status_entries()
            .await?
            .into_iter()
            .map(|(_, path)| path)
            .filter(|path| !matches_any_glob(path, ignore_globs))
            .collect())
    }

    pub async fn clean_untracked_ignored(&self, ignore_globs: &[String]) -> Result<(), GitError> {
        for path in self.dirty_paths(&[]).await? {
            if matches_any_glob(&path, ignore_globs) {
                let full = self.path.join(&path);
                let _ = tokio::fs::remove_file(&full).await;
            }
        }
        Ok(())
    }

    pub async fn add_all(&self) -> Result<(), GitError> {
        self.run(&["add", "-A"]).await.map(|_| ())
    }

    pub async fn commit(&self, subject: &str, body: &str) -> Result<String, GitError> {
        self.run(&["commit", "-m", subject, "-m", body]).await?;
        self.head_sha().await
    }

    /// Staged + unstaged numstat, plus untracked files (invisible to `git
    /// diff`), deduplicated by path. `lines_added` is the first numstat
    /// column for tracked changes; binary files report `-` and count as 0.
    /// An untracked file has no diff to read a line count from, so it
    /// contributes its on-disk line count instead (0 if it can't be read
    /// as text, e.g. a binary file or an untracked directory).
    pub async fn diff_numstat(&self) -> Result<Vec<ChangedPath>, GitError> {
        let staged = self.run(&["diff", "--numstat", "--staged"]).await?;
        let unstaged = self.run(&["diff", "--numstat"]).await?;
        let mut by_path = std::collections::HashMap::new();
        for line in staged.lines().chain(unstaged.lines()) {
            let mut cols = line.split('\t');
            let added = cols.next().unwrap_or("0");
            let _removed = cols.next();
            let path = cols.next().unwrap_or("").to_string();
            if path.is_empty() {
                continue;
            }
            let added: u64 = added.parse().unwrap_or(0);
            by_path.insert(path, added);
        }

        for (status, path) in self.status_entries().await? {
            if status != "??" || by_path.contains_key(&path) {
                continue;
            }
            let lines_added = tokio::fs::read_to_string(self.path.join(&path))
                .await
                .map(|text| text.lines().count() as u64)
                .unwrap_or(0);
            by_path.insert(path, lines_added);
        }

        Ok(by_path
            .into_iter()
            .map(|(path, lines_added)| ChangedPath { path, lines_added })
            .collect())
    }
}

fn matches_any_glob(path: &str, globs: &[String]) -> bool {
    globs.iter().any(|g| glob_match(g, path))
}

/// Minimal glob matcher supporting `*` (any run of chars) and `**`
/// (collapsed to the same as `*` since paths are already flat strings).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                let mut rest = &p[1..];
                while rest.first() == Some(&b'*') {
                    rest = &rest[1..];
                }
                (0..=t.len()).any(|i| helper(rest, &t[i..]))
            }
            Some(&c) => t.first() == Some(&c) && helper(&p[1..], &t[1..]),
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}
