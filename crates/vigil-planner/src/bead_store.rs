//! The bead-store CLI (`bd`) as an external collaborator: a trait so the
//! planner and executor can be tested against a fake, plus the real
//! subprocess-backed implementation that shells out to `bd`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use vigil_core::types::{BeadStatus, ReadyBead};
use vigil_harness::subprocess::{self, SubprocessError, SubprocessSpec};

#[derive(Debug, thiserror::Error)]
pub enum BeadCliError {
    #[error("bead-store CLI not found on PATH")]
    NotFound,
    #[error("bead-store CLI `{command}` failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("bead-store CLI `{command}` produced unparseable output: {detail}")]
    MalformedOutput { command: String, detail: String },
}

impl From<SubprocessError> for BeadCliError {
    fn from(err: SubprocessError) -> Self {
        match err {
            SubprocessError::NotFound { .. } => BeadCliError::NotFound,
            SubprocessError::SpawnFailed { program, source } => BeadCliError::CommandFailed {
                command: program,
                exit_code: None,
                stderr: source.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait BeadStore: Send + Sync {
    async fn init(&self) -> Result<(), BeadCliError>;
    async fn ready(&self, limit: u32) -> Result<Vec<ReadyBead>, BeadCliError>;
    async fn status(&self, bead_id: &str) -> Result<BeadStatus, BeadCliError>;
    async fn update_status(&self, bead_id: &str, status: &str, notes: Option<&str>) -> Result<(), BeadCliError>;
    async fn add_note(&self, bead_id: &str, note: &str) -> Result<(), BeadCliError>;
    async fn close(&self, bead_id: &str, reason: &str) -> Result<(), BeadCliError>;
    async fn dep_add(&self, bead_id: &str, dep_id: &str, dep_type: &str) -> Result<(), BeadCliError>;
    async fn doctor(&self) -> Result<String, BeadCliError>;
    async fn sync(&self) -> Result<String, BeadCliError>;
    /// Bead ids that depend on `bead_id` (the `blocks` edge, reversed).
    async fn dependents(&self, bead_id: &str) -> Result<Vec<String>, BeadCliError>;
    /// Parent epic id, if this bead is a parent-child child.
    async fn parent(&self, bead_id: &str) -> Result<Option<String>, BeadCliError>;
    /// `(bead_id, status)` for every parent-child child of `parent_id`.
    async fn children(&self, parent_id: &str) -> Result<Vec<(String, BeadStatus)>, BeadCliError>;
}

/// Shells out to the `bd` binary in `repo_path`.
pub struct BdCli {
    pub repo_path: PathBuf,
    pub timeout: Duration,
}

impl BdCli {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<vigil_harness::subprocess::CapturedOutput, BeadCliError> {
        let spec = SubprocessSpec::new("bd", args.iter().map(|s| s.to_string()))
            .cwd(&self.repo_path)
            .timeout(self.timeout);
        let out = subprocess::run(spec).await?;
        if out.timed_out || out.exit_code != Some(0) {
            return Err(BeadCliError::CommandFailed {
                command: args.join(" "),
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        Ok(out)
    }

    /// `bd` may interleave non-JSON progress lines on stdout; find the
    /// first line that parses as JSON.
    fn loose_json(command: &str, stdout: &str) -> Result<serde_json::Value, BeadCliError> {
        for line in stdout.lines().rev() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
                return Ok(v);
            }
        }
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(stdout.trim()) {
            return Ok(v);
        }
        Err(BeadCliError::MalformedOutput {
            command: command.to_string(),
            detail: "no JSON line found in stdout".to_string(),
        })
    }
}

#[async_trait]
impl BeadStore for BdCli {
    async fn init(&self) -> Result<(), BeadCliError> {
        self.run(&["init", "--quiet"]).await.map(|_| ())
    }

    async fn ready(&self, limit: u32) -> Result<Vec<ReadyBead>, BeadCliError> {
        let limit_str = limit.to_string();
        let out = self.run(&["ready", "--json", "--limit", &limit_str]).await?;
        let value = Self::loose_json("ready --json", &out.stdout)?;
        let items = value.as_array().cloned().unwrap_or_default();
        let mut beads = Vec::with_capacity(items.len());
        for item in items {
            let bead: ReadyBead = serde_json::from_value(item).map_err(|e| BeadCliError::MalformedOutput {
                command: "ready --json".into(),
                detail: e.to_string(),
            })?;
            beads.push(bead);
        }
        Ok(beads)
    }

    async fn status(&self, bead_id: &str) -> Result<BeadStatus, BeadCliError> {
        let out = self.run(&["show", bead_id, "--json"]).await?;
        let value = Self::loose_json("show --json", &out.stdout)?;
        let status_str = value
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or_else(|| BeadCliError::MalformedOutput {
                command: "show --json".into(),
                detail: "missing `status` field".into(),
            })?;
        match status_str {
            "open" => Ok(BeadStatus::Open),
            "in_progress" => Ok(BeadStatus::InProgress),
            "blocked" => Ok(BeadStatus::Blocked),
            "closed" => Ok(BeadStatus::Closed),
            other => Err(BeadCliError::MalformedOutput {
                command: "show --json".into(),
                detail: format!("unrecognized status {other:?}"),
            }),
        }
    }

    async fn update_status(&self, bead_id: &str, status: &str, notes: Option<&str>) -> Result<(), BeadCliError> {
        let mut args = vec!["update", bead_id, "--status", status, "--json"];
        if let Some(n) = notes {
            args.push("--notes");
            args.push(n);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn add_note(&self, bead_id: &str, note: &str) -> Result<(), BeadCliError> {
        self.run(&["update", bead_id, "--notes", note, "--json"]).await.map(|_| ())
    }

    async fn close(&self, bead_id: &str, reason: &str) -> Result<(), BeadCliError> {
        self.run(&["close", bead_id, "--reason", reason]).await.map(|_| ())
    }

    async fn dep_add(&self, bead_id: &str, dep_id: &str, dep_type: &str) -> Result<(), BeadCliError> {
        self.run(&["dep", "add", bead_id, dep_id, "--type", dep_type])
            .await
            .map(|_| ())
    }

    async fn doctor(&self) -> Result<String, BeadCliError> {
        Ok(self.run(&["doctor", "--json"]).await?.stdout)
    }

    async fn sync(&self) -> Result<String, BeadCliError> {
        Ok(self.run(&["sync", "--json"]).await?.stdout)
    }

    async fn dependents(&self, bead_id: &str) -> Result<Vec<String>, BeadCliError> {
        let out = self.run(&["show", bead_id, "--json"]).await?;
        let value = Self::loose_json("show --json", &out.stdout)?;
        Ok(value
            .get("dependents")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    async fn parent(&self, bead_id: &str) -> Result<Option<String>, BeadCliError> {
        let out = self.run(&["show", bead_id, "--json"]).await?;
        let value = Self::loose_json("show --json", &out.stdout)?;
        Ok(value
            .get("parent")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<(String, BeadStatus)>, BeadCliError> {
        let out = self.run(&["show", parent_id, "--json"]).await?;
        let value = Self::loose_json("show --json", &out.stdout)?;
        let children = value.get("children").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut result = Vec::new();
        for child in children {
            let id = child.get("bead_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let status_str = child.get("status").and_then(|v| v.as_str()).unwrap_or("open");
            let status = match status_str {
                "in_progress" => BeadStatus::InProgress,
                "blocked" => BeadStatus::Blocked,
                "closed" => BeadStatus::Closed,
                _ => BeadStatus::Open,
            };
            if !id.is_empty() {
                result.push((id, status));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_json_skips_progress_lines() {
        let stdout = "Syncing...\nFetching remote...\n[{\"bead_id\":\"bd-1\"}]\n";
        let value = BdCli::loose_json("ready --json", stdout).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn loose_json_errors_on_no_json() {
        let err = BdCli::loose_json("doctor", "all good, nothing to report\n").unwrap_err();
        assert!(matches!(err, BeadCliError::MalformedOutput { .. }));
    }
}
