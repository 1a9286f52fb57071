//! The environment manager as an external collaborator. The core only
//! needs three questions answered: is env X present, does env X match this
//! manifest, and can this validation command run inside env X. Exact CLI
//! names are encapsulated here so the executor never shells out directly.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use vigil_harness::subprocess::{self, CapturedOutput, SubprocessSpec};

#[derive(Debug, thiserror::Error)]
pub enum EnvManagerError {
    #[error("environment manager CLI not found on PATH")]
    NotFound,
    #[error("failed to ensure env {env}: {detail}")]
    EnsureFailed { env: String, detail: String },
}

impl From<subprocess::SubprocessError> for EnvManagerError {
    fn from(err: subprocess::SubprocessError) -> Self {
        match err {
            subprocess::SubprocessError::NotFound { .. } => EnvManagerError::NotFound,
            subprocess::SubprocessError::SpawnFailed { source, .. } => EnvManagerError::EnsureFailed {
                env: String::new(),
                detail: source.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait EnvManager: Send + Sync {
    /// Create or refresh `env` so its dependency manifests match the repo.
    /// No-op when `changed_manifest_paths` is empty.
    async fn ensure(
        &self,
        env: &str,
        allow_create: bool,
        changed_manifest_paths: &[String],
        cwd: &Path,
    ) -> Result<(), EnvManagerError>;

    async fn version(&self) -> Option<String>;

    /// Run `command` inside `env`.
    async fn run_in_env(
        &self,
        env: &str,
        cwd: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, EnvManagerError>;
}

/// Dependency manifests that trigger an env refresh when touched by a diff.
pub const DEPENDENCY_MANIFESTS: &[&str] = &[
    "pyproject.toml",
    "environment.yml",
    "environment.yaml",
    "requirements.txt",
    "package.json",
];

pub fn touches_dependency_manifest(changed_paths: &[String]) -> Vec<String> {
    changed_paths
        .iter()
        .filter(|p| {
            let name = Path::new(p).file_name().and_then(|n| n.to_str()).unwrap_or("");
            DEPENDENCY_MANIFESTS.contains(&name)
        })
        .cloned()
        .collect()
}

pub struct CliEnvManager {
    pub binary: String,
}

impl CliEnvManager {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for CliEnvManager {
    fn default() -> Self {
        Self::new("conda")
    }
}

#[async_trait]
impl EnvManager for CliEnvManager {
    async fn ensure(
        &self,
        env: &str,
        allow_create: bool,
        changed_manifest_paths: &[String],
        cwd: &Path,
    ) -> Result<(), EnvManagerError> {
        if changed_manifest_paths.is_empty() {
            return Ok(());
        }

        let list = SubprocessSpec::new(&self.binary, ["env", "list", "--json"])
            .cwd(cwd)
            .timeout(Duration::from_secs(30));
        let list_out = subprocess::run(list).await?;
        let exists = list_out.success() && list_out.stdout.contains(env);

        if !exists {
            if !allow_create {
                return Err(EnvManagerError::EnsureFailed {
                    env: env.to_string(),
                    detail: "env missing and allow_env_creation is false".to_string(),
                });
            }
            let create = SubprocessSpec::new(&self.binary, ["create", "-n", env, "-y"])
                .cwd(cwd)
                .timeout(Duration::from_secs(300));
            let out = subprocess::run(create).await?;
            if !out.success() {
                return Err(EnvManagerError::EnsureFailed {
                    env: env.to_string(),
                    detail: out.stderr,
                });
            }
        }

        for manifest in changed_manifest_paths {
            let update = SubprocessSpec::new(&self.binary, ["env", "update", "-n", env, "-f", manifest])
                .cwd(cwd)
                .timeout(Duration::from_secs(300));
            let out = subprocess::run(update).await?;
            if !out.success() {
                return Err(EnvManagerError::EnsureFailed {
                    env: env.to_string(),
                    detail: out.stderr,
                });
            }
        }
        Ok(())
    }

    async fn version(&self) -> Option<String> {
        let spec = SubprocessSpec::new(&self.binary, ["--version"]).timeout(Duration::from_secs(5));
        subprocess::run(spec)
            .await
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout.lines().next().unwrap_or_default().to_string())
    }

    async fn run_in_env(
        &self,
        env: &str,
        cwd: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, EnvManagerError> {
        let mut args = vec!["run".to_string(), "-n".to_string(), env.to_string(), "--".to_string()];
        args.extend(command.split_whitespace().map(str::to_string));
        let spec = SubprocessSpec::new(&self.binary, args).cwd(cwd).timeout(timeout);
        Ok(subprocess::run(spec).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pyproject_change() {
        let changed = vec!["src/main.py".to_string(), "pyproject.toml".to_string()];
        let manifests = touches_dependency_manifest(&changed);
        assert_eq!(manifests, vec!["pyproject.toml".to_string()]);
    }

    #[test]
    fn no_manifest_change_is_empty() {
        let changed = vec!["src/main.py".to_string()];
        assert!(touches_dependency_manifest(&changed).is_empty());
    }
}
