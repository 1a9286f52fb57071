//! The AI agent CLI as an external collaborator: `codex exec --full-auto`,
//! invoked with the bead prompt on stdin and a clamped timeout. The agent
//! is never trusted to commit; that invariant is enforced by the caller
//! comparing HEAD before and after, not by anything in this module.

use std::path::Path;
use std::time::Duration;

use vigil_harness::subprocess::{self, CapturedOutput, SubprocessSpec};

#[derive(Debug, thiserror::Error)]
pub enum AgentCliError {
    #[error("agent CLI not found on PATH")]
    NotFound,
    #[error("failed to spawn agent CLI: {0}")]
    SpawnFailed(String),
}

impl From<subprocess::SubprocessError> for AgentCliError {
    fn from(err: subprocess::SubprocessError) -> Self {
        match err {
            subprocess::SubprocessError::NotFound { .. } => AgentCliError::NotFound,
            subprocess::SubprocessError::SpawnFailed { source, .. } => {
                AgentCliError::SpawnFailed(source.to_string())
            }
        }
    }
}

pub struct AgentCli {
    pub model: String,
    pub reasoning_effort: String,
    pub byte_cap: usize,
}

impl AgentCli {
    pub fn new(model: impl Into<String>, reasoning_effort: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reasoning_effort: reasoning_effort.into(),
            byte_cap: 2_000_000,
        }
    }

    pub async fn version(&self) -> Option<String> {
        let spec = SubprocessSpec::new("codex", ["--version"]).timeout(Duration::from_secs(5));
        subprocess::run(spec)
            .await
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Run the agent with `prompt` on stdin in `cwd`, clamped to `timeout`.
    pub async fn run(
        &self,
        cwd: &Path,
        prompt: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, AgentCliError> {
        let reasoning_flag = format!("reasoning_effort=\"{}\"", self.reasoning_effort);
        let spec = SubprocessSpec::new(
            "codex",
            [
                "exec".to_string(),
                "--full-auto".to_string(),
                "--model".to_string(),
                self.model.clone(),
                "-c".to_string(),
                reasoning_flag,
            ],
        )
        .cwd(cwd)
        .stdin(prompt)
        .timeout(timeout)
        .byte_cap(self.byte_cap);

        Ok(subprocess::run(spec).await?)
    }
}

/// `timeout = max(60s, min(tick_remaining, bead_time_budget + padding))`.
pub fn clamp_agent_timeout(
    tick_remaining: Duration,
    bead_time_budget: Duration,
    padding: Duration,
) -> Duration {
    let wanted = bead_time_budget + padding;
    let capped = std::cmp::min(tick_remaining, wanted);
    std::cmp::max(Duration::from_secs(60), capped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_never_goes_below_one_minute() {
        let timeout = clamp_agent_timeout(
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        assert_eq!(timeout, Duration::from_secs(60));
    }

    #[test]
    fn clamp_respects_tick_remaining_ceiling() {
        let timeout = clamp_agent_timeout(
            Duration::from_secs(300),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        );
        assert_eq!(timeout, Duration::from_secs(300));
    }

    #[test]
    fn clamp_uses_budget_plus_padding_when_smaller() {
        let timeout = clamp_agent_timeout(
            Duration::from_secs(3600),
            Duration::from_secs(600),
            Duration::from_secs(30),
        );
        assert_eq!(timeout, Duration::from_secs(630));
    }
}
