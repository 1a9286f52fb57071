//! The closed set of orchestrator error kinds.
//!
//! Every failure mode the orchestrator can produce maps to exactly one of
//! these variants — no two distinct failure modes share a kind, and no
//! variant is reused to paper over a different cause. Per-bead and per-repo
//! errors stay inside their scope (see each component's error type); this
//! enum covers the ones that can legitimately surface to a human.

use std::fmt;

/// A user-facing error with an actionable next step.
///
/// `next_action` is meant to be printed verbatim — it names the exact
/// command or file edit that resolves the error, never a vague suggestion.
#[derive(Debug, Clone)]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub next_action: Option<String>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            next_action: None,
        }
    }

    pub fn with_next_action(mut self, next_action: impl Into<String>) -> Self {
        self.next_action = Some(next_action.into());
        self
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(next) = &self.next_action {
            write!(f, "\nnext action: {next}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OrchestratorError {}

/// Closed set of error kinds. Exhaustive match is required at every seam
/// that reports one of these to a human or decides whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed TOML, unknown keys, missing required fields, relative or
    /// dotdot paths, policy narrowing violations, orchestrator outputs not
    /// reachable under allowed_roots. Fatal at startup.
    ConfigurationInvalid,
    /// `model`/`reasoning_effort` don't match the required unattended-AI
    /// policy constants. Fatal at startup.
    AiPolicyViolation,
    /// Another process holds the lock. Recoverable — caller retries or
    /// skips.
    LockBusy,
    /// The latest ended run's signoff is missing.
    RunSignoffMissing,
    /// The latest ended run's signoff exists but does not validate.
    RunSignoffInvalid,
    /// The bead-store CLI returned an error or unparseable output.
    BeadCliError,
    /// A git subprocess exited non-zero or could not be invoked.
    GitError,
    /// The agent CLI exited non-zero, could not be invoked, or violated
    /// its contract in a way that isn't its own `PolicyViolation`.
    AgentCliError,
    /// A bead's contract could not be fully resolved. Per-bead skip only —
    /// never crashes the repo tick.
    ContractUnresolvable,
    /// The repo tick's safety envelope was violated (agent committed,
    /// changed paths escaped allowed_roots, a validation command outside
    /// the allowlist was requested). Terminates the repo tick immediately.
    PolicyViolation,
    /// A subprocess exceeded its timeout. Internally mapped to exit 124.
    Timeout,
    /// A structured artifact (`run_end.json`, `run_summary.json`, …) exists
    /// but fails to parse. Fails loudly rather than guessing.
    ArtifactCorrupt,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::AiPolicyViolation => "ai_policy_violation",
            ErrorKind::LockBusy => "lock_busy",
            ErrorKind::RunSignoffMissing => "run_signoff_missing",
            ErrorKind::RunSignoffInvalid => "run_signoff_invalid",
            ErrorKind::BeadCliError => "bead_cli_error",
            ErrorKind::GitError => "git_error",
            ErrorKind::AgentCliError => "agent_cli_error",
            ErrorKind::ContractUnresolvable => "contract_unresolvable",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ArtifactCorrupt => "artifact_corrupt",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_next_action() {
        let err = OrchestratorError::new(ErrorKind::RunSignoffMissing, "run 2025-01-01 unsigned")
            .with_next_action("orchestrator signoff --run-id 2025-01-01-abc123de");
        let rendered = err.to_string();
        assert!(rendered.contains("run_signoff_missing"));
        assert!(rendered.contains("next action: orchestrator signoff"));
    }

    #[test]
    fn kinds_are_distinct_strings() {
        let kinds = [
            ErrorKind::ConfigurationInvalid,
            ErrorKind::AiPolicyViolation,
            ErrorKind::LockBusy,
            ErrorKind::RunSignoffMissing,
            ErrorKind::RunSignoffInvalid,
            ErrorKind::BeadCliError,
            ErrorKind::GitError,
            ErrorKind::AgentCliError,
            ErrorKind::ContractUnresolvable,
            ErrorKind::PolicyViolation,
            ErrorKind::Timeout,
            ErrorKind::ArtifactCorrupt,
        ];
        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            assert!(seen.insert(kind.to_string()), "duplicate kind: {kind}");
        }
    }
}
