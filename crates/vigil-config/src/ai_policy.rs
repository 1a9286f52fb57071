//! `orchestrator.toml`: the `[ai]` section and the unattended-AI policy
//! gate. The required model and reasoning-effort constants are a policy
//! decision, not a design one (see the workspace's open questions) — they
//! are configurable constants with mandatory non-empty values, and startup
//! refuses to proceed on any mismatch.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// The constants the unattended AI policy requires at startup. Treated as
/// configuration, not a design choice — change them here if the policy
/// changes, never by relaxing the gate below.
pub const REQUIRED_MODEL: &str = "claude-orchestrator-unattended-1";
pub const REQUIRED_REASONING_EFFORT: &str = "high";

#[derive(Debug, Clone, Deserialize)]
pub struct AiPolicyConfig {
    pub model: String,
    pub reasoning_effort: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorToml {
    pub ai: AiPolicyConfig,
}

impl OrchestratorToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let raw: toml::Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        if let toml::Value::Table(table) = &raw {
            let unknown: Vec<&str> = table
                .keys()
                .filter(|k| k.as_str() != "ai")
                .map(|k| k.as_str())
                .collect();
            if !unknown.is_empty() {
                return Err(ConfigError::UnknownKeys {
                    path: path.to_path_buf(),
                    keys: unknown.join(", "),
                });
            }
        }

        let parsed: OrchestratorToml = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        if parsed.ai.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                path: path.to_path_buf(),
                field: "ai.model".into(),
            });
        }
        if parsed.ai.reasoning_effort.trim().is_empty() {
            return Err(ConfigError::MissingField {
                path: path.to_path_buf(),
                field: "ai.reasoning_effort".into(),
            });
        }

        Ok(parsed)
    }

    /// Enforce the unattended AI policy: refuse startup with a multi-line
    /// actionable message unless `model`/`reasoning_effort` match exactly.
    pub fn enforce_policy(&self) -> Result<(), ConfigError> {
        if self.ai.model != REQUIRED_MODEL || self.ai.reasoning_effort != REQUIRED_REASONING_EFFORT
        {
            return Err(ConfigError::AiPolicyMismatch {
                model: self.ai.model.clone(),
                reasoning_effort: self.ai.reasoning_effort.clone(),
                required_model: REQUIRED_MODEL.into(),
                required_effort: REQUIRED_REASONING_EFFORT.into(),
            });
        }
        Ok(())
    }

    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("orchestrator.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vigil-orchestrator-toml-test-{}-{}.toml",
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

    #[test]
    fn valid_config_parses() {
        let path = write_tmp(
            "[ai]\nmodel = \"claude-orchestrator-unattended-1\"\nreasoning_effort = \"high\"\n",
        );
        let cfg = OrchestratorToml::load(&path).unwrap();
        assert_eq!(cfg.ai.model, REQUIRED_MODEL);
        cfg.enforce_policy().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let path = write_tmp(
            "[ai]\nmodel = \"x\"\nreasoning_effort = \"y\"\n[rogue]\nfield = 1\n",
        );
        let err = OrchestratorToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKeys { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_model_is_rejected() {
        let path = write_tmp("[ai]\nmodel = \"\"\nreasoning_effort = \"high\"\n");
        let err = OrchestratorToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn mismatched_policy_is_refused() {
        let path = write_tmp("[ai]\nmodel = \"gpt-whatever\"\nreasoning_effort = \"low\"\n");
        let cfg = OrchestratorToml::load(&path).unwrap();
        let err = cfg.enforce_policy().unwrap_err();
        assert!(matches!(err, ConfigError::AiPolicyMismatch { .. }));
        let _ = std::fs::remove_file(path);
    }
}
