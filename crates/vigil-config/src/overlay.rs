//! `bead_contracts/<repo_id>.toml`: per-repo contract overlays. `[defaults]`
//! applies to every ready bead unless a `[beads."<bead_id>"]` table patches
//! it further. Overlays may only narrow the repo policy, never widen it —
//! enforced here against the repo's `RepoPolicy`, not deferred to
//! resolution time.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use vigil_core::types::{ContractOverlayPatch, RepoPolicy};

use crate::error::ConfigError;

pub type OverlayDefaults = ContractOverlayPatch;

#[derive(Debug, Clone, Default, Deserialize)]
struct RawBeadContractsToml {
    #[serde(default)]
    defaults: OverlayDefaults,
    #[serde(default)]
    beads: BTreeMap<String, ContractOverlayPatch>,
}

#[derive(Debug, Clone, Default)]
pub struct BeadContractsToml {
    pub defaults: OverlayDefaults,
    pub beads: BTreeMap<String, ContractOverlayPatch>,
}

impl BeadContractsToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let raw: RawBeadContractsToml = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(BeadContractsToml {
            defaults: raw.defaults,
            beads: raw.beads,
        })
    }

    /// Validate the `[defaults]` patch and every per-bead patch narrow the
    /// repo policy's root lists, and that every bead id named in
    /// `[beads."<id>"]` is present in `known_bead_ids` (the current ready
    /// snapshot from the bead store).
    pub fn validate(
        &self,
        path: &Path,
        policy: &RepoPolicy,
        known_bead_ids: &[String],
    ) -> Result<(), ConfigError> {
        validate_narrowing(path, "defaults", &self.defaults, policy)?;
        for (bead_id, patch) in &self.beads {
            if !known_bead_ids.iter().any(|b| b == bead_id) {
                return Err(ConfigError::UnknownBeadId {
                    path: path.to_path_buf(),
                    bead_id: bead_id.clone(),
                });
            }
            validate_narrowing(path, bead_id, patch, policy)?;
        }
        Ok(())
    }
}

fn validate_narrowing(
    path: &Path,
    scope: &str,
    patch: &ContractOverlayPatch,
    policy: &RepoPolicy,
) -> Result<(), ConfigError> {
    if let Some(allowed) = &patch.allowed_roots {
        if !policy.allowed_roots.is_empty() {
            for root in allowed {
                if !policy.allowed_roots.iter().any(|p| p == root) {
                    return Err(ConfigError::NarrowingViolation {
                        path: path.to_path_buf(),
                        bead_id: scope.into(),
                        detail: format!(
                            "allowed_roots entry {root:?} is not in the repo policy's allowed_roots"
                        ),
                    });
                }
            }
        }
    }

    if let Some(deny) = &patch.deny_roots {
        for root in &policy.deny_roots {
            if !deny.iter().any(|d| d == root) {
                return Err(ConfigError::NarrowingViolation {
                    path: path.to_path_buf(),
                    bead_id: scope.into(),
                    detail: format!(
                        "deny_roots drops repo policy entry {root:?}; overlays may only add deny roots"
                    ),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::NotebookOutputPolicy;

    fn policy() -> RepoPolicy {
        RepoPolicy {
            repo_id: "widgets".into(),
            path: "/srv/widgets".into(),
            base_branch: "main".into(),
            env: None,
            allowed_roots: vec!["src".into(), "tests".into()],
            deny_roots: vec!["secrets".into()],
            notebook_roots: vec![],
            validation_commands: vec![],
            notebook_output_policy: NotebookOutputPolicy::Strip,
            dirty_ignore_globs: vec![],
            dirty_cleanup: false,
        }
    }

    #[test]
    fn narrowing_allowed_roots_is_accepted() {
        let patch = ContractOverlayPatch {
            allowed_roots: Some(vec!["src".into()]),
            ..Default::default()
        };
        let bct = BeadContractsToml {
            defaults: ContractOverlayPatch::default(),
            beads: BTreeMap::from([("bd-1".to_string(), patch)]),
        };
        bct.validate(Path::new("x.toml"), &policy(), &["bd-1".into()])
            .unwrap();
    }

    #[test]
    fn widening_allowed_roots_is_rejected() {
        let patch = ContractOverlayPatch {
            allowed_roots: Some(vec!["src".into(), "scripts".into()]),
            ..Default::default()
        };
        let bct = BeadContractsToml {
            defaults: ContractOverlayPatch::default(),
            beads: BTreeMap::from([("bd-1".to_string(), patch)]),
        };
        let err = bct
            .validate(Path::new("x.toml"), &policy(), &["bd-1".into()])
            .unwrap_err();
        assert!(matches!(err, ConfigError::NarrowingViolation { .. }));
    }

    #[test]
    fn dropping_deny_root_is_rejected() {
        let patch = ContractOverlayPatch {
            deny_roots: Some(vec![]),
            ..Default::default()
        };
        let bct = BeadContractsToml {
            defaults: ContractOverlayPatch::default(),
            beads: BTreeMap::from([("bd-1".to_string(), patch)]),
        };
        let err = bct
            .validate(Path::new("x.toml"), &policy(), &["bd-1".into()])
            .unwrap_err();
        assert!(matches!(err, ConfigError::NarrowingViolation { .. }));
    }

    #[test]
    fn unknown_bead_id_is_rejected() {
        let bct = BeadContractsToml {
            defaults: ContractOverlayPatch::default(),
            beads: BTreeMap::from([("bd-ghost".to_string(), ContractOverlayPatch::default())]),
        };
        let err = bct
            .validate(Path::new("x.toml"), &policy(), &["bd-1".into()])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBeadId { .. }));
    }
}
