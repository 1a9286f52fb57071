//! The contract resolver (C7): a pure merge of repo policy, overlay
//! defaults, and a per-bead overlay patch into a fully-populated
//! `ResolvedExecutionContract`. Narrowing validation for allow/deny roots
//! happens at overlay-load time in `vigil-config`; this crate only merges
//! and reports missing fields.

use thiserror::Error;
use vigil_core::types::{ContractOverlayPatch, RepoPolicy, ResolvedExecutionContract};

#[derive(Debug, Error)]
#[error("contract unresolvable for bead {bead_id}: missing {missing_fields:?} (edit bead_contracts/{repo_id}.toml)")]
pub struct ResolutionError {
    pub bead_id: String,
    pub repo_id: String,
    pub missing_fields: Vec<String>,
}

/// Resolve one bead's execution contract. `overlay_defaults` and
/// `overlay_bead` may both be absent or partial; every field falls through
/// per-bead → defaults → policy, in that order.
pub fn resolve(
    repo_id: &str,
    bead_id: &str,
    policy: &RepoPolicy,
    overlay_defaults: Option<&ContractOverlayPatch>,
    overlay_bead: Option<&ContractOverlayPatch>,
) -> Result<ResolvedExecutionContract, ResolutionError> {
    let mut missing = Vec::new();

    let time_budget_minutes = pick(
        overlay_bead.and_then(|p| p.time_budget_minutes),
        overlay_defaults.and_then(|p| p.time_budget_minutes),
        None,
    );
    let time_budget_minutes = match time_budget_minutes {
        Some(v) if v > 0 => v,
        _ => {
            missing.push("time_budget_minutes".to_string());
            0
        }
    };

    let validation_commands = merge_validation_commands(
        &policy.validation_commands,
        overlay_defaults.and_then(|p| p.validation_commands.as_ref()),
        overlay_bead.and_then(|p| p.validation_commands.as_ref()),
    );

    let env = pick(
        overlay_bead.and_then(|p| p.env.clone()),
        overlay_defaults.and_then(|p| p.env.clone()),
        policy.env.clone(),
    );
    let env = match env {
        Some(e) if !e.trim().is_empty() => e,
        _ => {
            missing.push("env".to_string());
            String::new()
        }
    };

    let allow_env_creation = pick(
        overlay_bead.and_then(|p| p.allow_env_creation),
        overlay_defaults.and_then(|p| p.allow_env_creation),
        None,
    );
    let allow_env_creation = match allow_env_creation {
        Some(v) => v,
        None => {
            missing.push("allow_env_creation".to_string());
            false
        }
    };

    let requires_notebook_execution = pick(
        overlay_bead.and_then(|p| p.requires_notebook_execution),
        overlay_defaults.and_then(|p| p.requires_notebook_execution),
        None,
    );
    let requires_notebook_execution = match requires_notebook_execution {
        Some(v) => v,
        None => {
            missing.push("requires_notebook_execution".to_string());
            false
        }
    };

    let enforce_given_when_then = pick(
        overlay_bead.and_then(|p| p.enforce_given_when_then),
        overlay_defaults.and_then(|p| p.enforce_given_when_then),
        Some(false),
    )
    .unwrap_or(false);

    // `unwrap_or_default()` collapses "no layer set allowed_roots" and "a
    // layer set allowed_roots = [] to deny everything" into the same empty
    // Vec; `path_policy_violation` in vigil-exec documents this as an
    // accepted divergence from stricter ground truth, where only a wholly
    // absent allowed_roots key means unrestricted.
    let allowed_roots = pick(
        overlay_bead.and_then(|p| p.allowed_roots.clone()),
        overlay_defaults.and_then(|p| p.allowed_roots.clone()),
        Some(policy.allowed_roots.clone()),
    )
    .unwrap_or_default();

    let deny_roots = pick(
        overlay_bead.and_then(|p| p.deny_roots.clone()),
        overlay_defaults.and_then(|p| p.deny_roots.clone()),
        Some(policy.deny_roots.clone()),
    )
    .unwrap_or_default();

    if !missing.is_empty() {
        return Err(ResolutionError {
            bead_id: bead_id.to_string(),
            repo_id: repo_id.to_string(),
            missing_fields: missing,
        });
    }

    Ok(ResolvedExecutionContract {
        time_budget_minutes,
        validation_commands,
        env,
        allow_env_creation,
        requires_notebook_execution,
        allowed_roots,
        deny_roots,
        notebook_roots: policy.notebook_roots.clone(),
        notebook_output_policy: policy.notebook_output_policy,
        enforce_given_when_then,
    })
}

fn pick<T>(bead: Option<T>, defaults: Option<T>, policy: Option<T>) -> Option<T> {
    bead.or(defaults).or(policy)
}

/// Additive, order-preserving, deduped: policy commands first, then
/// overlay-defaults additions, then overlay-bead additions.
fn merge_validation_commands(
    policy: &[String],
    overlay_defaults: Option<&Vec<String>>,
    overlay_bead: Option<&Vec<String>>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cmd in policy
        .iter()
        .chain(overlay_defaults.into_iter().flatten())
        .chain(overlay_bead.into_iter().flatten())
    {
        if seen.insert(cmd.clone()) {
            out.push(cmd.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::NotebookOutputPolicy;

    fn base_policy() -> RepoPolicy {
        RepoPolicy {
            repo_id: "widgets".into(),
            path: "/srv/widgets".into(),
            base_branch: "main".into(),
            env: Some("py311".into()),
            allowed_roots: vec!["src".into()],
            deny_roots: vec!["secrets".into()],
            notebook_roots: vec![],
            validation_commands: vec!["pytest".into()],
            notebook_output_policy: NotebookOutputPolicy::Strip,
            dirty_ignore_globs: vec![],
            dirty_cleanup: false,
        }
    }

    #[test]
    fn resolves_env_and_validation_commands_from_policy_when_bead_omits_them() {
        let policy = base_policy();
        let defaults = ContractOverlayPatch {
            time_budget_minutes: Some(30),
            allow_env_creation: Some(false),
            requires_notebook_execution: Some(false),
            ..Default::default()
        };
        let contract = resolve("widgets", "bd-1", &policy, Some(&defaults), None).unwrap();
        assert_eq!(contract.env, "py311");
        assert_eq!(contract.validation_commands, vec!["pytest".to_string()]);
        assert_eq!(contract.time_budget_minutes, 30);
    }

    #[test]
    fn missing_time_budget_is_a_resolution_error() {
        let policy = base_policy();
        let err = resolve("widgets", "bd-1", &policy, None, None).unwrap_err();
        assert!(err.missing_fields.contains(&"time_budget_minutes".to_string()));
    }

    #[test]
    fn missing_allow_env_creation_and_requires_notebook_execution_are_resolution_errors() {
        let policy = base_policy();
        let defaults = ContractOverlayPatch {
            time_budget_minutes: Some(10),
            ..Default::default()
        };
        let err = resolve("widgets", "bd-1", &policy, Some(&defaults), None).unwrap_err();
        assert!(err.missing_fields.contains(&"allow_env_creation".to_string()));
        assert!(err.missing_fields.contains(&"requires_notebook_execution".to_string()));
    }

    #[test]
    fn per_bead_overlay_wins_over_defaults() {
        let policy = base_policy();
        let defaults = ContractOverlayPatch {
            time_budget_minutes: Some(15),
            allow_env_creation: Some(false),
            requires_notebook_execution: Some(false),
            ..Default::default()
        };
        let bead = ContractOverlayPatch {
            time_budget_minutes: Some(45),
            ..Default::default()
        };
        let contract = resolve("widgets", "bd-1", &policy, Some(&defaults), Some(&bead)).unwrap();
        assert_eq!(contract.time_budget_minutes, 45);
    }

    #[test]
    fn validation_commands_are_additive_and_deduped() {
        let policy = base_policy();
        let defaults = ContractOverlayPatch {
            time_budget_minutes: Some(10),
            allow_env_creation: Some(false),
            requires_notebook_execution: Some(false),
            validation_commands: Some(vec!["pytest".into(), "mypy".into()]),
            ..Default::default()
        };
        let bead = ContractOverlayPatch {
            validation_commands: Some(vec!["ruff check".into()]),
            ..Default::default()
        };
        let contract = resolve("widgets", "bd-1", &policy, Some(&defaults), Some(&bead)).unwrap();
        assert_eq!(
            contract.validation_commands,
            vec!["pytest".to_string(), "mypy".to_string(), "ruff check".to_string()]
        );
    }

    #[test]
    fn empty_env_override_is_a_resolution_error() {
        let mut policy = base_policy();
        policy.env = None;
        let bead = ContractOverlayPatch {
            time_budget_minutes: Some(10),
            env: Some("  ".into()),
            ..Default::default()
        };
        let err = resolve("widgets", "bd-1", &policy, None, Some(&bead)).unwrap_err();
        assert!(err.missing_fields.contains(&"env".to_string()));
    }
}
