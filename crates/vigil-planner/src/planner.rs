//! Builds a `RunDeck` for one repo at the start of a tick (C8): query ready
//! beads, resolve each bead's contract, apply an optional focus filter, run
//! baseline validations once per unique command, and freeze the result to
//! disk. Deck files are reused verbatim across ticks unless `--replan` is
//! requested — this is what lets the run survive a crash mid-deck without
//! silently re-scoping itself.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use vigil_contract::resolve;
use vigil_core::atomic;
use vigil_core::types::{
    ContractOverlayPatch, DeckItem, ReadyBead, RepoPolicy, RunDeck, SkippedBead, ValidationResult,
};
use vigil_harness::subprocess::{self, SubprocessSpec};

use crate::bead_store::{BeadCliError, BeadStore};

const READY_BEAD_LIMIT: u32 = 200;
const BASELINE_VALIDATION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error(transparent)]
    BeadCli(#[from] BeadCliError),
    #[error("failed to read or write deck artifact: {0}")]
    Artifact(#[from] vigil_core::atomic::AtomicError),
}

/// Build (or reuse) the deck for `(run_id, repo_id)`.
#[allow(clippy::too_many_arguments)]
pub async fn build_or_reuse_deck(
    store: &dyn BeadStore,
    cache_dir: &Path,
    run_id: &str,
    policy: &RepoPolicy,
    overlay_defaults: Option<&ContractOverlayPatch>,
    overlay_beads: &BTreeMap<String, ContractOverlayPatch>,
    focus: Option<&str>,
    replan: bool,
) -> Result<RunDeck, PlanningError> {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let deck_path = vigil_core::paths::repo_deck_path(cache_dir, run_id, &policy.repo_id, &date);

    if !replan {
        if let Some(existing) = atomic::read_json::<RunDeck>(&deck_path)? {
            return Ok(existing);
        }
    }

    store.init().await?;
    let ready = store.ready(READY_BEAD_LIMIT).await?;

    let mut items = Vec::new();
    let mut skipped = Vec::new();

    for bead in &ready {
        if let Some(focus_text) = focus {
            if !matches_focus(bead, focus_text) {
                skipped.push(SkippedBead {
                    bead_id: bead.bead_id.clone(),
                    title: bead.title.clone(),
                    next_action: "Excluded by focus filter".to_string(),
                });
                continue;
            }
        }

        let overlay_bead = overlay_beads.get(&bead.bead_id);
        match resolve(&policy.repo_id, &bead.bead_id, policy, overlay_defaults, overlay_bead) {
            Ok(contract) => items.push(DeckItem {
                bead_id: bead.bead_id.clone(),
                title: bead.title.clone(),
                resolved_contract: contract,
                baseline_validation_results: Vec::new(),
            }),
            Err(resolution_err) => skipped.push(SkippedBead {
                bead_id: bead.bead_id.clone(),
                title: bead.title.clone(),
                next_action: format!(
                    "Contract unresolvable, missing {:?}; edit bead_contracts/{}.toml",
                    resolution_err.missing_fields, policy.repo_id
                ),
            }),
        }
    }

    let baseline_by_command = run_baseline_validations(&policy.path, &items).await;
    for item in &mut items {
        item.baseline_validation_results = item
            .resolved_contract
            .validation_commands
            .iter()
            .filter_map(|cmd| baseline_by_command.get(cmd).cloned())
            .collect();
    }

    let deck = RunDeck {
        run_id: run_id.to_string(),
        repo_id: policy.repo_id.clone(),
        items,
        skipped_beads: skipped,
    };

    atomic::write_json_atomic(&deck_path, &deck)?;
    Ok(deck)
}

/// Cheap case-insensitive substring match against title, labels, and
/// description. Deliberately not a real fuzzy-matching algorithm: the
/// filter only needs to narrow scope for a human-supplied focus string.
fn matches_focus(bead: &ReadyBead, focus: &str) -> bool {
    let needle = focus.to_lowercase();
    if bead.title.to_lowercase().contains(&needle) {
        return true;
    }
    if bead
        .labels
        .iter()
        .any(|label| label.to_lowercase().contains(&needle))
    {
        return true;
    }
    if let Some(description) = &bead.description {
        if description.to_lowercase().contains(&needle) {
            return true;
        }
    }
    false
}

async fn run_baseline_validations(
    repo_path: &Path,
    items: &[DeckItem],
) -> HashMap<String, ValidationResult> {
    let mut unique_commands = Vec::new();
    for item in items {
        for cmd in &item.resolved_contract.validation_commands {
            if !unique_commands.contains(cmd) {
                unique_commands.push(cmd.clone());
            }
        }
    }

    let mut results = HashMap::new();
    for command in unique_commands {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();
        let spec = SubprocessSpec::new(program, args)
            .cwd(repo_path)
            .timeout(BASELINE_VALIDATION_TIMEOUT);
        let outcome = subprocess::run(spec).await;
        let result = match outcome {
            Ok(captured) => ValidationResult {
                command: command.clone(),
                exit_code: captured.exit_code,
                timed_out: captured.timed_out,
            },
            Err(_) => ValidationResult {
                command: command.clone(),
                exit_code: None,
                timed_out: false,
            },
        };
        results.insert(command, result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::ReadyBead;

    fn bead(title: &str, labels: &[&str], description: Option<&str>) -> ReadyBead {
        ReadyBead {
            bead_id: "bd-1".into(),
            title: title.into(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            description: description.map(|s| s.to_string()),
            issue_type: "task".into(),
        }
    }

    #[test]
    fn focus_matches_title() {
        let b = bead("Fix the notebook loader", &[], None);
        assert!(matches_focus(&b, "notebook"));
        assert!(!matches_focus(&b, "widget"));
    }

    #[test]
    fn focus_matches_labels_case_insensitively() {
        let b = bead("Refactor", &["Backend"], None);
        assert!(matches_focus(&b, "backend"));
    }

    #[test]
    fn focus_matches_description() {
        let b = bead("Refactor", &[], Some("touches the auth middleware"));
        assert!(matches_focus(&b, "auth"));
    }
}
