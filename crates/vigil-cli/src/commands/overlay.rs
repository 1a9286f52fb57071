//! `orchestrator overlay dry-run|apply`: validate a repo's bead contract
//! overlay against its policy and the bead store's current ready set.
//! There is no separate persisted "applied" state to move to — both
//! subcommands run the identical validation, `apply` just says so.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use vigil_config::BeadContractsToml;
use vigil_planner::bead_store::{BdCli, BeadStore};

#[derive(Debug, Subcommand)]
pub enum OverlayCommand {
    DryRun(OverlayArgs),
    Apply(OverlayArgs),
}

#[derive(Debug, Args)]
pub struct OverlayArgs {
    #[arg(long = "repo-id")]
    repo_id: String,
}

pub async fn run(config_dir: &Path, command: OverlayCommand) -> Result<()> {
    let (args, applying) = match command {
        OverlayCommand::DryRun(a) => (a, false),
        OverlayCommand::Apply(a) => (a, true),
    };

    let config = super::context::load_config(config_dir)?;
    let policy = config
        .repos
        .repos
        .get(&args.repo_id)
        .with_context(|| format!("unknown repo id {}", args.repo_id))?;

    let overlay_path = config_dir.join("bead_contracts").join(format!("{}.toml", args.repo_id));
    if !overlay_path.exists() {
        println!("repo {} has no overlay at {}", args.repo_id, overlay_path.display());
        return Ok(());
    }
    let overlay = BeadContractsToml::load(&overlay_path).with_context(|| format!("loading {}", overlay_path.display()))?;

    let store = BdCli::new(policy.path.clone());
    store.init().await.with_context(|| "bd init failed")?;
    // Matches the planner's own ready-set size; there is no shared constant
    // to import since it sits behind the planner module's private surface.
    let ready = store.ready(200).await.with_context(|| "bd ready failed")?;
    let known_bead_ids: Vec<String> = ready.iter().map(|b| b.bead_id.clone()).collect();

    match overlay.validate(&overlay_path, policy, &known_bead_ids) {
        Ok(()) => {
            let verb = if applying { "applied (no-op write, validation is the only state)" } else { "validated" };
            println!("overlay for {} {verb}: {} patched bead(s)", args.repo_id, overlay.beads.len());
            Ok(())
        }
        Err(e) => bail!("overlay for {} failed validation: {e}", args.repo_id),
    }
}
