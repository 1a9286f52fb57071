//! `orchestrator planning-audit`: build (or reuse) the frozen deck for a
//! repo and dump it as a summary artifact. This is a hook for whatever
//! heuristic scanner eventually inspects deck quality — today it only
//! persists the deck the planner already produces, nothing more.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use vigil_core::atomic;
use vigil_core::lifecycle;
use vigil_core::paths;
use vigil_planner::bead_store::BdCli;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum DumpFormat {
    Md,
    Json,
}

#[derive(Debug, Args)]
pub struct PlanningAuditArgs {
    #[arg(long = "repo-id")]
    repo_id: String,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long, value_enum, default_value_t = DumpFormat::Md)]
    dump: DumpFormat,
    #[arg(long)]
    no_meta: bool,
    #[arg(long)]
    allow_missing: bool,
}

fn resolve_run_id(cache_dir: &Path, explicit: Option<String>) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    if let Some(current) = lifecycle::load_current_run(cache_dir)? {
        return Ok(current.run_id);
    }
    Ok("adhoc".to_string())
}

pub async fn run(config_dir: &Path, args: PlanningAuditArgs) -> Result<()> {
    let config = super::context::load_config(config_dir)?;
    let policy = config
        .repos
        .repos
        .get(&args.repo_id)
        .with_context(|| format!("unknown repo id {}", args.repo_id))?;

    let cache_dir = super::context::resolve_cache_dir(None);
    let run_id = resolve_run_id(&cache_dir, args.run_id.clone())?;

    let overlay = config.overlays.get(&args.repo_id);
    let default_overlay = vigil_config::BeadContractsToml::default();
    let overlay = overlay.unwrap_or(&default_overlay);

    let store = BdCli::new(policy.path.clone());
    let deck_result =
        vigil_planner::build_or_reuse_deck(&store, &cache_dir, &run_id, policy, Some(&overlay.defaults), &overlay.beads, None, false)
            .await;

    let deck = match deck_result {
        Ok(deck) => deck,
        Err(e) if args.allow_missing => {
            println!("planning audit for {}: no deck available ({e})", args.repo_id);
            return Ok(());
        }
        Err(e) => bail!("failed to build deck for {}: {e}", args.repo_id),
    };

    let json_path = paths::planning_audit_json_path(&cache_dir, &run_id, &args.repo_id);
    atomic::write_json_atomic(&json_path, &deck).with_context(|| format!("writing {}", json_path.display()))?;

    let md_path = paths::planning_audit_md_path(&cache_dir, &run_id, &args.repo_id);
    let md = render_planning_audit_md(&deck, !args.no_meta);
    std::fs::write(&md_path, &md).with_context(|| format!("writing {}", md_path.display()))?;

    match args.dump {
        DumpFormat::Json => println!("{}", serde_json::to_string_pretty(&deck)?),
        DumpFormat::Md => println!("{md}"),
    }
    Ok(())
}

fn render_planning_audit_md(deck: &vigil_core::types::RunDeck, include_meta: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Planning audit: {}\n\n", deck.repo_id));
    if include_meta {
        out.push_str(&format!("run: {}\n\n", deck.run_id));
    }
    out.push_str(&format!("{} ready bead(s), {} skipped\n\n", deck.items.len(), deck.skipped_beads.len()));
    for item in &deck.items {
        out.push_str(&format!("- [{}] {}\n", item.bead_id, item.title));
    }
    for skipped in &deck.skipped_beads {
        out.push_str(&format!("- (skipped) [{}] {}: {}\n", skipped.bead_id, skipped.title, skipped.next_action));
    }
    out
}
