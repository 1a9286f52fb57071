//! `orchestrator run`: one cycle across the selected repos under one
//! active run.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use vigil_cycle::{CycleOutcome, RepoSelection};

use super::common::{build_cycle_params, CommonRunFlags};
use super::context;

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    common: CommonRunFlags,
    #[arg(long = "repo-id")]
    repo_ids: Vec<String>,
    #[arg(long = "repo-group")]
    repo_groups: Vec<String>,
}

fn resolve_selection(repo_ids: &[String], repo_groups: &[String]) -> RepoSelection {
    if let Some(group) = repo_groups.first() {
        RepoSelection::Group(group.clone())
    } else if !repo_ids.is_empty() {
        RepoSelection::Ids(repo_ids.to_vec())
    } else {
        RepoSelection::All
    }
}

pub async fn run(config_dir: &Path, args: RunArgs) -> Result<()> {
    let config = context::load_config(config_dir)?;
    let agent = context::build_agent(&config.ai);
    let selection = resolve_selection(&args.repo_ids, &args.repo_groups);
    let repo_ids = selection.resolve(&config.repos);
    let final_review_codex = args.common.final_review_codex;
    let config_for_review = config.clone();
    let params = build_cycle_params(config, &args.common, selection);
    let cache_dir = params.cache_dir.clone();

    let outcome = vigil_cycle::run_cycle(params).await?;

    match outcome {
        CycleOutcome::OutsideWindow => println!("outside the night window, nothing to do"),
        CycleOutcome::Ticked { run_id, beads_attempted, actionable_work_found, ended } => {
            println!("run {run_id}: beads_attempted={beads_attempted} actionable={actionable_work_found} ended={ended}");
            if ended && final_review_codex {
                context::run_optional_codex_review(&config_for_review, &agent, &cache_dir, &run_id, &repo_ids).await;
            }
        }
    }
    Ok(())
}
