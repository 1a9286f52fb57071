//! `orchestrator exec-repo`: one cycle scoped to exactly one repo. This is
//! `run` with the selection pinned to a single id and parallelism pinned
//! to 1 — no separate dispatch path, just a narrower `CycleParams`.

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;

use vigil_core::lifecycle;
use vigil_cycle::{CycleOutcome, RepoSelection};

use super::common::{build_cycle_params, CommonRunFlags};
use super::context;

#[derive(Debug, Args)]
pub struct ExecRepoArgs {
    #[command(flatten)]
    common: CommonRunFlags,
    #[arg(long)]
    repo_id: String,
    /// If given, refuse unless this matches the run active after this
    /// tick starts — a guard for a human targeting one specific run.
    #[arg(long)]
    run_id: Option<String>,
}

pub async fn run(config_dir: &Path, mut args: ExecRepoArgs) -> Result<()> {
    args.common.max_parallel = Some(1);
    let config = context::load_config(config_dir)?;
    let agent = context::build_agent(&config.ai);
    let config_for_review = config.clone();
    let final_review_codex = args.common.final_review_codex;
    let repo_id = args.repo_id.clone();
    let expected_run_id = args.run_id.clone();
    let selection = RepoSelection::Ids(vec![repo_id.clone()]);
    let params = build_cycle_params(config, &args.common, selection);
    let cache_dir = params.cache_dir.clone();

    if let Some(expected) = &expected_run_id {
        if let Some(current) = lifecycle::load_current_run(&cache_dir)? {
            if &current.run_id != expected {
                bail!("--run-id {expected} does not match the currently active run {}", current.run_id);
            }
        }
    }

    let outcome = vigil_cycle::run_cycle(params).await?;
    match outcome {
        CycleOutcome::OutsideWindow => println!("outside the night window, nothing to do"),
        CycleOutcome::Ticked { run_id, beads_attempted, actionable_work_found, ended } => {
            println!("run {run_id}: repo={repo_id} beads_attempted={beads_attempted} actionable={actionable_work_found} ended={ended}");
            if ended && final_review_codex {
                context::run_optional_codex_review(&config_for_review, &agent, &cache_dir, &run_id, &[repo_id]).await;
            }
        }
    }
    Ok(())
}
