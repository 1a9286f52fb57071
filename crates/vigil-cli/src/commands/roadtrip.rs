//! `orchestrator roadtrip`: repeated cycles over a multi-hour window in
//! one process, the shape an unattended overnight run actually takes.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::Args;
use tracing::warn;

use vigil_core::run_state::RunMode;
use vigil_cycle::{roadtrip as run_roadtrip, RepoSelection, RoadtripParams};
use vigil_harness::shutdown::ShutdownSignal;

use super::common::{build_cycle_params, CommonRunFlags};
use super::context;

#[derive(Debug, Args)]
pub struct RoadtripArgs {
    #[command(flatten)]
    common: CommonRunFlags,
    #[arg(long)]
    hours: Option<f64>,
    #[arg(long)]
    until: Option<String>,
    #[arg(long, default_value_t = 30)]
    cadence_minutes: i64,
    #[arg(long = "repo-id")]
    repo_ids: Vec<String>,
    #[arg(long = "repo-group")]
    repo_groups: Vec<String>,
}

fn resolve_deadline(hours: Option<f64>, until: Option<String>) -> Result<chrono::DateTime<Utc>> {
    match (hours, until) {
        (Some(_), Some(_)) => bail!("--hours and --until are mutually exclusive"),
        (Some(h), None) => Ok(Utc::now() + chrono::Duration::milliseconds((h * 3_600_000.0) as i64)),
        (None, Some(until)) => {
            let naive = NaiveDateTime::parse_from_str(&until, "%Y-%m-%d %H:%M")
                .with_context(|| format!("--until {until:?} must look like \"YYYY-MM-DD HH:MM\""))?;
            Ok(naive.and_utc())
        }
        (None, None) => bail!("one of --hours or --until is required"),
    }
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

pub async fn run(config_dir: &Path, args: RoadtripArgs) -> Result<()> {
    if matches!(args.common.mode.into(), RunMode::Manual) && args.hours.is_none() && args.until.is_none() {
        bail!("manual roadtrips still need a deadline: pass --hours or --until");
    }
    if args.common.final_review_codex {
        // Each tick here can end its own run and start the next; there is no
        // single "the run" to attach a final review to, so this flag (built
        // for `run`/`exec-repo`) is accepted but does nothing for a roadtrip.
        warn!("--final-review-codex has no effect on roadtrip; run a review pass per run_id afterward");
    }
    let until = resolve_deadline(args.hours, args.until.clone())?;

    let config = context::load_config(config_dir)?;
    let selection = resolve_selection(&args.repo_ids, &args.repo_groups);
    let base = build_cycle_params(config, &args.common, selection);

    let shutdown = ShutdownSignal::new();
    let ctrl_c_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_signal.trigger();
        }
    });

    let params = RoadtripParams {
        base,
        cadence: chrono::Duration::minutes(args.cadence_minutes),
        until,
        shutdown,
    };

    let report = run_roadtrip(params).await?;
    println!(
        "roadtrip finished: {} cycle(s) run, {} bead(s) attempted, stopped_early={}",
        report.cycles_run, report.total_beads_attempted, report.stopped_early
    );
    Ok(())
}
