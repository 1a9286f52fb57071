//! `orchestrator tick`: the raw lifecycle primitive. Unlike `run` or
//! `exec-repo`, this never dispatches a repo executor — it only advances
//! (or mints) the current run by exactly one tick, with the caller
//! supplying whether actionable work happened.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Args;

use vigil_core::lifecycle::{self, EnsureOutcome, TickOutcome};

use super::common::{night_window, ModeArg};

#[derive(Debug, Args)]
pub struct TickArgs {
    #[arg(long, value_enum)]
    mode: ModeArg,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    idle_ticks_to_end: u64,
    #[arg(long, default_value_t = 4)]
    manual_ttl_hours: i64,
    #[arg(long)]
    actionable_work_found: bool,
}

pub fn run(config_dir: &std::path::Path, args: TickArgs) -> Result<()> {
    // tick only needs the AI policy gate enforced, not repos.toml.
    let ai_path = vigil_config::OrchestratorToml::default_path(config_dir);
    let ai = vigil_config::OrchestratorToml::load(&ai_path).with_context(|| format!("loading {}", ai_path.display()))?;
    ai.enforce_policy()?;

    let cache_dir = super::context::resolve_cache_dir(args.cache_dir);
    let mode = args.mode.into();
    let manual_ttl = ChronoDuration::hours(args.manual_ttl_hours);
    let now = Utc::now();

    let lock = vigil_core::lockfile::ExclusiveLock::acquire(&vigil_core::paths::run_lock_path(&cache_dir))
        .with_context(|| "another process holds the run lock")?;

    let outcome = lifecycle::ensure_active_run(&cache_dir, mode, now, night_window(), manual_ttl, args.idle_ticks_to_end)?;
    let run = match outcome {
        EnsureOutcome::OutsideWindow => {
            lock.release();
            println!("outside the night window, nothing to do");
            return Ok(());
        }
        EnsureOutcome::Active(run) => run,
    };

    let tick_outcome = lifecycle::tick_run(
        &cache_dir,
        &run.run_id,
        Utc::now(),
        args.actionable_work_found,
        manual_ttl,
        args.idle_ticks_to_end,
        0,
    )?;
    lock.release();

    match tick_outcome {
        TickOutcome::Active(state) => {
            println!("run {} ticked ({})", state.run_id, state.tick_count);
        }
        TickOutcome::Ended { state, end } => {
            println!("run {} ended: {}", state.run_id, end.reason);
        }
    }
    Ok(())
}
