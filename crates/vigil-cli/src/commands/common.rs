//! Flags shared by every subcommand that actually drives the Cycle
//! Controller (`run`, `exec-repo`, `roadtrip`), and the `CycleParams`
//! construction they all funnel into.

use std::path::PathBuf;

use chrono::{Duration as ChronoDuration, NaiveTime};
use clap::Args;
use vigil_core::night_window::NightWindow;
use vigil_core::run_state::RunMode;
use vigil_core::types::DiffCaps;
use vigil_cycle::{CycleParams, RepoSelection};
use vigil_exec::executor::ExecutorConfig;

use super::context::{self, LoadedConfig};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    Automated,
    Manual,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Automated => RunMode::Automated,
            ModeArg::Manual => RunMode::Manual,
        }
    }
}

#[derive(Debug, Args)]
pub struct CommonRunFlags {
    #[arg(long, value_enum)]
    pub mode: ModeArg,
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 30)]
    pub tick_minutes: i64,
    #[arg(long, default_value_t = 5)]
    pub idle_ticks_to_end: u64,
    #[arg(long, default_value_t = 4)]
    pub manual_ttl_hours: i64,
    #[arg(long, default_value_t = 10)]
    pub min_minutes_to_start_new_bead: u32,
    #[arg(long, default_value_t = 10)]
    pub max_beads_per_tick: u32,
    #[arg(long, default_value_t = 25)]
    pub diff_cap_files: u32,
    #[arg(long, default_value_t = 2000)]
    pub diff_cap_lines: u64,
    #[arg(long)]
    pub max_parallel: Option<usize>,
    #[arg(long)]
    pub replan: bool,
    #[arg(long)]
    pub commit_on_failure: bool,
    #[arg(long)]
    pub final_review_codex: bool,
    #[arg(long)]
    pub focus: Option<String>,
}

/// `20:00`-`07:00` unless overridden by `VIGIL_NIGHT_WINDOW_START`/`_END`
/// (`HH:MM`, 24-hour). The CLI surface has no flag for this — it's a
/// deployment-wide constant, not a per-invocation choice.
pub fn night_window() -> NightWindow {
    let start = std::env::var("VIGIL_NIGHT_WINDOW_START")
        .ok()
        .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
        .unwrap_or_else(|| NaiveTime::from_hms_opt(20, 0, 0).unwrap());
    let end = std::env::var("VIGIL_NIGHT_WINDOW_END")
        .ok()
        .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
        .unwrap_or_else(|| NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    NightWindow::new(start, end)
}

pub fn build_cycle_params(config: LoadedConfig, flags: &CommonRunFlags, selection: RepoSelection) -> CycleParams {
    let cache_dir = context::resolve_cache_dir(flags.cache_dir.clone());
    let agent = context::build_agent(&config.ai);
    let env_manager = context::build_env_manager();
    let allowlist = context::build_allowlist();

    CycleParams {
        cache_dir,
        mode: flags.mode.into(),
        night_window: night_window(),
        manual_ttl: ChronoDuration::hours(flags.manual_ttl_hours),
        idle_ticks_to_end: flags.idle_ticks_to_end,
        review_every_n_beads: 0,
        tick_duration: ChronoDuration::minutes(flags.tick_minutes),
        selection,
        focus: flags.focus.clone(),
        replan: flags.replan,
        max_parallel: context::resolve_max_parallel(flags.max_parallel),
        repos: config.repos,
        overlays: config.overlays,
        executor_config: ExecutorConfig {
            max_beads_per_tick: flags.max_beads_per_tick,
            min_minutes_to_start_new_bead: flags.min_minutes_to_start_new_bead,
            diff_caps: DiffCaps {
                max_files_changed: flags.diff_cap_files,
                max_lines_added: flags.diff_cap_lines,
            },
            replan: flags.replan,
            commit_on_failure: flags.commit_on_failure,
        },
        agent,
        env_manager,
        allowlist,
        ai_model: config.ai.ai.model.clone(),
        ai_reasoning_effort: config.ai.ai.reasoning_effort.clone(),
    }
}
