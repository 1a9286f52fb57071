//! `orchestrator run-info`: inspect past and current runs without
//! touching the run lock. Reads `run.json`/`run_summary.json` straight off
//! disk under `cache/runs/<run_id>/`, newest first.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use vigil_audit::summary::{load_run_summary, RunSummary};
use vigil_core::atomic;
use vigil_core::paths;
use vigil_core::run_state::RunState;

#[derive(Debug, Args)]
pub struct RunInfoArgs {
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long = "repo-id")]
    repo_id: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long, default_value_t = 40)]
    tail_lines: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct RunInfoEntry {
    run: Option<RunState>,
    summary: Option<RunSummary>,
    log_tail: Vec<String>,
}

fn list_run_ids(cache_dir: &Path) -> Result<Vec<String>> {
    let runs_dir = cache_dir.join("runs");
    if !runs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<(std::time::SystemTime, String)> = Vec::new();
    for entry in std::fs::read_dir(&runs_dir).with_context(|| format!("reading {}", runs_dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((modified, name));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries.into_iter().map(|(_, name)| name).collect())
}

fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|s| s.to_string()).collect()
}

pub fn run(_config_dir: &Path, args: RunInfoArgs) -> Result<()> {
    let cache_dir = super::context::resolve_cache_dir(None);

    let run_ids: Vec<String> = if let Some(id) = &args.run_id {
        vec![id.clone()]
    } else {
        list_run_ids(&cache_dir)?.into_iter().take(args.limit).collect()
    };

    let mut entries = Vec::new();
    for run_id in &run_ids {
        let run: Option<RunState> = atomic::read_json(&paths::run_json_path(&cache_dir, run_id))?;
        let summary = load_run_summary(&cache_dir, run_id)?;

        if let Some(repo_id) = &args.repo_id {
            if !summary.as_ref().map(|s| s.repo_ids.iter().any(|r| r == repo_id)).unwrap_or(true) {
                continue;
            }
            let log_path = paths::repo_exec_log_path(&cache_dir, run_id, repo_id);
            entries.push((run_id.clone(), RunInfoEntry { run, summary, log_tail: tail_lines(&log_path, args.tail_lines) }));
        } else {
            let log_path = paths::orchestrator_log_path(&cache_dir, run_id);
            entries.push((run_id.clone(), RunInfoEntry { run, summary, log_tail: tail_lines(&log_path, args.tail_lines) }));
        }
    }

    if args.json {
        let as_map: std::collections::BTreeMap<String, &RunInfoEntry> =
            entries.iter().map(|(id, e)| (id.clone(), e)).collect();
        println!("{}", serde_json::to_string_pretty(&as_map)?);
        return Ok(());
    }

    for (run_id, entry) in &entries {
        println!("== run {run_id} ==");
        if let Some(run) = &entry.run {
            println!("mode={:?} tick_count={} beads_attempted_total={}", run.mode, run.tick_count, run.beads_attempted_total);
        } else {
            println!("(no run.json)");
        }
        if let Some(summary) = &entry.summary {
            println!(
                "repos_attempted={} repos_skipped={} beads_attempted={} beads_closed={} beads_failed={}",
                summary.totals.repos_attempted,
                summary.totals.repos_skipped,
                summary.totals.beads_attempted,
                summary.totals.beads_closed,
                summary.totals.beads_failed
            );
        }
        for line in &entry.log_tail {
            println!("  {line}");
        }
        println!();
    }
    Ok(())
}
