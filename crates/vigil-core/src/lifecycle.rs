//! Run Lifecycle: the three operations that start, advance, and end a run,
//! serialized by the caller holding the run lock.
//!
//! This module never acquires `<cache>/run.lock` itself — every public
//! function here assumes the caller already holds an `ExclusiveLock` on it,
//! the same division of responsibility the rest of the workspace uses:
//! locking is the caller's job, the lock-holder's invariants are this
//! module's job.

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atomic::{self, AtomicError};
use crate::error::{ErrorKind, OrchestratorError};
use crate::lockfile::pid_alive;
use crate::night_window::NightWindow;
use crate::paths;
use crate::run_state::{EndReason, RunMode, RunState};
use crate::signoff::RunSignoff;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("artifact error: {0}")]
    Artifact(#[from] AtomicError),
}

/// Written to `run_end.json` when a run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEnd {
    pub run_id: String,
    pub ended_at: DateTime<Utc>,
    pub reason: EndReason,
}

/// The orphan-detection marker the Cycle Controller writes before it starts
/// doing work inside a run, and clears when it finishes a tick cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInProgress {
    pub pid: u32,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

impl CycleInProgress {
    pub fn for_current_process(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pid: std::process::id(),
            run_id: run_id.into(),
            started_at: now,
        }
    }
}

pub fn write_cycle_in_progress(cache: &Path, marker: &CycleInProgress) -> Result<(), LifecycleError> {
    atomic::write_json_atomic(&paths::cycle_in_progress_path(cache), marker)?;
    Ok(())
}

pub fn clear_cycle_in_progress(cache: &Path) {
    let _ = std::fs::remove_file(paths::cycle_in_progress_path(cache));
}

/// Outcome of [`ensure_active_run`]. A run is always either returned active
/// (existing or freshly minted) or rejected outright — there is no "no run,
/// but that's fine" resting state for the caller to juggle.
#[derive(Debug)]
pub enum EnsureOutcome {
    Active(RunState),
    /// `mode` was `Automated` and `now` falls outside the night window.
    OutsideWindow,
}

/// Ensure a run is active for `mode` at `now`, minting one if needed.
///
/// Order of operations: recover any orphaned run left behind by a dead
/// cycle-controller process, reconcile the current run marker against
/// `mode` and expiry, then — only if no run survived that reconciliation —
/// check the night window (automated only) and the signoff gate before
/// minting a fresh run.
pub fn ensure_active_run(
    cache: &Path,
    mode: RunMode,
    now: DateTime<Utc>,
    night_window: NightWindow,
    manual_ttl: ChronoDuration,
    idle_ticks_to_end: u64,
) -> Result<EnsureOutcome, LifecycleError> {
    recover_orphan(cache, now)?;

    if let Some(current) = load_current_run(cache)? {
        if current.mode == mode {
            if current.is_expired(now) {
                end_current_run(cache, &current, EndReason::Expired)?;
            } else if let Some(reason) = current.should_end(now, idle_ticks_to_end) {
                end_current_run(cache, &current, reason)?;
            } else {
                return Ok(EnsureOutcome::Active(current));
            }
        } else {
            end_current_run(cache, &current, EndReason::ModeMismatch)?;
        }
    }

    if mode == RunMode::Automated && !night_window.contains(now) {
        return Ok(EnsureOutcome::OutsideWindow);
    }

    check_signoff_gate(cache)?;

    let window_end_at = match mode {
        RunMode::Automated => Some(night_window.end_for(now)),
        RunMode::Manual => None,
    };
    let run_id = mint_run_id(now);
    let run = RunState::new(run_id.clone(), mode, now, window_end_at, manual_ttl);
    persist_run(cache, &run)?;
    log_event(cache, &run.run_id, &format!("start_run mode={mode:?} expires_at={}", run.expires_at))?;

    Ok(EnsureOutcome::Active(run))
}

/// Outcome of [`tick_run`].
pub enum TickOutcome {
    Active(RunState),
    Ended { state: RunState, end: RunEnd },
}

/// Apply one tick's delta to the run named `run_id`. The caller must have
/// verified (via [`ensure_active_run`]) that this run is the current one.
pub fn tick_run(
    cache: &Path,
    run_id: &str,
    now: DateTime<Utc>,
    actionable_work_found: bool,
    manual_ttl: ChronoDuration,
    idle_ticks_to_end: u64,
    beads_attempted_delta: u64,
) -> Result<TickOutcome, LifecycleError> {
    let current = load_current_run(cache)?.ok_or_else(|| {
        OrchestratorError::new(ErrorKind::ArtifactCorrupt, format!("no current run to tick for {run_id}"))
    })?;
    if current.run_id != run_id {
        return Err(OrchestratorError::new(
            ErrorKind::ArtifactCorrupt,
            format!("tick_run called for {run_id} but current run is {}", current.run_id),
        )
        .into());
    }

    if current.is_expired(now) {
        let end = end_current_run(cache, &current, EndReason::Expired)?;
        return Ok(TickOutcome::Ended { state: current, end });
    }

    let ticked = current.on_tick(now, actionable_work_found, manual_ttl, beads_attempted_delta);
    persist_run(cache, &ticked)?;
    log_event(
        cache,
        &ticked.run_id,
        &format!("tick_run tick={} beads_delta={beads_attempted_delta} actionable={actionable_work_found}", ticked.tick_count),
    )?;

    if let Some(reason) = ticked.should_end(now, idle_ticks_to_end) {
        let end = end_current_run(cache, &ticked, reason)?;
        Ok(TickOutcome::Ended { state: ticked, end })
    } else {
        Ok(TickOutcome::Active(ticked))
    }
}

/// Record the run's end and remove the `current_run` marker. Idempotent if
/// `run_end.json` already exists with a matching reason.
pub fn end_current_run(cache: &Path, run: &RunState, reason: EndReason) -> Result<RunEnd, LifecycleError> {
    let end = RunEnd {
        run_id: run.run_id.clone(),
        ended_at: Utc::now(),
        reason,
    };
    atomic::write_json_atomic(&paths::run_end_path(cache, &run.run_id), &end)?;
    let _ = std::fs::remove_file(paths::current_run_path(cache));
    log_event(cache, &run.run_id, &format!("end_run reason={reason}"))?;
    Ok(end)
}

fn persist_run(cache: &Path, run: &RunState) -> Result<(), LifecycleError> {
    atomic::write_json_atomic(&paths::run_json_path(cache, &run.run_id), run)?;
    atomic::write_json_atomic(&paths::current_run_path(cache), run)?;
    Ok(())
}

/// Reset the since-review counter after a cadence review has been written,
/// persisting the new state the same way a tick would.
pub fn mark_reviewed(cache: &Path, run: &RunState) -> Result<RunState, LifecycleError> {
    let reviewed = run.after_review();
    persist_run(cache, &reviewed)?;
    Ok(reviewed)
}

pub fn load_current_run(cache: &Path) -> Result<Option<RunState>, LifecycleError> {
    match atomic::read_json::<RunState>(&paths::current_run_path(cache)) {
        Ok(v) => Ok(v),
        Err(e) => Err(OrchestratorError::new(ErrorKind::ArtifactCorrupt, format!("current_run.json: {e}")).into()),
    }
}

pub fn load_run_end(cache: &Path, run_id: &str) -> Result<Option<RunEnd>, LifecycleError> {
    match atomic::read_json::<RunEnd>(&paths::run_end_path(cache, run_id)) {
        Ok(v) => Ok(v),
        Err(e) => Err(OrchestratorError::new(ErrorKind::ArtifactCorrupt, format!("run_end.json for {run_id}: {e}")).into()),
    }
}

/// If a `cycle_in_progress` marker exists and its owning PID is dead, end
/// the associated run with `orphaned_owner_dead` and clear the marker. A
/// marker whose PID is alive is left alone — that's a live cycle, not an
/// orphan.
fn recover_orphan(cache: &Path, now: DateTime<Utc>) -> Result<Option<RunEnd>, LifecycleError> {
    let marker_path = paths::cycle_in_progress_path(cache);
    let marker: Option<CycleInProgress> = match atomic::read_json(&marker_path) {
        Ok(v) => v,
        Err(e) => return Err(OrchestratorError::new(ErrorKind::ArtifactCorrupt, format!("cycle_in_progress.json: {e}")).into()),
    };
    let Some(marker) = marker else {
        return Ok(None);
    };
    if pid_alive(marker.pid) {
        return Ok(None);
    }

    tracing::warn!(run_id = %marker.run_id, pid = marker.pid, "recovering orphaned run: owner process is dead");
    let end = if let Some(current) = load_current_run(cache)? {
        if current.run_id == marker.run_id {
            Some(end_current_run(cache, &current, EndReason::OrphanedOwnerDead)?)
        } else {
            None
        }
    } else {
        let end = RunEnd {
            run_id: marker.run_id.clone(),
            ended_at: now,
            reason: EndReason::OrphanedOwnerDead,
        };
        atomic::write_json_atomic(&paths::run_end_path(cache, &marker.run_id), &end)?;
        Some(end)
    };
    let _ = std::fs::remove_file(&marker_path);
    Ok(end)
}

/// Find the most recently ended run (by `ended_at`, then `run_id` as a
/// tiebreak) and verify its signoff exists and validates. Returns `Ok(())`
/// when there is nothing to sign off yet (no prior run) or the latest run's
/// signoff checks out.
fn check_signoff_gate(cache: &Path) -> Result<(), LifecycleError> {
    let Some((run_id, _)) = find_latest_ended_run(cache)? else {
        return Ok(());
    };

    let signoff_path = paths::run_signoff_json_path(cache, &run_id);
    let signoff: Option<RunSignoff> = match atomic::read_json(&signoff_path) {
        Ok(v) => v,
        Err(e) => {
            return Err(OrchestratorError::new(
                ErrorKind::RunSignoffInvalid,
                format!("run_signoff.json for {run_id} failed to parse: {e}"),
            )
            .with_next_action(format!("inspect and fix {}", signoff_path.display()))
            .into());
        }
    };

    let Some(signoff) = signoff else {
        return Err(OrchestratorError::new(
            ErrorKind::RunSignoffMissing,
            format!("run {run_id} ended without a signoff"),
        )
        .with_next_action(format!("orchestrator signoff --run-id {run_id} --reviewer <name>"))
        .into());
    };

    let final_review_path = paths::final_review_json_path(cache, &run_id);
    let final_review_bytes = std::fs::read(&final_review_path).map_err(|e| {
        OrchestratorError::new(
            ErrorKind::RunSignoffInvalid,
            format!("final_review.json for {run_id} unreadable: {e}"),
        )
    })?;

    let expected_json_name = final_review_path.file_name().and_then(|n| n.to_str()).unwrap_or("final_review.json");
    let expected_md_name = paths::final_review_md_path(cache, &run_id)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("final_review.md")
        .to_string();

    if !signoff.validates(expected_json_name, &expected_md_name, &final_review_bytes) {
        return Err(OrchestratorError::new(
            ErrorKind::RunSignoffInvalid,
            format!("signoff for {run_id} does not match final_review.json (tampered or stale)"),
        )
        .with_next_action(format!("orchestrator signoff --run-id {run_id} --reviewer <name>"))
        .into());
    }

    Ok(())
}

fn find_latest_ended_run(cache: &Path) -> Result<Option<(String, DateTime<Utc>)>, LifecycleError> {
    let runs_dir = cache.join("runs");
    let entries = match std::fs::read_dir(&runs_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OrchestratorError::new(ErrorKind::ArtifactCorrupt, format!("reading {}: {e}", runs_dir.display())).into()),
    };

    let mut latest: Option<(String, DateTime<Utc>)> = None;
    for entry in entries.filter_map(|e| e.ok()) {
        let run_id = entry.file_name().to_string_lossy().into_owned();
        let Some(end) = load_run_end(cache, &run_id)? else {
            continue;
        };
        let better = match &latest {
            None => true,
            Some((best_id, best_at)) => (end.ended_at, &run_id) > (*best_at, best_id),
        };
        if better {
            latest = Some((run_id, end.ended_at));
        }
    }
    Ok(latest)
}

fn mint_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
}

fn log_event(cache: &Path, run_id: &str, line: &str) -> Result<(), LifecycleError> {
    let ts = Utc::now();
    atomic::append_text(&paths::orchestrator_log_path(cache, run_id), &format!("{ts} {line}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_cache(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vigil-lifecycle-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn nightly() -> NightWindow {
        NightWindow::new(
            chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        )
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        use chrono::{NaiveDate, TimeZone};
        Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
    }

    #[test]
    fn automated_outside_window_is_rejected() {
        let cache = tmp_cache("outside-window");
        let outcome = ensure_active_run(&cache, RunMode::Automated, dt(2025, 1, 15, 12, 0), nightly(), ChronoDuration::hours(4), 5).unwrap();
        assert!(matches!(outcome, EnsureOutcome::OutsideWindow));
    }

    #[test]
    fn manual_run_starts_with_no_prior_history() {
        let cache = tmp_cache("manual-start");
        let outcome = ensure_active_run(&cache, RunMode::Manual, dt(2025, 1, 15, 12, 0), nightly(), ChronoDuration::hours(4), 5).unwrap();
        match outcome {
            EnsureOutcome::Active(run) => {
                assert_eq!(run.mode, RunMode::Manual);
                assert!(paths::current_run_path(&cache).exists());
            }
            _ => panic!("expected an active run"),
        }
    }

    #[test]
    fn reusing_an_active_run_returns_the_same_run_id() {
        let cache = tmp_cache("reuse");
        let now = dt(2025, 1, 15, 21, 0);
        let first = match ensure_active_run(&cache, RunMode::Automated, now, nightly(), ChronoDuration::hours(4), 5).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        let second = match ensure_active_run(&cache, RunMode::Automated, now + ChronoDuration::minutes(5), nightly(), ChronoDuration::hours(4), 5).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        assert_eq!(first.run_id, second.run_id);
    }

    #[test]
    fn mode_mismatch_ends_prior_run_and_starts_a_new_one() {
        let cache = tmp_cache("mode-mismatch");
        let now = dt(2025, 1, 15, 12, 0);
        let manual = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 5).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        let automated_attempt_time = dt(2025, 1, 15, 21, 0);
        let outcome = ensure_active_run(&cache, RunMode::Automated, automated_attempt_time, nightly(), ChronoDuration::hours(4), 5).unwrap();
        match outcome {
            EnsureOutcome::Active(run) => {
                assert_ne!(run.run_id, manual.run_id);
                assert_eq!(run.mode, RunMode::Automated);
            }
            _ => panic!("expected a fresh automated run"),
        }
        let end = load_run_end(&cache, &manual.run_id).unwrap().unwrap();
        assert_eq!(end.reason, EndReason::ModeMismatch);
    }

    #[test]
    fn signoff_gate_blocks_next_run_when_missing() {
        let cache = tmp_cache("signoff-gate");
        let now = dt(2025, 1, 15, 12, 0);
        let run = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 1).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        end_current_run(&cache, &run, EndReason::IdleTicks).unwrap();
        atomic::write_json_atomic(&paths::final_review_json_path(&cache, &run.run_id), &serde_json::json!({"run_id": run.run_id})).unwrap();

        let err = ensure_active_run(&cache, RunMode::Manual, now + ChronoDuration::hours(1), nightly(), ChronoDuration::hours(4), 1).unwrap_err();
        match err {
            LifecycleError::Orchestrator(e) => assert_eq!(e.kind, ErrorKind::RunSignoffMissing),
            other => panic!("expected RunSignoffMissing, got {other:?}"),
        }
    }

    #[test]
    fn signoff_gate_passes_once_signoff_validates() {
        let cache = tmp_cache("signoff-valid");
        let now = dt(2025, 1, 15, 12, 0);
        let run = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 1).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        end_current_run(&cache, &run, EndReason::IdleTicks).unwrap();
        let review_path = paths::final_review_json_path(&cache, &run.run_id);
        atomic::write_json_atomic(&review_path, &serde_json::json!({"run_id": run.run_id})).unwrap();
        let bytes = std::fs::read(&review_path).unwrap();
        let json_name = review_path.file_name().unwrap().to_str().unwrap().to_string();
        let md_name = paths::final_review_md_path(&cache, &run.run_id).file_name().unwrap().to_str().unwrap().to_string();
        let signoff = RunSignoff::new(run.run_id.clone(), "alice", now, json_name, md_name, &bytes, None).unwrap();
        atomic::write_json_atomic(&paths::run_signoff_json_path(&cache, &run.run_id), &signoff).unwrap();

        let outcome = ensure_active_run(&cache, RunMode::Manual, now + ChronoDuration::hours(1), nightly(), ChronoDuration::hours(4), 1).unwrap();
        assert!(matches!(outcome, EnsureOutcome::Active(_)));
    }

    #[test]
    fn tick_run_ends_on_idle_ticks() {
        let cache = tmp_cache("tick-idle");
        let now = dt(2025, 1, 15, 12, 0);
        let run = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 1).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        let outcome = tick_run(&cache, &run.run_id, now + ChronoDuration::minutes(10), false, ChronoDuration::hours(4), 1, 0).unwrap();
        match outcome {
            TickOutcome::Ended { end, .. } => assert_eq!(end.reason, EndReason::IdleTicks),
            TickOutcome::Active(_) => panic!("expected the run to end"),
        }
        assert!(load_current_run(&cache).unwrap().is_none());
    }

    #[test]
    fn orphaned_cycle_marker_ends_the_run_before_starting_a_new_one() {
        let cache = tmp_cache("orphan");
        let now = dt(2025, 1, 15, 12, 0);
        let run = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 5).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        write_cycle_in_progress(&cache, &CycleInProgress { pid: 4_000_000, run_id: run.run_id.clone(), started_at: now }).unwrap();

        let outcome = ensure_active_run(&cache, RunMode::Manual, now + ChronoDuration::minutes(1), nightly(), ChronoDuration::hours(4), 5).unwrap();
        assert!(matches!(outcome, EnsureOutcome::Active(_)));
        let end = load_run_end(&cache, &run.run_id).unwrap().unwrap();
        assert_eq!(end.reason, EndReason::OrphanedOwnerDead);
        assert!(!paths::cycle_in_progress_path(&cache).exists());
    }

    #[test]
    fn live_owner_marker_is_not_treated_as_orphaned() {
        let cache = tmp_cache("live-owner");
        let now = dt(2025, 1, 15, 12, 0);
        let run = match ensure_active_run(&cache, RunMode::Manual, now, nightly(), ChronoDuration::hours(4), 5).unwrap() {
            EnsureOutcome::Active(run) => run,
            _ => panic!("expected active"),
        };
        write_cycle_in_progress(&cache, &CycleInProgress::for_current_process(run.run_id.clone(), now)).unwrap();

        let outcome = ensure_active_run(&cache, RunMode::Manual, now + ChronoDuration::minutes(1), nightly(), ChronoDuration::hours(4), 5).unwrap();
        match outcome {
            EnsureOutcome::Active(active) => assert_eq!(active.run_id, run.run_id),
            _ => panic!("expected the untouched run to still be active"),
        }
        assert!(paths::cycle_in_progress_path(&cache).exists());
    }
}
