//! The immutable `RunState` value type and its transitions.
//!
//! `RunState` never mutates in place — every transition is construct-and-
//! replace, matching the frozen-dataclass shape of the system this
//! orchestrator reimplements (see the workspace's design notes on
//! `Dataclasses with frozen=True`).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Automated,
    Manual,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    WindowEnd,
    IdleTicks,
    Expired,
    ModeMismatch,
    OrphanedOwnerDead,
    Explicit,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::WindowEnd => "window_end",
            EndReason::IdleTicks => "idle_ticks",
            EndReason::Expired => "expired",
            EndReason::ModeMismatch => "mode_mismatch",
            EndReason::OrphanedOwnerDead => "orphaned_owner_dead",
            EndReason::Explicit => "explicit",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of an active (or just-ended) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub mode: RunMode,
    pub created_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Automated runs always carry the end of their containing night
    /// window; manual runs don't have one.
    pub window_end_at: Option<DateTime<Utc>>,
    pub tick_count: u64,
    pub consecutive_idle_ticks: u64,
    pub beads_attempted_total: u64,
    pub beads_attempted_since_review: u64,
}

impl RunState {
    /// Construct a freshly-minted run. Panics (a programmer error, not a
    /// runtime one) if an automated run is constructed without a window end
    /// — that invariant must be enforced by the caller before reaching here.
    pub fn new(
        run_id: impl Into<String>,
        mode: RunMode,
        now: DateTime<Utc>,
        window_end_at: Option<DateTime<Utc>>,
        manual_ttl: ChronoDuration,
    ) -> Self {
        let expires_at = match mode {
            RunMode::Automated => {
                window_end_at.expect("automated runs must carry a window_end_at")
            }
            RunMode::Manual => now + manual_ttl,
        };
        Self {
            run_id: run_id.into(),
            mode,
            created_at: now,
            last_tick_at: now,
            expires_at,
            window_end_at,
            tick_count: 0,
            consecutive_idle_ticks: 0,
            beads_attempted_total: 0,
            beads_attempted_since_review: 0,
        }
    }

    /// Apply one tick's delta, returning a new state.
    pub fn on_tick(
        &self,
        now: DateTime<Utc>,
        actionable_work_found: bool,
        manual_ttl: ChronoDuration,
        beads_attempted_delta: u64,
    ) -> RunState {
        let expires_at = match self.mode {
            RunMode::Automated => {
                let window_end = self
                    .window_end_at
                    .expect("automated runs must carry a window_end_at");
                std::cmp::min(window_end, self.expires_at)
            }
            RunMode::Manual => now + manual_ttl,
        };

        RunState {
            run_id: self.run_id.clone(),
            mode: self.mode,
            created_at: self.created_at,
            last_tick_at: now,
            expires_at,
            window_end_at: self.window_end_at,
            tick_count: self.tick_count + 1,
            consecutive_idle_ticks: if actionable_work_found {
                0
            } else {
                self.consecutive_idle_ticks + 1
            },
            beads_attempted_total: self.beads_attempted_total + beads_attempted_delta,
            beads_attempted_since_review: self.beads_attempted_since_review + beads_attempted_delta,
        }
    }

    /// Reset the since-review counter after writing a cadence review.
    pub fn after_review(&self) -> RunState {
        RunState {
            beads_attempted_since_review: 0,
            ..self.clone()
        }
    }

    /// Whether the run should end now, and why.
    pub fn should_end(&self, now: DateTime<Utc>, idle_ticks_to_end: u64) -> Option<EndReason> {
        if self.mode == RunMode::Automated {
            if let Some(window_end) = self.window_end_at {
                if now >= window_end {
                    return Some(EndReason::WindowEnd);
                }
            }
        }
        if self.consecutive_idle_ticks >= idle_ticks_to_end {
            return Some(EndReason::IdleTicks);
        }
        None
    }

    /// Whether a cadence review is due.
    pub fn review_due(&self, every_n_beads: u64) -> bool {
        every_n_beads > 0 && self.beads_attempted_since_review >= every_n_beads
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-01-15T02:00:00Z".parse().unwrap()
    }

    #[test]
    fn on_tick_resets_idle_counter_when_work_found() {
        let state = RunState::new(
            "r1",
            RunMode::Manual,
            now(),
            None,
            ChronoDuration::hours(4),
        );
        let ticked = state.on_tick(now() + ChronoDuration::minutes(10), false, ChronoDuration::hours(4), 0);
        assert_eq!(ticked.consecutive_idle_ticks, 1);
        let ticked2 = ticked.on_tick(now() + ChronoDuration::minutes(20), true, ChronoDuration::hours(4), 2);
        assert_eq!(ticked2.consecutive_idle_ticks, 0);
        assert_eq!(ticked2.beads_attempted_total, 2);
        assert_eq!(ticked2.tick_count, 2);
    }

    #[test]
    fn automated_expiry_never_exceeds_window_end() {
        let window_end = now() + ChronoDuration::hours(5);
        let state = RunState::new("r1", RunMode::Automated, now(), Some(window_end), ChronoDuration::hours(4));
        let ticked = state.on_tick(now() + ChronoDuration::hours(1), true, ChronoDuration::hours(4), 1);
        assert_eq!(ticked.expires_at, window_end);
    }

    #[test]
    fn manual_expiry_extends_with_each_tick() {
        let state = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        let t1 = now() + ChronoDuration::minutes(30);
        let ticked = state.on_tick(t1, true, ChronoDuration::hours(4), 1);
        assert_eq!(ticked.expires_at, t1 + ChronoDuration::hours(4));
    }

    #[test]
    fn should_end_window_end_for_automated() {
        let window_end = now() + ChronoDuration::minutes(30);
        let state = RunState::new("r1", RunMode::Automated, now(), Some(window_end), ChronoDuration::hours(4));
        assert_eq!(state.should_end(now(), 5), None);
        assert_eq!(state.should_end(window_end, 5), Some(EndReason::WindowEnd));
    }

    #[test]
    fn should_end_idle_ticks() {
        let mut state = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        for _ in 0..2 {
            state = state.on_tick(now(), false, ChronoDuration::hours(4), 0);
        }
        assert_eq!(state.consecutive_idle_ticks, 2);
        assert_eq!(state.should_end(now(), 2), Some(EndReason::IdleTicks));
        assert_eq!(state.should_end(now(), 3), None);
    }

    #[test]
    fn review_due_fires_at_threshold() {
        let mut state = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        state = state.on_tick(now(), true, ChronoDuration::hours(4), 3);
        assert!(!state.review_due(5));
        state = state.on_tick(now(), true, ChronoDuration::hours(4), 2);
        assert!(state.review_due(5));
        let reset = state.after_review();
        assert_eq!(reset.beads_attempted_since_review, 0);
        assert_eq!(reset.beads_attempted_total, 5);
    }

    #[test]
    fn counters_are_non_decreasing_across_ticks() {
        let mut state = RunState::new("r1", RunMode::Manual, now(), None, ChronoDuration::hours(4));
        let mut prev_tick = state.tick_count;
        let mut prev_total = state.beads_attempted_total;
        for i in 0..5 {
            state = state.on_tick(now() + ChronoDuration::minutes(i), i % 2 == 0, ChronoDuration::hours(4), 1);
            assert!(state.tick_count > prev_tick);
            assert!(state.beads_attempted_total >= prev_total);
            prev_tick = state.tick_count;
            prev_total = state.beads_attempted_total;
        }
    }
}
