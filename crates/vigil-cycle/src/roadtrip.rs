//! `roadtrip`: repeated cycles over a multi-hour window, the shape an
//! unattended overnight run actually takes. One process, one cadence, many
//! ticks, until the deadline or a Ctrl-C.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use vigil_harness::shutdown::ShutdownSignal;

use crate::cycle::{self, CycleError, CycleOutcome, CycleParams};

#[derive(Debug, thiserror::Error)]
pub enum RoadtripError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

pub struct RoadtripParams {
    pub base: CycleParams,
    pub cadence: chrono::Duration,
    pub until: DateTime<Utc>,
    pub shutdown: ShutdownSignal,
}

#[derive(Debug, Default)]
pub struct RoadtripReport {
    pub cycles_run: u64,
    pub total_beads_attempted: u64,
    pub stopped_early: bool,
}

/// Run [`cycle::run_cycle`] on `params.cadence`, stopping at `params.until`
/// or on shutdown signal. A single cycle's error is logged and does not
/// stop the roadtrip; the loop itself only stops on deadline or signal.
pub async fn roadtrip(params: RoadtripParams) -> Result<RoadtripReport, RoadtripError> {
    let mut rx = params.shutdown.subscribe();
    let mut report = RoadtripReport::default();

    loop {
        if Utc::now() >= params.until {
            info!("roadtrip reached its deadline");
            break;
        }
        if params.shutdown.is_shutting_down() {
            report.stopped_early = true;
            break;
        }

        match cycle::run_cycle(params.base.clone()).await {
            Ok(CycleOutcome::OutsideWindow) => {
                info!("outside the night window, nothing to do this tick");
            }
            Ok(CycleOutcome::Ticked {
                run_id,
                beads_attempted,
                actionable_work_found,
                ended,
            }) => {
                report.cycles_run += 1;
                report.total_beads_attempted += beads_attempted;
                info!(run_id = %run_id, beads_attempted, actionable_work_found, ended, "cycle finished");
            }
            Err(e) => {
                warn!(error = %e, "cycle failed; roadtrip continues");
            }
        }

        let remaining = params.until - Utc::now();
        if remaining <= chrono::Duration::zero() {
            break;
        }
        let sleep_for = std::cmp::min(params.cadence, remaining);
        let sleep_for = sleep_for.to_std().unwrap_or(std::time::Duration::from_secs(1));

        tokio::select! {
            _ = rx.recv() => {
                report.stopped_early = true;
                break;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_defaults_to_zero_cycles() {
        let report = RoadtripReport::default();
        assert_eq!(report.cycles_run, 0);
        assert!(!report.stopped_early);
    }
}
