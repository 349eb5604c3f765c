/**************** Cycling worker ****************/

// Alternates full charge and discharge halves with rest pauses in between,
// for a bounded number of charge+discharge pairs. The halves are the same
// drivers the standalone workers run; this task only sequences them,
// counts pairs, and parks the output between phases.
//
// A pair is counted when its second half completes, so which half
// increments the counter depends on which half opens the run.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::engine::charge::run_charge_half;
use crate::engine::discharge::run_discharge_half;
use crate::engine::types::{
    spawn_worker, ChargeHalfEvent, CycleStatus, DischargeHalfEvent, EngineError, HalfOutcome,
    Outcome, TaskHandle,
};
use crate::engine::shutdown;
use crate::session::{ConfigError, CyclePhase, SessionConfig};
use crate::supply::{PowerSupply, SupplyError};

/// Validate the config and spawn a cycling worker.
pub fn spawn_cycle(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
) -> Result<TaskHandle<CycleStatus>, ConfigError> {
    cfg.validate()?;
    Ok(spawn_worker(CycleStatus::default(), move |state, stop_rx| {
        cycle_task(supply, cfg, state, stop_rx)
    }))
}

async fn cycle_task(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
    state: Arc<RwLock<CycleStatus>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<Outcome, EngineError> {
    info!(
        "cycling worker started: {} cycles, opening with the {} half",
        cfg.cycle_count,
        if cfg.start_with_charging {
            "charge"
        } else {
            "discharge"
        }
    );
    let result = drive_cycles(&*supply, &cfg, &state, &mut stop_rx).await;
    // One full safe-state pass for the whole run, not one per half.
    let outcome = shutdown::finish(&*supply, result).await;
    state.write().unwrap().phase = CyclePhase::Idle;
    info!("cycling worker finished");
    outcome
}

async fn drive_cycles(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
    state: &Arc<RwLock<CycleStatus>>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<HalfOutcome, SupplyError> {
    let mut completed: u32 = 0;
    let mut charge_next = cfg.start_with_charging;

    while completed < cfg.cycle_count {
        if charge_next {
            set_phase(state, CyclePhase::ChargeInit);
            info!("charge half starting ({completed}/{} cycles done)", cfg.cycle_count);
            let half = run_charge_half(supply, cfg, stop_rx, |event| {
                if let ChargeHalfEvent::Running = event {
                    set_phase(state, CyclePhase::Charging);
                }
            })
            .await?;
            if half == HalfOutcome::Stopped {
                return Ok(HalfOutcome::Stopped);
            }
            phase_finalize(supply).await?;
            if rest(stop_rx, cfg.rest_after_charge, "charge").await {
                return Ok(HalfOutcome::Stopped);
            }
            if !cfg.start_with_charging {
                completed += 1;
                close_pair(state, completed);
            }
        } else {
            set_phase(state, CyclePhase::DischargeInit);
            info!(
                "discharge half starting ({completed}/{} cycles done)",
                cfg.cycle_count
            );
            let half = run_discharge_half(supply, cfg, stop_rx, |event| {
                if let DischargeHalfEvent::Running = event {
                    set_phase(state, CyclePhase::Discharging);
                }
            })
            .await?;
            if half == HalfOutcome::Stopped {
                return Ok(HalfOutcome::Stopped);
            }
            phase_finalize(supply).await?;
            if rest(stop_rx, cfg.rest_after_discharge, "discharge").await {
                return Ok(HalfOutcome::Stopped);
            }
            if cfg.start_with_charging {
                completed += 1;
                close_pair(state, completed);
            }
        }
        charge_next = !charge_next;
    }

    info!("all {completed} cycles completed");
    Ok(HalfOutcome::Done)
}

fn set_phase(state: &Arc<RwLock<CycleStatus>>, phase: CyclePhase) {
    debug!("cycle phase -> {phase}");
    state.write().unwrap().phase = phase;
}

fn close_pair(state: &Arc<RwLock<CycleStatus>>, completed: u32) {
    info!("cycle {completed} complete");
    state.write().unwrap().completed_cycles = completed;
}

/// Park the output between halves: zero the setpoints and disable the
/// output, leaving the limits as the just-finished half programmed them.
/// The full limit-tightening pass is reserved for the end of the run.
async fn phase_finalize(supply: &dyn PowerSupply) -> Result<(), SupplyError> {
    debug!("half complete, parking the output");
    supply.set_voltage(0.0).await?;
    supply.set_current(0.0).await?;
    supply.set_negative_current(0.0).await?;
    supply.set_power(0.0).await?;
    supply.set_negative_power(0.0).await?;
    supply.set_output(false).await?;
    Ok(())
}

/// Sleep out a rest interval; true means a stop request arrived first.
async fn rest(stop_rx: &mut watch::Receiver<bool>, period: Duration, after: &str) -> bool {
    debug!("resting {period:?} after the {after} half");
    tokio::select! {
        _ = stop_rx.changed() => {
            info!("stop requested during the rest after the {after} half");
            true
        }
        _ = sleep(period) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::mock::{Call, MockSupply};

    fn config() -> SessionConfig {
        SessionConfig {
            bulk_current: 100.0,
            bulk_voltage: 14.4,
            absorption_ratio: 0.8,
            float_ratio: 0.02,
            float_voltage: 13.5,
            float_time: Duration::from_secs(60),
            discharge_current: -50.0,
            discharge_voltage: 11.5,
            cutoff_current: -2.0,
            tick_interval: Duration::from_secs(10),
            rest_after_charge: Duration::from_secs(30),
            rest_after_discharge: Duration::from_secs(30),
            cycle_count: 2,
            start_with_charging: true,
        }
    }

    /// Readings for one charge half (taper through both thresholds).
    const CHARGE_TAPER: [f64; 3] = [100.0, 75.0, 1.5];
    /// Readings for one discharge half (decay past the cutoff).
    const DISCHARGE_DECAY: [f64; 2] = [-50.0, -1.0];

    fn limit_zero_count(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|c| **c == Call::SetVoltageLimit(0.0, true))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_cycles_counted_at_discharge_close() {
        let supply = Arc::new(MockSupply::new());
        for _ in 0..2 {
            supply.script_currents(&CHARGE_TAPER);
            supply.script_currents(&DISCHARGE_DECAY);
        }

        let mut handle = spawn_cycle(supply.clone(), config()).unwrap();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.completed_cycles, 2);
        assert_eq!(snapshot.phase, CyclePhase::Idle);

        let calls = supply.calls();
        // Ten polls: (3 charge + 2 discharge) per cycle.
        let measures = calls.iter().filter(|c| **c == Call::MeasureCurrent).count();
        assert_eq!(measures, 10);

        // The full limit-tightening pass happened exactly once, at the end.
        assert_eq!(limit_zero_count(&calls), 1);
        assert_eq!(calls[calls.len() - 2], Call::SetOutput(false));
        assert_eq!(calls[calls.len() - 1], Call::Highlight);

        // Each of the four halves parked the output, plus the final pass.
        let offs = calls.iter().filter(|c| **c == Call::SetOutput(false)).count();
        assert_eq!(offs, 5);
        let ons = calls.iter().filter(|c| **c == Call::SetOutput(true)).count();
        assert_eq!(ons, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirrored_order_counts_at_charge_close() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&DISCHARGE_DECAY);
        supply.script_currents(&CHARGE_TAPER);

        let mut cfg = config();
        cfg.cycle_count = 1;
        cfg.start_with_charging = false;

        let mut handle = spawn_cycle(supply.clone(), cfg).unwrap();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(handle.snapshot().completed_cycles, 1);

        let calls = supply.calls();
        // Opens with the discharge limit block, not the charge one.
        assert_eq!(calls[1], Call::SetVoltageLimit(12.0, true));
        assert_eq!(calls[2], Call::SetNegativeCurrentLimit(-60.0, true));
        let measures = calls.iter().filter(|c| **c == Call::MeasureCurrent).count();
        assert_eq!(measures, 5);
        assert_eq!(limit_zero_count(&calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_halves_runs_single_safe_state_pass() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&CHARGE_TAPER);
        // Discharge half would start next; stop during the rest instead.

        let mut handle = spawn_cycle(supply.clone(), config()).unwrap();
        // Past the charge half (3 settles + 3 ticks + dwell), into the rest.
        tokio::time::sleep(Duration::from_secs(100)).await;
        handle.request_stop();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Stopped);

        let calls = supply.calls();
        assert_eq!(limit_zero_count(&calls), 1);
        assert_eq!(handle.snapshot().completed_cycles, 0);
        assert_eq!(handle.snapshot().phase, CyclePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supply_failure_mid_cycle_aborts_into_safe_state() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&CHARGE_TAPER);
        supply.script_current_failure();

        let mut handle = spawn_cycle(supply.clone(), config()).unwrap();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, EngineError::Supply(_)));
        assert_eq!(limit_zero_count(&supply.calls()), 1);
    }
}
