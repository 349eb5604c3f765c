/**************** Discharging worker ****************/

// Drains the battery under negative current/voltage/power limits until the
// measured current rises past the cutoff, then drives the supply back to
// safe state. The half driver is shared with the cycler.

use std::sync::{Arc, RwLock};

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::engine::types::{
    spawn_worker, DischargeHalfEvent, DischargeStatus, EngineError, HalfOutcome, Outcome,
    TaskHandle,
};
use crate::engine::{output_enable, shutdown, SETTLE_DELAY};
use crate::session::{ConfigError, DischargeSession, DischargeStep, SessionConfig};
use crate::supply::{PowerSupply, SupplyError};

// Mirror images of the charging margins: the sink-direction limits sit just
// below the working range, so the subtractions push them further negative.
const VOLTAGE_LIMIT_MARGIN: f64 = 0.5;
const NEGATIVE_CURRENT_LIMIT_MARGIN: f64 = 10.0;
const NEGATIVE_POWER_LIMIT_MARGIN: f64 = 100.0;
const STAGE_POWER_MARGIN: f64 = 50.0;

/// Validate the config and spawn a standalone discharge worker.
pub fn spawn_discharge(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
) -> Result<TaskHandle<DischargeStatus>, ConfigError> {
    cfg.validate()?;
    Ok(spawn_worker(
        DischargeStatus::default(),
        move |state, stop_rx| discharge_task(supply, cfg, state, stop_rx),
    ))
}

async fn discharge_task(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
    state: Arc<RwLock<DischargeStatus>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<Outcome, EngineError> {
    info!(
        "discharge worker started: {} A down to {} V, cutoff {} A",
        cfg.discharge_current, cfg.discharge_voltage, cfg.cutoff_current
    );
    let result = run_discharge_half(&*supply, &cfg, &mut stop_rx, |event| {
        if let DischargeHalfEvent::Tick(current) = event {
            state.write().unwrap().last_current = Some(current);
        }
    })
    .await;
    if matches!(result, Ok(HalfOutcome::Done)) {
        state.write().unwrap().cutoff_reached = true;
    }
    let outcome = shutdown::finish(&*supply, result).await;
    info!("discharge worker finished");
    outcome
}

/// Program the protection limits for a discharge session.
pub(crate) async fn discharger_initialize(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
) -> Result<(), SupplyError> {
    debug!("initializing discharger limits");
    supply.highlight_frontpanel().await?;
    supply
        .set_voltage_limit(cfg.discharge_voltage + VOLTAGE_LIMIT_MARGIN, true)
        .await?;
    supply
        .set_negative_current_limit(
            cfg.discharge_current - NEGATIVE_CURRENT_LIMIT_MARGIN,
            true,
        )
        .await?;
    supply
        .set_negative_power_limit(
            cfg.discharge_voltage * cfg.discharge_current - NEGATIVE_POWER_LIMIT_MARGIN,
            true,
        )
        .await?;
    sleep(SETTLE_DELAY).await;
    Ok(())
}

/// Program the discharge setpoint block.
pub(crate) async fn apply_discharge_setpoints(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
) -> Result<(), SupplyError> {
    debug!("applying discharge setpoints");
    supply.set_voltage(cfg.discharge_voltage).await?;
    supply.set_negative_current(cfg.discharge_current).await?;
    supply
        .set_negative_power(
            cfg.discharge_voltage * cfg.discharge_current - STAGE_POWER_MARGIN,
        )
        .await?;
    sleep(SETTLE_DELAY).await;
    Ok(())
}

/// One full discharge half: initialize, drain until the cutoff. Safe-state
/// handling is the caller's, as with the charge half.
pub(crate) async fn run_discharge_half(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
    stop_rx: &mut watch::Receiver<bool>,
    mut observe: impl FnMut(DischargeHalfEvent),
) -> Result<HalfOutcome, SupplyError> {
    discharger_initialize(supply, cfg).await?;
    apply_discharge_setpoints(supply, cfg).await?;
    output_enable(supply).await?;
    observe(DischargeHalfEvent::Running);

    let mut session = DischargeSession::new(cfg);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                info!("stop requested while discharging");
                return Ok(HalfOutcome::Stopped);
            }
            _ = sleep(cfg.tick_interval) => {}
        }

        let current = supply.measure_current().await?;
        observe(DischargeHalfEvent::Tick(current));
        match session.tick(current) {
            DischargeStep::Continue => {
                debug!("discharging, current {current} A");
            }
            DischargeStep::Cutoff => {
                info!(
                    "current {current} A rose above cutoff {} A, discharge complete",
                    cfg.cutoff_current
                );
                return Ok(HalfOutcome::Done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::mock::{Call, MockSupply};
    use std::time::Duration;

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
            cycle_count: 1,
            start_with_charging: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_exactly_when_current_crosses_cutoff() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&[-50.0, -30.0, -10.0, -1.0]);

        let mut handle = spawn_discharge(supply.clone(), config()).unwrap();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let snapshot = handle.snapshot();
        assert!(snapshot.cutoff_reached);
        assert_eq!(snapshot.last_current, Some(-1.0));

        // All four readings were taken; -10 A did not stop the session.
        let calls = supply.calls();
        let measures = calls.iter().filter(|c| **c == Call::MeasureCurrent).count();
        assert_eq!(measures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limits_are_programmed_before_setpoints() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&[-1.0]);

        let mut handle = spawn_discharge(supply.clone(), config()).unwrap();
        handle.join().await.unwrap();

        let calls = supply.calls();
        assert_eq!(calls[0], Call::Highlight);
        assert_eq!(calls[1], Call::SetVoltageLimit(12.0, true));
        assert_eq!(calls[2], Call::SetNegativeCurrentLimit(-60.0, true));
        assert_eq!(calls[3], Call::SetNegativePowerLimit(-675.0, true));
        assert_eq!(calls[4], Call::SetVoltage(11.5));
        assert_eq!(calls[5], Call::SetNegativeCurrent(-50.0));
        assert_eq!(calls[6], Call::SetNegativePower(-625.0));
        assert_eq!(calls[7], Call::SetOutput(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_wins_over_cutoff() {
        let supply = Arc::new(MockSupply::new());
        // Deep in the discharge, far from the cutoff.
        supply.script_currents(&[-50.0]);

        let mut handle = spawn_discharge(supply.clone(), config()).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.request_stop();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Stopped);
        assert!(!handle.snapshot().cutoff_reached);

        // Safe state ran exactly once.
        let starts = supply
            .calls()
            .iter()
            .filter(|c| **c == Call::SetVoltageLimit(0.0, true))
            .count();
        assert_eq!(starts, 1);
    }
}
