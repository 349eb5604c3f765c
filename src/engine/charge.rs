/**************** Charging worker ****************/

// Brings the output from disabled/zero to a full charge in three stages
// (Bulk, Absorption, Floating), then drives the supply back to safe state.
// The half driver below is also what the cycler runs for its charge phase,
// so both paths share one set of thresholds and margins.

use std::sync::{Arc, RwLock};

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::engine::types::{
    spawn_worker, ChargeHalfEvent, ChargeStatus, EngineError, HalfOutcome, Outcome, TaskHandle,
};
use crate::engine::{output_enable, shutdown, SETTLE_DELAY};
use crate::session::{ChargeSession, ChargeStage, ChargeStep, ConfigError, SessionConfig};
use crate::supply::{PowerSupply, SupplyError};

// Safety margins above the configured charge levels. The limits protect
// against a runaway setpoint, so they sit just outside the working range.
const VOLTAGE_LIMIT_MARGIN: f64 = 0.5;
const CURRENT_LIMIT_MARGIN: f64 = 10.0;
const POWER_LIMIT_MARGIN: f64 = 100.0;
const STAGE_POWER_MARGIN: f64 = 50.0;
const FLOAT_POWER_MARGIN: f64 = 500.0;

/// Validate the config and spawn a standalone charge worker.
pub fn spawn_charge(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
) -> Result<TaskHandle<ChargeStatus>, ConfigError> {
    cfg.validate()?;
    Ok(spawn_worker(ChargeStatus::default(), move |state, stop_rx| {
        charge_task(supply, cfg, state, stop_rx)
    }))
}

async fn charge_task(
    supply: Arc<dyn PowerSupply>,
    cfg: SessionConfig,
    state: Arc<RwLock<ChargeStatus>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<Outcome, EngineError> {
    info!(
        "charge worker started: bulk {} A / {} V, float {} V for {:?}",
        cfg.bulk_current, cfg.bulk_voltage, cfg.float_voltage, cfg.float_time
    );
    let result = run_charge_half(&*supply, &cfg, &mut stop_rx, |event| {
        if let ChargeHalfEvent::Stage(stage, current) = event {
            let mut s = state.write().unwrap();
            s.stage = stage;
            s.last_current = Some(current);
        }
    })
    .await;
    let outcome = shutdown::finish(&*supply, result).await;
    info!("charge worker finished");
    outcome
}

/// Program the protection limits for a charge session.
pub(crate) async fn charger_initialize(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
) -> Result<(), SupplyError> {
    debug!("initializing charger limits");
    supply.highlight_frontpanel().await?;
    supply
        .set_voltage_limit(cfg.bulk_voltage + VOLTAGE_LIMIT_MARGIN, true)
        .await?;
    supply
        .set_current_limit(cfg.bulk_current + CURRENT_LIMIT_MARGIN, true)
        .await?;
    supply
        .set_power_limit(
            cfg.bulk_voltage * cfg.bulk_current + POWER_LIMIT_MARGIN,
            true,
        )
        .await?;
    sleep(SETTLE_DELAY).await;
    Ok(())
}

/// Program the setpoint block for one charge stage.
pub(crate) async fn apply_stage(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
    stage: ChargeStage,
) -> Result<(), SupplyError> {
    debug!("applying {stage} stage setpoints");
    let (voltage, current, power_margin) = match stage {
        ChargeStage::Bulk => (cfg.bulk_voltage, cfg.bulk_current, STAGE_POWER_MARGIN),
        ChargeStage::Absorption => (
            cfg.absorption_voltage(),
            cfg.absorption_current(),
            STAGE_POWER_MARGIN,
        ),
        ChargeStage::Floating => (cfg.float_voltage, cfg.float_current(), FLOAT_POWER_MARGIN),
    };
    supply.set_voltage(voltage).await?;
    supply.set_current(current).await?;
    supply.set_power(voltage * current + power_margin).await?;
    sleep(SETTLE_DELAY).await;
    Ok(())
}

/// One full charge half: initialize, run Bulk to Floating, hold the float
/// dwell. No safe-state handling here; the caller decides between the full
/// shutdown sequence (standalone worker) and the lighter inter-phase
/// finalize (cycler).
pub(crate) async fn run_charge_half(
    supply: &dyn PowerSupply,
    cfg: &SessionConfig,
    stop_rx: &mut watch::Receiver<bool>,
    mut observe: impl FnMut(ChargeHalfEvent),
) -> Result<HalfOutcome, SupplyError> {
    charger_initialize(supply, cfg).await?;
    apply_stage(supply, cfg, ChargeStage::Bulk).await?;
    output_enable(supply).await?;
    observe(ChargeHalfEvent::Running);

    let mut session = ChargeSession::new(cfg);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                info!("stop requested during {} stage", session.stage());
                return Ok(HalfOutcome::Stopped);
            }
            _ = sleep(cfg.tick_interval) => {}
        }

        let current = supply.measure_current().await?;
        match session.tick(current) {
            ChargeStep::Stay(stage) => {
                debug!("{stage} stage active, current {current} A");
            }
            ChargeStep::EnterAbsorption => {
                info!(
                    "current {current} A below {} A, entering Absorption",
                    cfg.absorption_current()
                );
                apply_stage(supply, cfg, ChargeStage::Absorption).await?;
            }
            ChargeStep::EnterFloating => {
                info!(
                    "current {current} A below {} A, entering Floating",
                    cfg.float_current()
                );
                apply_stage(supply, cfg, ChargeStage::Floating).await?;
                observe(ChargeHalfEvent::Stage(ChargeStage::Floating, current));
                info!("holding float stage for {:?}", cfg.float_time);
                tokio::select! {
                    _ = stop_rx.changed() => {
                        info!("stop requested during float dwell");
                        return Ok(HalfOutcome::Stopped);
                    }
                    _ = sleep(cfg.float_time) => {}
                }
                return Ok(HalfOutcome::Done);
            }
        }
        observe(ChargeHalfEvent::Stage(session.stage(), current));
    }
}
