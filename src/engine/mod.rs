pub mod charge;
pub mod cycle;
pub mod discharge;
pub mod shutdown;
pub mod types;
pub mod watchdog;

pub use charge::spawn_charge;
pub use cycle::spawn_cycle;
pub use discharge::spawn_discharge;
pub use types::{
    ChargeStatus, CycleStatus, DischargeStatus, EngineError, Outcome, TaskHandle, WatchdogStatus,
};
pub use watchdog::spawn_watchdog;

use std::time::Duration;

use crate::supply::{PowerSupply, SupplyError};

/// Pause after programming a block of limits or setpoints, giving the
/// supply time to apply them before the next block arrives.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_secs(1);

pub(crate) async fn output_enable(supply: &dyn PowerSupply) -> Result<(), SupplyError> {
    log::debug!("enabling output");
    supply.set_output(true).await?;
    tokio::time::sleep(SETTLE_DELAY).await;
    Ok(())
}
