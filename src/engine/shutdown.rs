//! Safe-state sequence shared by every worker on exit or fault.
//!
//! The order is fixed and must not be rearranged: limits are tightened to
//! zero before the setpoints unwind, and the output is disabled after the
//! setpoints. The closing front-panel highlight is the operator-visible
//! "operation ended" marker.

use log::{error, info, warn};

use crate::engine::types::{EngineError, HalfOutcome, Outcome};
use crate::supply::{PowerSupply, SupplyError};

pub async fn run(supply: &dyn PowerSupply) -> Result<(), SupplyError> {
    info!("driving supply to safe state");
    supply.set_voltage_limit(0.0, true).await?;
    supply.set_current_limit(0.0, true).await?;
    supply.set_negative_current_limit(0.0, true).await?;
    supply.set_power_limit(0.0, true).await?;
    supply.set_negative_power_limit(0.0, true).await?;
    supply.set_voltage(0.0).await?;
    supply.set_current(0.0).await?;
    supply.set_negative_current(0.0).await?;
    supply.set_power(0.0).await?;
    supply.set_negative_power(0.0).await?;
    supply.set_output(false).await?;
    supply.highlight_frontpanel().await?;
    Ok(())
}

/// Close out a session: exactly one safe-state pass on every path, whether
/// the session completed, was stopped, or died on a supply error.
pub(crate) async fn finish(
    supply: &dyn PowerSupply,
    result: Result<HalfOutcome, SupplyError>,
) -> Result<Outcome, EngineError> {
    match result {
        Ok(half) => {
            run(supply).await?;
            Ok(match half {
                HalfOutcome::Done => Outcome::Completed,
                HalfOutcome::Stopped => Outcome::Stopped,
            })
        }
        Err(err) => {
            error!("session aborted: {err}; forcing safe state");
            if let Err(shutdown_err) = run(supply).await {
                warn!("safe-state sequence failed: {shutdown_err}");
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::mock::{Call, MockSupply};

    #[tokio::test]
    async fn test_sequence_order_is_fixed() {
        let supply = MockSupply::new();
        run(&supply).await.unwrap();
        assert_eq!(
            supply.calls(),
            vec![
                Call::SetVoltageLimit(0.0, true),
                Call::SetCurrentLimit(0.0, true),
                Call::SetNegativeCurrentLimit(0.0, true),
                Call::SetPowerLimit(0.0, true),
                Call::SetNegativePowerLimit(0.0, true),
                Call::SetVoltage(0.0),
                Call::SetCurrent(0.0),
                Call::SetNegativeCurrent(0.0),
                Call::SetPower(0.0),
                Call::SetNegativePower(0.0),
                Call::SetOutput(false),
                Call::Highlight,
            ]
        );
    }
}
