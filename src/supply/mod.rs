pub mod link;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod sm15k;

pub use link::{TcpLink, Transport};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockSupply;
pub use sm15k::Sm15k;

use async_trait::async_trait;
use thiserror::Error;

/// A facade call either produced a value or failed in one of these ways.
/// Control loops treat all three variants the same: log, drive the supply
/// to a safe state, terminate.
#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("i/o failure talking to the supply: {0}")]
    Io(#[from] std::io::Error),
    #[error("supply did not answer {command:?} within the timeout")]
    Timeout { command: String },
    #[error("unparseable reply {response:?} to {command:?}")]
    Parse { command: String, response: String },
}

/// Switch setting for the integrating Ah/Wh measurement instruments.
/// Turning one on resets its previous totals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentSwitch {
    On,
    Off,
}

impl InstrumentSwitch {
    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentSwitch::On => "ON",
            InstrumentSwitch::Off => "OFF",
        }
    }
}

/// One sample of the supply's output, read fresh each tick and never
/// persisted by the control loops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

/// Read voltage, current and power in one go. Three round trips; the
/// protocol has no combined query.
pub async fn sample(supply: &dyn PowerSupply) -> Result<Measurement, SupplyError> {
    Ok(Measurement {
        voltage: supply.measure_voltage().await?,
        current: supply.measure_current().await?,
        power: supply.measure_power().await?,
    })
}

/// Typed command surface of the supply, as consumed by the workers.
///
/// "measure" reads the live output, "set" writes a setpoint or limit.
/// Implementations are expected to be safe to share across tasks; the
/// shipped client serializes round trips internally.
#[async_trait]
pub trait PowerSupply: Send + Sync {
    // Live output readings.
    async fn measure_voltage(&self) -> Result<f64, SupplyError>;
    async fn measure_current(&self) -> Result<f64, SupplyError>;
    async fn measure_power(&self) -> Result<f64, SupplyError>;

    // Setpoints. Negative current/power are the sink-direction settings of
    // this bidirectional supply and take negative values.
    async fn set_voltage(&self, volts: f64) -> Result<(), SupplyError>;
    async fn set_current(&self, amps: f64) -> Result<(), SupplyError>;
    async fn set_negative_current(&self, amps: f64) -> Result<(), SupplyError>;
    async fn set_power(&self, watts: f64) -> Result<(), SupplyError>;
    async fn set_negative_power(&self, watts: f64) -> Result<(), SupplyError>;

    // Adjustable hard limits with an enable flag.
    async fn set_voltage_limit(&self, volts: f64, enabled: bool) -> Result<(), SupplyError>;
    async fn set_current_limit(&self, amps: f64, enabled: bool) -> Result<(), SupplyError>;
    async fn set_negative_current_limit(&self, amps: f64, enabled: bool)
        -> Result<(), SupplyError>;
    async fn set_power_limit(&self, watts: f64, enabled: bool) -> Result<(), SupplyError>;
    async fn set_negative_power_limit(&self, watts: f64, enabled: bool)
        -> Result<(), SupplyError>;

    async fn set_output(&self, on: bool) -> Result<(), SupplyError>;

    // Hardware dead-man's switch. Any command round trip restarts the
    // armed timer; `watchdog_state` returns the remaining milliseconds,
    // zero once it has expired.
    async fn arm_watchdog(&self, millis: u32) -> Result<(), SupplyError>;
    async fn watchdog_state(&self) -> Result<f64, SupplyError>;
    async fn disable_watchdog(&self) -> Result<(), SupplyError>;

    /// Blink the front panel display, the operator-visible end marker.
    async fn highlight_frontpanel(&self) -> Result<(), SupplyError>;

    async fn identification(&self) -> Result<String, SupplyError>;
    /// Pop one entry from the error queue; "0,None" when empty.
    async fn next_error(&self) -> Result<String, SupplyError>;
    /// Pop one entry from the warning queue; "0,None" when empty.
    async fn next_warning(&self) -> Result<String, SupplyError>;

    // Integrating amp-hour instrument, used by the Ah datalogger frame.
    async fn set_ah_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError>;
    async fn ah_positive_total(&self) -> Result<f64, SupplyError>;
    async fn ah_negative_total(&self) -> Result<f64, SupplyError>;
    async fn ah_time_seconds(&self) -> Result<f64, SupplyError>;
    async fn ah_time_hours(&self) -> Result<f64, SupplyError>;

    // Integrating watt-hour instrument, used by the Wh datalogger frame.
    async fn set_wh_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError>;
    async fn wh_positive_total(&self) -> Result<f64, SupplyError>;
    async fn wh_negative_total(&self) -> Result<f64, SupplyError>;
    async fn wh_time_seconds(&self) -> Result<f64, SupplyError>;
    async fn wh_time_hours(&self) -> Result<f64, SupplyError>;
}
