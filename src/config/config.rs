/**************** Configuration ****************/

// Deployment constants and the default session parameters the binary runs
// with. Adjust for your bench and battery before a real run; everything a
// control loop needs at runtime travels inside SessionConfig.

use std::time::Duration;

use crate::session::SessionConfig;

pub const SUPPLY_HOST: &str = "192.168.1.100";
/// Fixed command port of the instrument's ethernet interface.
pub const SUPPLY_PORT: u16 = 8462;
pub const LINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Hardware dead-man timer value. The instrument accepts 20..=10000 ms.
pub const WATCHDOG_TIMER_MS: u32 = 5000;
/// Confirmation period; must stay well below the timer value.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(2);

pub const DATALOG_PERIOD: Duration = Duration::from_secs(5);

/// Session parameters for a 12 V lead-acid bank on a 15 kW supply.
pub fn default_session() -> SessionConfig {
    SessionConfig {
        bulk_current: 100.0,
        bulk_voltage: 14.4,
        absorption_ratio: 0.8,
        float_ratio: 0.02,
        float_voltage: 13.5,
        float_time: Duration::from_secs(30 * 60),
        discharge_current: -400.0,
        discharge_voltage: 11.5,
        cutoff_current: -120.0,
        tick_interval: Duration::from_secs(10),
        rest_after_charge: Duration::from_secs(5 * 60),
        rest_after_discharge: Duration::from_secs(5 * 60),
        cycle_count: 3,
        start_with_charging: true,
    }
}
