use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Parameters for one charging, discharging or cycling run.
///
/// Electrical quantities are volts, amps and watts as `f64`. Discharge and
/// cutoff currents are signed: current flowing back into the supply is
/// negative, so a discharge at 400 A is `discharge_current = -400.0` and a
/// cutoff at 120 A is `cutoff_current = -120.0`.
///
/// The absorption and float levels are derived from the bulk settings
/// through the two ratio fields. They are exposed as methods rather than
/// stored, so they can never drift from their source values.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Constant current applied during the bulk stage, in amps.
    pub bulk_current: f64,
    /// Voltage ceiling during the bulk and absorption stages, in volts.
    pub bulk_voltage: f64,
    /// Fraction of `bulk_current` applied during absorption.
    pub absorption_ratio: f64,
    /// Fraction of `bulk_current` applied while floating. Must stay below
    /// `absorption_ratio` or the absorption stage would never hand over.
    pub float_ratio: f64,
    /// Maintenance voltage during the floating stage, in volts.
    pub float_voltage: f64,
    /// How long the floating stage is held before the session ends.
    pub float_time: Duration,
    /// Maximum discharging current, in amps. Negative.
    pub discharge_current: f64,
    /// Minimum voltage the battery may be discharged to, in volts.
    pub discharge_voltage: f64,
    /// Discharge stops once the measured current rises above this value.
    /// Negative, and shallower than `discharge_current`.
    pub cutoff_current: f64,
    /// Poll period of the control loops.
    pub tick_interval: Duration,
    /// Pause after a completed charge half before the next phase starts.
    pub rest_after_charge: Duration,
    /// Pause after a completed discharge half before the next phase starts.
    pub rest_after_discharge: Duration,
    /// Number of full charge+discharge pairs a cycling run performs.
    pub cycle_count: u32,
    /// Whether a cycling run opens with the charge half or the discharge
    /// half. Also decides which half closes a pair for counting purposes.
    pub start_with_charging: bool,
}

impl SessionConfig {
    /// Current setpoint for the absorption stage, in amps.
    pub fn absorption_current(&self) -> f64 {
        self.absorption_ratio * self.bulk_current
    }

    /// Voltage setpoint for the absorption stage, in volts.
    pub fn absorption_voltage(&self) -> f64 {
        self.bulk_voltage
    }

    /// Current setpoint for the floating stage, in amps.
    pub fn float_current(&self) -> f64 {
        self.float_ratio * self.bulk_current
    }

    /// Check every cross-field constraint once, before a worker starts.
    ///
    /// Sign mistakes in the discharge settings are the dangerous ones: a
    /// positive cutoff would stop a discharge immediately, a cutoff deeper
    /// than the discharge current would never stop it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk_current <= 0.0 {
            return Err(ConfigError::NonPositiveBulkCurrent(self.bulk_current));
        }
        if self.bulk_voltage <= 0.0 {
            return Err(ConfigError::NonPositiveBulkVoltage(self.bulk_voltage));
        }
        if !(self.absorption_ratio > 0.0 && self.absorption_ratio <= 1.0) {
            return Err(ConfigError::BadAbsorptionRatio(self.absorption_ratio));
        }
        if !(self.float_ratio > 0.0 && self.float_ratio < self.absorption_ratio) {
            return Err(ConfigError::BadFloatRatio(self.float_ratio));
        }
        if self.float_voltage <= 0.0 {
            return Err(ConfigError::NonPositiveFloatVoltage(self.float_voltage));
        }
        if self.discharge_current >= 0.0 {
            return Err(ConfigError::BadDischargeCurrent(self.discharge_current));
        }
        if self.discharge_voltage <= 0.0 {
            return Err(ConfigError::NonPositiveDischargeVoltage(
                self.discharge_voltage,
            ));
        }
        if self.cutoff_current >= 0.0 || self.cutoff_current <= self.discharge_current {
            return Err(ConfigError::BadCutoffCurrent(self.cutoff_current));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.cycle_count == 0 {
            return Err(ConfigError::ZeroCycleCount);
        }
        Ok(())
    }
}

/// A parameter set that cannot describe a safe run.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("bulk current must be positive, got {0} A")]
    NonPositiveBulkCurrent(f64),
    #[error("bulk voltage must be positive, got {0} V")]
    NonPositiveBulkVoltage(f64),
    #[error("absorption ratio must be within (0, 1], got {0}")]
    BadAbsorptionRatio(f64),
    #[error("float ratio must be positive and below the absorption ratio, got {0}")]
    BadFloatRatio(f64),
    #[error("float voltage must be positive, got {0} V")]
    NonPositiveFloatVoltage(f64),
    #[error("discharge current must be negative, got {0} A")]
    BadDischargeCurrent(f64),
    #[error("discharge voltage must be positive, got {0} V")]
    NonPositiveDischargeVoltage(f64),
    #[error("cutoff current must be negative and above the discharge current, got {0} A")]
    BadCutoffCurrent(f64),
    #[error("tick interval must be non-zero")]
    ZeroTickInterval,
    #[error("cycle count must be at least 1")]
    ZeroCycleCount,
}

/// Stage of one charge session. Transitions run strictly forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeStage {
    Bulk,
    Absorption,
    Floating,
}

impl fmt::Display for ChargeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChargeStage::Bulk => "Bulk",
            ChargeStage::Absorption => "Absorption",
            ChargeStage::Floating => "Floating",
        };
        f.write_str(name)
    }
}

/// Phase of a cycling run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    ChargeInit,
    Charging,
    DischargeInit,
    Discharging,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "Idle",
            CyclePhase::ChargeInit => "ChargeInit",
            CyclePhase::Charging => "Charging",
            CyclePhase::DischargeInit => "DischargeInit",
            CyclePhase::Discharging => "Discharging",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A config that passes validation, for tests to perturb.
    fn base_config() -> SessionConfig {
        SessionConfig {
            bulk_current: 100.0,
            bulk_voltage: 14.4,
            absorption_ratio: 0.8,
            float_ratio: 0.02,
            float_voltage: 13.5,
            float_time: Duration::from_secs(600),
            discharge_current: -400.0,
            discharge_voltage: 11.5,
            cutoff_current: -120.0,
            tick_interval: Duration::from_secs(10),
            rest_after_charge: Duration::from_secs(30),
            rest_after_discharge: Duration::from_secs(30),
            cycle_count: 3,
            start_with_charging: true,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(base_config().validate(), Ok(()));
    }

    #[test]
    fn test_derived_currents_track_bulk() {
        let cfg = base_config();
        assert_eq!(cfg.absorption_current(), 80.0);
        assert_eq!(cfg.float_current(), 2.0);
        assert_eq!(cfg.absorption_voltage(), cfg.bulk_voltage);

        let mut wider = cfg;
        wider.bulk_current = 50.0;
        assert_eq!(wider.absorption_current(), 40.0);
        assert_eq!(wider.float_current(), 1.0);
    }

    #[test]
    fn test_derived_invariants_hold() {
        let cfg = base_config();
        assert!(cfg.absorption_current() <= cfg.bulk_current);
        assert!(cfg.float_current() < cfg.absorption_current());
    }

    #[test]
    fn test_rejects_non_positive_bulk_current() {
        let mut cfg = base_config();
        cfg.bulk_current = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositiveBulkCurrent(0.0))
        );
    }

    #[test]
    fn test_rejects_float_ratio_at_or_above_absorption() {
        let mut cfg = base_config();
        cfg.float_ratio = 0.8;
        assert_eq!(cfg.validate(), Err(ConfigError::BadFloatRatio(0.8)));
    }

    #[test]
    fn test_rejects_positive_discharge_current() {
        let mut cfg = base_config();
        cfg.discharge_current = 400.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::BadDischargeCurrent(400.0))
        );
    }

    #[test]
    fn test_rejects_positive_cutoff() {
        let mut cfg = base_config();
        cfg.cutoff_current = 2.0;
        assert_eq!(cfg.validate(), Err(ConfigError::BadCutoffCurrent(2.0)));
    }

    #[test]
    fn test_rejects_cutoff_deeper_than_discharge_current() {
        let mut cfg = base_config();
        cfg.cutoff_current = -500.0;
        assert_eq!(cfg.validate(), Err(ConfigError::BadCutoffCurrent(-500.0)));
    }

    #[test]
    fn test_rejects_zero_tick() {
        let mut cfg = base_config();
        cfg.tick_interval = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTickInterval));
    }

    #[test]
    fn test_rejects_zero_cycle_count() {
        let mut cfg = base_config();
        cfg.cycle_count = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCycleCount));
    }
}
