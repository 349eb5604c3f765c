//! In-memory supply for control-loop tests.
//!
//! Measured current and watchdog reads are scripted per test; every facade
//! call is appended to an ordered log so tests can assert not only what the
//! workers decided but the exact command sequence they issued.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::supply::{InstrumentSwitch, PowerSupply, SupplyError};

/// One recorded facade call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    MeasureVoltage,
    MeasureCurrent,
    MeasurePower,
    SetVoltage(f64),
    SetCurrent(f64),
    SetNegativeCurrent(f64),
    SetPower(f64),
    SetNegativePower(f64),
    SetVoltageLimit(f64, bool),
    SetCurrentLimit(f64, bool),
    SetNegativeCurrentLimit(f64, bool),
    SetPowerLimit(f64, bool),
    SetNegativePowerLimit(f64, bool),
    SetOutput(bool),
    ArmWatchdog(u32),
    WatchdogState,
    DisableWatchdog,
    Highlight,
    Identification,
    NextError,
    NextWarning,
    SetAhInstrument(InstrumentSwitch),
    AhPositiveTotal,
    AhNegativeTotal,
    AhTimeSeconds,
    AhTimeHours,
    SetWhInstrument(InstrumentSwitch),
    WhPositiveTotal,
    WhNegativeTotal,
    WhTimeSeconds,
    WhTimeHours,
}

enum ScriptedRead {
    Value(f64),
    Fail,
}

pub struct MockSupply {
    calls: Mutex<Vec<Call>>,
    currents: Mutex<VecDeque<ScriptedRead>>,
    last_current: Mutex<f64>,
    watchdog_reads: Mutex<VecDeque<ScriptedRead>>,
    last_watchdog: Mutex<f64>,
    voltage: f64,
}

impl MockSupply {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            currents: Mutex::new(VecDeque::new()),
            last_current: Mutex::new(0.0),
            watchdog_reads: Mutex::new(VecDeque::new()),
            last_watchdog: Mutex::new(10_000.0),
            voltage: 13.8,
        }
    }

    /// Queue current readings; once drained the last value repeats.
    pub fn script_currents(&self, values: &[f64]) {
        let mut currents = self.currents.lock().unwrap();
        currents.extend(values.iter().map(|v| ScriptedRead::Value(*v)));
    }

    /// Queue one failing current read (surfaces as a timeout).
    pub fn script_current_failure(&self) {
        self.currents.lock().unwrap().push_back(ScriptedRead::Fail);
    }

    /// Queue watchdog countdown readings; once drained the last repeats.
    pub fn script_watchdog(&self, values: &[f64]) {
        let mut reads = self.watchdog_reads.lock().unwrap();
        reads.extend(values.iter().map(|v| ScriptedRead::Value(*v)));
    }

    /// Queue one failing watchdog read (surfaces as a timeout).
    pub fn script_watchdog_failure(&self) {
        self.watchdog_reads
            .lock()
            .unwrap()
            .push_back(ScriptedRead::Fail);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PowerSupply for MockSupply {
    async fn measure_voltage(&self) -> Result<f64, SupplyError> {
        self.record(Call::MeasureVoltage);
        Ok(self.voltage)
    }

    async fn measure_current(&self) -> Result<f64, SupplyError> {
        self.record(Call::MeasureCurrent);
        match self.currents.lock().unwrap().pop_front() {
            Some(ScriptedRead::Value(v)) => {
                *self.last_current.lock().unwrap() = v;
                Ok(v)
            }
            Some(ScriptedRead::Fail) => Err(SupplyError::Timeout {
                command: "MEASure:CURrent?".to_string(),
            }),
            None => Ok(*self.last_current.lock().unwrap()),
        }
    }

    async fn measure_power(&self) -> Result<f64, SupplyError> {
        self.record(Call::MeasurePower);
        Ok(self.voltage * *self.last_current.lock().unwrap())
    }

    async fn set_voltage(&self, volts: f64) -> Result<(), SupplyError> {
        self.record(Call::SetVoltage(volts));
        Ok(())
    }

    async fn set_current(&self, amps: f64) -> Result<(), SupplyError> {
        self.record(Call::SetCurrent(amps));
        Ok(())
    }

    async fn set_negative_current(&self, amps: f64) -> Result<(), SupplyError> {
        self.record(Call::SetNegativeCurrent(amps));
        Ok(())
    }

    async fn set_power(&self, watts: f64) -> Result<(), SupplyError> {
        self.record(Call::SetPower(watts));
        Ok(())
    }

    async fn set_negative_power(&self, watts: f64) -> Result<(), SupplyError> {
        self.record(Call::SetNegativePower(watts));
        Ok(())
    }

    async fn set_voltage_limit(&self, volts: f64, enabled: bool) -> Result<(), SupplyError> {
        self.record(Call::SetVoltageLimit(volts, enabled));
        Ok(())
    }

    async fn set_current_limit(&self, amps: f64, enabled: bool) -> Result<(), SupplyError> {
        self.record(Call::SetCurrentLimit(amps, enabled));
        Ok(())
    }

    async fn set_negative_current_limit(
        &self,
        amps: f64,
        enabled: bool,
    ) -> Result<(), SupplyError> {
        self.record(Call::SetNegativeCurrentLimit(amps, enabled));
        Ok(())
    }

    async fn set_power_limit(&self, watts: f64, enabled: bool) -> Result<(), SupplyError> {
        self.record(Call::SetPowerLimit(watts, enabled));
        Ok(())
    }

    async fn set_negative_power_limit(
        &self,
        watts: f64,
        enabled: bool,
    ) -> Result<(), SupplyError> {
        self.record(Call::SetNegativePowerLimit(watts, enabled));
        Ok(())
    }

    async fn set_output(&self, on: bool) -> Result<(), SupplyError> {
        self.record(Call::SetOutput(on));
        Ok(())
    }

    async fn arm_watchdog(&self, millis: u32) -> Result<(), SupplyError> {
        self.record(Call::ArmWatchdog(millis));
        Ok(())
    }

    async fn watchdog_state(&self) -> Result<f64, SupplyError> {
        self.record(Call::WatchdogState);
        match self.watchdog_reads.lock().unwrap().pop_front() {
            Some(ScriptedRead::Value(v)) => {
                *self.last_watchdog.lock().unwrap() = v;
                Ok(v)
            }
            Some(ScriptedRead::Fail) => Err(SupplyError::Timeout {
                command: "SYSTem:COMmunicate:WATchdog?".to_string(),
            }),
            None => Ok(*self.last_watchdog.lock().unwrap()),
        }
    }

    async fn disable_watchdog(&self) -> Result<(), SupplyError> {
        self.record(Call::DisableWatchdog);
        Ok(())
    }

    async fn highlight_frontpanel(&self) -> Result<(), SupplyError> {
        self.record(Call::Highlight);
        Ok(())
    }

    async fn identification(&self) -> Result<String, SupplyError> {
        self.record(Call::Identification);
        Ok("DELTA,MOCK SM15K,000000,1.0".to_string())
    }

    async fn next_error(&self) -> Result<String, SupplyError> {
        self.record(Call::NextError);
        Ok("0,None".to_string())
    }

    async fn next_warning(&self) -> Result<String, SupplyError> {
        self.record(Call::NextWarning);
        Ok("0,None".to_string())
    }

    async fn set_ah_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError> {
        self.record(Call::SetAhInstrument(setting));
        Ok(())
    }

    async fn ah_positive_total(&self) -> Result<f64, SupplyError> {
        self.record(Call::AhPositiveTotal);
        Ok(0.0)
    }

    async fn ah_negative_total(&self) -> Result<f64, SupplyError> {
        self.record(Call::AhNegativeTotal);
        Ok(0.0)
    }

    async fn ah_time_seconds(&self) -> Result<f64, SupplyError> {
        self.record(Call::AhTimeSeconds);
        Ok(0.0)
    }

    async fn ah_time_hours(&self) -> Result<f64, SupplyError> {
        self.record(Call::AhTimeHours);
        Ok(0.0)
    }

    async fn set_wh_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError> {
        self.record(Call::SetWhInstrument(setting));
        Ok(())
    }

    async fn wh_positive_total(&self) -> Result<f64, SupplyError> {
        self.record(Call::WhPositiveTotal);
        Ok(0.0)
    }

    async fn wh_negative_total(&self) -> Result<f64, SupplyError> {
        self.record(Call::WhNegativeTotal);
        Ok(0.0)
    }

    async fn wh_time_seconds(&self) -> Result<f64, SupplyError> {
        self.record(Call::WhTimeSeconds);
        Ok(0.0)
    }

    async fn wh_time_hours(&self) -> Result<f64, SupplyError> {
        self.record(Call::WhTimeHours);
        Ok(0.0)
    }
}
