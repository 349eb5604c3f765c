//! Typed client for the SM15K command set.
//!
//! Each method formats one command line from the instrument manual and, for
//! queries, parses the single-line reply. The client is generic over the
//! [`Transport`] so tests can swap the TCP link for a recording fake.
//!
//! Command casing follows the manual's short forms (`SOURce:VOLtage`);
//! the instrument accepts either casing but replies are easier to trace
//! against the manual this way.

use async_trait::async_trait;

use crate::supply::link::Transport;
use crate::supply::{InstrumentSwitch, PowerSupply, SupplyError};

pub struct Sm15k<T> {
    transport: T,
}

impl<T: Transport> Sm15k<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn query_f64(&self, command: &str) -> Result<f64, SupplyError> {
        let response = self.transport.query(command).await?;
        response
            .trim()
            .parse()
            .map_err(|_| SupplyError::Parse {
                command: command.trim_end().to_string(),
                response,
            })
    }

    fn on_off(enabled: bool) -> &'static str {
        if enabled { "ON" } else { "OFF" }
    }

    async fn set_limit(
        &self,
        command_stem: &str,
        value: f64,
        enabled: bool,
    ) -> Result<(), SupplyError> {
        let command = format!("{command_stem} {value},{}\n", Self::on_off(enabled));
        self.transport.send(&command).await
    }
}

#[async_trait]
impl<T: Transport> PowerSupply for Sm15k<T> {
    async fn measure_voltage(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:VOLtage?\n").await
    }

    async fn measure_current(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:CURrent?\n").await
    }

    async fn measure_power(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:POWer?\n").await
    }

    async fn set_voltage(&self, volts: f64) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SOURce:VOLtage {volts}\n"))
            .await
    }

    async fn set_current(&self, amps: f64) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SOURce:CURrent {amps}\n"))
            .await
    }

    async fn set_negative_current(&self, amps: f64) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SOURce:CURrent:NEGative {amps}\n"))
            .await
    }

    async fn set_power(&self, watts: f64) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SOURce:POWer {watts}\n"))
            .await
    }

    async fn set_negative_power(&self, watts: f64) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SOURce:POWer:NEGative {watts}\n"))
            .await
    }

    async fn set_voltage_limit(&self, volts: f64, enabled: bool) -> Result<(), SupplyError> {
        self.set_limit("SYSTem:LIMits:VOLtage", volts, enabled).await
    }

    async fn set_current_limit(&self, amps: f64, enabled: bool) -> Result<(), SupplyError> {
        self.set_limit("SYSTem:LIMits:CURrent", amps, enabled).await
    }

    async fn set_negative_current_limit(
        &self,
        amps: f64,
        enabled: bool,
    ) -> Result<(), SupplyError> {
        self.set_limit("SYSTem:LIMits:CURrent:NEGative", amps, enabled)
            .await
    }

    async fn set_power_limit(&self, watts: f64, enabled: bool) -> Result<(), SupplyError> {
        self.set_limit("SYSTem:LIMits:POWer", watts, enabled).await
    }

    async fn set_negative_power_limit(
        &self,
        watts: f64,
        enabled: bool,
    ) -> Result<(), SupplyError> {
        self.set_limit("SYSTem:LIMits:POWer:NEGative", watts, enabled)
            .await
    }

    async fn set_output(&self, on: bool) -> Result<(), SupplyError> {
        let flag = if on { 1 } else { 0 };
        self.transport.send(&format!("OUTPut {flag}\n")).await
    }

    async fn arm_watchdog(&self, millis: u32) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("SYSTem:COMmunicate:WATchdog SET,{millis}\n"))
            .await
    }

    async fn watchdog_state(&self) -> Result<f64, SupplyError> {
        self.query_f64("SYSTem:COMmunicate:WATchdog?\n").await
    }

    async fn disable_watchdog(&self) -> Result<(), SupplyError> {
        self.transport
            .send("SYSTem:COMmunicate:WATchdog STOP\n")
            .await
    }

    async fn highlight_frontpanel(&self) -> Result<(), SupplyError> {
        self.transport.send("SYSTem:FROntpanel:HIGhlight\n").await
    }

    async fn identification(&self) -> Result<String, SupplyError> {
        self.transport.query("*IDN?\n").await
    }

    async fn next_error(&self) -> Result<String, SupplyError> {
        self.transport.query("SYSTem:ERRor?\n").await
    }

    async fn next_warning(&self) -> Result<String, SupplyError> {
        self.transport.query("SYSTem:WARning?\n").await
    }

    async fn set_ah_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("MEASure:INStrument AH,STATE,{}\n", setting.as_str()))
            .await
    }

    async fn ah_positive_total(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument AH,POS,TOTAL?\n").await
    }

    async fn ah_negative_total(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument AH,NEG,TOTAL?\n").await
    }

    async fn ah_time_seconds(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument AH,TIMESEC?\n").await
    }

    async fn ah_time_hours(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument AH,TIMEHR?\n").await
    }

    async fn set_wh_instrument(&self, setting: InstrumentSwitch) -> Result<(), SupplyError> {
        self.transport
            .send(&format!("MEASure:INStrument WH,STATE,{}\n", setting.as_str()))
            .await
    }

    async fn wh_positive_total(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument WH,POS,TOTAL?\n").await
    }

    async fn wh_negative_total(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument WH,NEG,TOTAL?\n").await
    }

    async fn wh_time_seconds(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument WH,TIMESEC?\n").await
    }

    async fn wh_time_hours(&self) -> Result<f64, SupplyError> {
        self.query_f64("MEASure:INStrument WH,TIMEHR?\n").await
    }
}
