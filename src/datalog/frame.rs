//! Column layouts for the measurement log.
//!
//! Every frame starts with a timestamp and the three live readings; the Ah
//! and Wh frames append the matching integrating-instrument columns. Only
//! one of the Ah/Wh frames should log against a given instrument at a time
//! because enabling an integrator resets its totals.

use chrono::Local;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFrame {
    /// Timestamp, voltage, current, power.
    Basic,
    /// Basic columns plus amp-hour totals and instrument time.
    AmpHours,
    /// Basic columns plus watt-hour totals and instrument time.
    WattHours,
}

impl LogFrame {
    pub fn file_prefix(self) -> &'static str {
        match self {
            LogFrame::Basic => "BasicDatalogger",
            LogFrame::AmpHours => "AhDatalogger",
            LogFrame::WattHours => "WhDatalogger",
        }
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            LogFrame::Basic => &["Timestamp", "Voltage", "Current", "Power"],
            LogFrame::AmpHours => &[
                "Timestamp",
                "Voltage",
                "Current",
                "Power",
                "PositiveAh",
                "NegativeAh",
                "AhSeconds",
                "AhHours",
            ],
            LogFrame::WattHours => &[
                "Timestamp",
                "Voltage",
                "Current",
                "Power",
                "PositiveWh",
                "NegativeWh",
                "WhSeconds",
                "WhHours",
            ],
        }
    }

    /// File name for this run, stamped so consecutive runs never collide.
    pub fn file_name(self) -> String {
        format!(
            "{} {}.csv",
            self.file_prefix(),
            Local::now().format("%d_%m_%Y-%H_%M_%S")
        )
    }
}

/// Row timestamp, matching the header's `Timestamp` column.
pub(crate) fn row_timestamp() -> String {
    Local::now().format("%d-%m-%Y %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_matches_frame_width() {
        assert_eq!(LogFrame::Basic.header().len(), 4);
        assert_eq!(LogFrame::AmpHours.header().len(), 8);
        assert_eq!(LogFrame::WattHours.header().len(), 8);
    }

    #[test]
    fn test_file_names_carry_the_prefix() {
        assert!(LogFrame::Basic.file_name().starts_with("BasicDatalogger "));
        assert!(LogFrame::AmpHours.file_name().starts_with("AhDatalogger "));
        assert!(LogFrame::WattHours.file_name().ends_with(".csv"));
    }

    #[test]
    fn test_row_timestamp_shape() {
        let ts = row_timestamp();
        // dd-mm-yyyy hh:mm:ss
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[2..3], "-");
        assert_eq!(&ts[10..11], " ");
    }
}
