/**************** Datalogger worker ****************/

// Samples the supply on its own tick and appends one CSV row per sample.
// A sibling consumer of the facade: it observes the same instrument the
// control workers drive, but never issues setpoints, so a failed sample
// is logged and skipped rather than escalated into a safe-state action.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::datalog::frame::{row_timestamp, LogFrame};
use crate::engine::types::{spawn_worker, EngineError, Outcome, TaskHandle};
use crate::supply::{sample, InstrumentSwitch, PowerSupply, SupplyError};

#[derive(Clone, Debug)]
pub struct DatalogStatus {
    /// Where this run's rows are going.
    pub file: PathBuf,
    pub samples: u64,
    pub last_error: Option<String>,
}

/// Create the log file in `dir`, write the header, and spawn the sampling
/// worker.
pub fn spawn_datalog(
    supply: Arc<dyn PowerSupply>,
    logging_frame: LogFrame,
    period: Duration,
    dir: &Path,
) -> Result<TaskHandle<DatalogStatus>, csv::Error> {
    let path = dir.join(logging_frame.file_name());
    let file = std::fs::File::create(&path)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(logging_frame.header())?;
    writer.flush()?;

    let initial = DatalogStatus {
        file: path,
        samples: 0,
        last_error: None,
    };
    Ok(spawn_worker(initial, move |state, stop_rx| {
        datalog_task(supply, logging_frame, period, writer, state, stop_rx)
    }))
}

async fn datalog_task(
    supply: Arc<dyn PowerSupply>,
    logging_frame: LogFrame,
    period: Duration,
    mut writer: csv::Writer<std::fs::File>,
    state: Arc<RwLock<DatalogStatus>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<Outcome, EngineError> {
    info!("datalogger started, one {logging_frame:?} row every {period:?}");
    match logging_frame {
        LogFrame::Basic => {}
        LogFrame::AmpHours => supply.set_ah_instrument(InstrumentSwitch::On).await?,
        LogFrame::WattHours => supply.set_wh_instrument(InstrumentSwitch::On).await?,
    }

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = sleep(period) => {}
        }

        match sample_row(&*supply, logging_frame).await {
            Ok(row) => {
                debug!("logged {row:?}");
                let appended = writer
                    .write_record(&row)
                    .and_then(|()| writer.flush().map_err(csv::Error::from));
                match appended {
                    Ok(()) => {
                        let mut s = state.write().unwrap();
                        s.samples += 1;
                        s.last_error = None;
                    }
                    Err(err) => {
                        warn!("could not append to the datalog: {err}");
                        state.write().unwrap().last_error = Some(err.to_string());
                    }
                }
            }
            Err(err) => {
                warn!("sample failed, row skipped: {err}");
                state.write().unwrap().last_error = Some(err.to_string());
            }
        }
    }

    // Leave the integrator off so a later run starts from fresh totals.
    let switch_off = match logging_frame {
        LogFrame::Basic => Ok(()),
        LogFrame::AmpHours => supply.set_ah_instrument(InstrumentSwitch::Off).await,
        LogFrame::WattHours => supply.set_wh_instrument(InstrumentSwitch::Off).await,
    };
    if let Err(err) = switch_off {
        warn!("could not switch the integrating instrument off: {err}");
    }
    info!("datalogger stopped");
    Ok(Outcome::Stopped)
}

async fn sample_row(
    supply: &dyn PowerSupply,
    logging_frame: LogFrame,
) -> Result<Vec<String>, SupplyError> {
    let m = sample(supply).await?;
    let mut row = vec![
        row_timestamp(),
        m.voltage.to_string(),
        m.current.to_string(),
        m.power.to_string(),
    ];
    match logging_frame {
        LogFrame::Basic => {}
        LogFrame::AmpHours => {
            row.push(supply.ah_positive_total().await?.to_string());
            row.push(supply.ah_negative_total().await?.to_string());
            row.push(supply.ah_time_seconds().await?.to_string());
            row.push(supply.ah_time_hours().await?.to_string());
        }
        LogFrame::WattHours => {
            row.push(supply.wh_positive_total().await?.to_string());
            row.push(supply.wh_negative_total().await?.to_string());
            row.push(supply.wh_time_seconds().await?.to_string());
            row.push(supply.wh_time_hours().await?.to_string());
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::mock::{Call, MockSupply};

    /// Tests run in parallel and file names are second-granular, so each
    /// test logs into its own directory.
    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("deltacycle-datalog-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_frame_appends_one_row_per_tick() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&[42.0]);

        let mut handle = spawn_datalog(
            supply.clone(),
            LogFrame::Basic,
            Duration::from_secs(5),
            &test_dir("basic"),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.request_stop();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Stopped);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.samples, 2);
        assert_eq!(snapshot.last_error, None);

        let contents = std::fs::read_to_string(&snapshot.file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Timestamp,Voltage,Current,Power");
        assert!(lines[1].contains("42"));
        std::fs::remove_file(&snapshot.file).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ah_frame_drives_the_integrating_instrument() {
        let supply = Arc::new(MockSupply::new());
        supply.script_currents(&[10.0]);

        let mut handle = spawn_datalog(
            supply.clone(),
            LogFrame::AmpHours,
            Duration::from_secs(5),
            &test_dir("ah"),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.request_stop();
        handle.join().await.unwrap();

        let calls = supply.calls();
        assert_eq!(calls[0], Call::SetAhInstrument(InstrumentSwitch::On));
        assert!(calls.contains(&Call::AhPositiveTotal));
        assert_eq!(
            calls.last(),
            Some(&Call::SetAhInstrument(InstrumentSwitch::Off))
        );

        let snapshot = handle.snapshot();
        let contents = std::fs::read_to_string(&snapshot.file).unwrap();
        assert!(contents.starts_with(
            "Timestamp,Voltage,Current,Power,PositiveAh,NegativeAh,AhSeconds,AhHours"
        ));
        std::fs::remove_file(&snapshot.file).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sample_is_skipped_not_fatal() {
        let supply = Arc::new(MockSupply::new());
        supply.script_current_failure();
        supply.script_currents(&[5.0]);

        let mut handle = spawn_datalog(
            supply.clone(),
            LogFrame::Basic,
            Duration::from_secs(5),
            &test_dir("skip"),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.request_stop();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Stopped);

        // First tick failed and was skipped, second succeeded.
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.samples, 1);
        std::fs::remove_file(&snapshot.file).ok();
    }
}
