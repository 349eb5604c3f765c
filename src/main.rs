/**************** Program Entry Point ****************/

// Wires the TCP link and typed client, then spawns the background workers:
// the watchdog supervisor, the datalogger and the selected regimen. Each
// worker runs on its own tick; ctrl-c asks the regimen to stop, which
// still drives the supply to a safe state before the process exits.
//
// Usage: deltacycle [host] [charge|discharge|cycle]

mod config;
mod datalog;
mod engine;
mod session;
mod supply;

use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::config::{
    default_session, DATALOG_PERIOD, LINK_TIMEOUT, SUPPLY_HOST, SUPPLY_PORT, WATCHDOG_PERIOD,
    WATCHDOG_TIMER_MS,
};
use crate::datalog::{spawn_datalog, LogFrame};
use crate::engine::{
    spawn_charge, spawn_cycle, spawn_discharge, spawn_watchdog, EngineError, Outcome, TaskHandle,
};
use crate::supply::{PowerSupply, Sm15k, TcpLink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| SUPPLY_HOST.to_string());
    let regimen = args.next().unwrap_or_else(|| "cycle".to_string());

    let link = TcpLink::new(host.clone(), SUPPLY_PORT, LINK_TIMEOUT);
    let supply: Arc<dyn PowerSupply> = Arc::new(Sm15k::new(link));

    let idn = supply.identification().await?;
    info!("connected to {host}: {idn}");

    let cfg = default_session();
    let mut watchdog = spawn_watchdog(Arc::clone(&supply), WATCHDOG_TIMER_MS, WATCHDOG_PERIOD);
    let mut datalogger = spawn_datalog(
        Arc::clone(&supply),
        LogFrame::Basic,
        DATALOG_PERIOD,
        Path::new("."),
    )?;
    info!("datalog: {}", datalogger.snapshot().file.display());

    let result = match regimen.as_str() {
        "charge" => run_regimen(spawn_charge(Arc::clone(&supply), cfg)?).await,
        "discharge" => run_regimen(spawn_discharge(Arc::clone(&supply), cfg)?).await,
        "cycle" => run_regimen(spawn_cycle(Arc::clone(&supply), cfg)?).await,
        other => {
            eprintln!("usage: deltacycle [host] [charge|discharge|cycle]");
            return Err(format!("unknown regimen {other:?}").into());
        }
    };
    match &result {
        Ok(Outcome::Completed) => info!("{regimen} regimen completed"),
        Ok(Outcome::Stopped) => info!("{regimen} regimen stopped"),
        Err(err) => error!("{regimen} regimen failed: {err}"),
    }

    datalogger.request_stop();
    watchdog.request_stop();
    if let Err(err) = datalogger.join().await {
        warn!("datalogger: {err}");
    }
    if let Err(err) = watchdog.join().await {
        warn!("watchdog supervisor: {err}");
    }
    // Leaving the bench: release the hardware timer. While workers run it
    // stays armed so a hung host still trips the instrument's own cutoff.
    if let Err(err) = supply.disable_watchdog().await {
        warn!("could not disable the hardware watchdog: {err}");
    }

    drain_queues(&*supply).await;
    result?;
    Ok(())
}

/// Drive one regimen worker to its end, stopping it early on ctrl-c.
async fn run_regimen<S: Clone>(mut handle: TaskHandle<S>) -> Result<Outcome, EngineError> {
    tokio::select! {
        outcome = handle.join() => return outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, stopping the run");
        }
    }
    handle.request_stop();
    handle.join().await
}

/// Surface whatever the instrument queued up during the run.
async fn drain_queues(supply: &dyn PowerSupply) {
    match supply.next_error().await {
        Ok(entry) if entry != "0,None" => warn!("instrument error queue: {entry}"),
        Ok(_) => {}
        Err(err) => warn!("could not read the error queue: {err}"),
    }
    match supply.next_warning().await {
        Ok(entry) if entry != "0,None" => warn!("instrument warning queue: {entry}"),
        Ok(_) => {}
        Err(err) => warn!("could not read the warning queue: {err}"),
    }
}
