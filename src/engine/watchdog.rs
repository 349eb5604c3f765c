/**************** Watchdog supervisor ****************/

// Arms the instrument's hardware dead-man timer and periodically confirms
// it is still counting down. The instrument restarts the timer on every
// command it receives, so the confirmation round trip doubles as the kick;
// if this host hangs, the timer runs out and the instrument latches its
// output off on its own.
//
// A zero reading means the timer already expired: the supply has cut its
// output and wants a manual reset. The supervisor must not re-arm over
// that silently; it flags the fault and stops.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::engine::types::{spawn_worker, EngineError, Outcome, TaskHandle, WatchdogStatus};
use crate::supply::PowerSupply;

/// Spawn the supervisor: arm the timer at `timer_ms`, confirm every
/// `period`. Keep `period` comfortably below the timer value or the timer
/// will expire between confirmations.
pub fn spawn_watchdog(
    supply: Arc<dyn PowerSupply>,
    timer_ms: u32,
    period: Duration,
) -> TaskHandle<WatchdogStatus> {
    let initial = WatchdogStatus {
        timer_ms: timer_ms as f64,
        failed: false,
    };
    spawn_worker(initial, move |state, stop_rx| {
        watchdog_task(supply, timer_ms, period, state, stop_rx)
    })
}

async fn watchdog_task(
    supply: Arc<dyn PowerSupply>,
    timer_ms: u32,
    period: Duration,
    state: Arc<RwLock<WatchdogStatus>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<Outcome, EngineError> {
    info!("arming hardware watchdog at {timer_ms} ms, confirming every {period:?}");
    if let Err(err) = supply.arm_watchdog(timer_ms).await {
        error!("could not arm the hardware watchdog: {err}");
        state.write().unwrap().failed = true;
        return Err(err.into());
    }

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                // The hardware timer stays armed; disabling it is an
                // explicit caller decision, not a side effect of stopping.
                info!("watchdog supervisor stopped");
                return Ok(Outcome::Stopped);
            }
            _ = sleep(period) => {}
        }

        let remaining = match supply.watchdog_state().await {
            Ok(value) => value,
            Err(err) => {
                error!("watchdog confirmation failed: {err}");
                state.write().unwrap().failed = true;
                return Err(err.into());
            }
        };
        if remaining != 0.0 {
            debug!("watchdog still active, {remaining} ms remaining");
            state.write().unwrap().timer_ms = remaining;
        } else {
            error!("hardware watchdog expired; supply output is latched off until manual reset");
            let mut s = state.write().unwrap();
            s.timer_ms = 0.0;
            s.failed = true;
            return Err(EngineError::WatchdogExpired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::mock::{Call, MockSupply};

    #[tokio::test(start_paused = true)]
    async fn test_confirms_until_expiry_then_self_stops() {
        let supply = Arc::new(MockSupply::new());
        supply.script_watchdog(&[500.0, 500.0, 0.0]);

        let mut handle = spawn_watchdog(supply.clone(), 5000, Duration::from_secs(2));
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, EngineError::WatchdogExpired));

        let snapshot = handle.snapshot();
        assert!(snapshot.failed);
        assert_eq!(snapshot.timer_ms, 0.0);

        let calls = supply.calls();
        assert_eq!(calls[0], Call::ArmWatchdog(5000));
        let reads = calls.iter().filter(|c| **c == Call::WatchdogState).count();
        assert_eq!(reads, 3);
        // No silent re-arm over the fault, and no disable either.
        assert_eq!(calls.iter().filter(|c| **c == Call::ArmWatchdog(5000)).count(), 1);
        assert!(!calls.contains(&Call::DisableWatchdog));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_hardware_timer_armed() {
        let supply = Arc::new(MockSupply::new());
        supply.script_watchdog(&[4800.0]);

        let mut handle = spawn_watchdog(supply.clone(), 5000, Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.request_stop();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Stopped);

        let snapshot = handle.snapshot();
        assert!(!snapshot.failed);
        assert_eq!(snapshot.timer_ms, 4800.0);
        assert!(!supply.calls().contains(&Call::DisableWatchdog));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_instrument_is_a_fault() {
        let supply = Arc::new(MockSupply::new());
        supply.script_watchdog(&[500.0]);
        supply.script_watchdog_failure();

        let mut handle = spawn_watchdog(supply.clone(), 5000, Duration::from_secs(2));
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, EngineError::Supply(_)));
        assert!(handle.snapshot().failed);
    }
}
