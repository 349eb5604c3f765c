//! Worker plumbing shared by every background task: the handle callers use
//! to stop and join a worker, the typed outcome, and the per-worker state
//! snapshots published through `Arc<RwLock>` (written only by the owning
//! task, cloned out by anyone else).

use std::future::Future;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::session::{ChargeStage, CyclePhase};
use crate::supply::SupplyError;

/// How a worker ended, when it ended without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The worker reached its own terminal condition.
    Completed,
    /// The worker honored an external stop request.
    Stopped,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Supply(#[from] SupplyError),
    #[error("hardware watchdog timer expired")]
    WatchdogExpired,
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of one charge or discharge half, before any safe-state handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HalfOutcome {
    Done,
    Stopped,
}

/// Progress callbacks emitted by the charge half driver.
pub(crate) enum ChargeHalfEvent {
    /// Limits and bulk setpoints applied, output enabled.
    Running,
    /// One poll completed; the given stage is active.
    Stage(ChargeStage, f64),
}

/// Progress callbacks emitted by the discharge half driver.
pub(crate) enum DischargeHalfEvent {
    Running,
    Tick(f64),
}

#[derive(Clone, Debug)]
pub struct ChargeStatus {
    pub stage: ChargeStage,
    pub last_current: Option<f64>,
}

impl Default for ChargeStatus {
    fn default() -> Self {
        Self {
            stage: ChargeStage::Bulk,
            last_current: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DischargeStatus {
    pub cutoff_reached: bool,
    pub last_current: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct CycleStatus {
    pub phase: CyclePhase,
    pub completed_cycles: u32,
}

impl Default for CycleStatus {
    fn default() -> Self {
        Self {
            phase: CyclePhase::Idle,
            completed_cycles: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WatchdogStatus {
    /// Last confirmed countdown value, in milliseconds.
    pub timer_ms: f64,
    /// Sticky once the timer was seen expired or unreachable.
    pub failed: bool,
}

/// Handle to a spawned worker. Dropping it abandons the worker but also
/// closes the stop channel, which the worker treats as a stop request.
pub struct TaskHandle<S> {
    stop_tx: watch::Sender<bool>,
    state: Arc<RwLock<S>>,
    join: JoinHandle<Result<Outcome, EngineError>>,
}

impl<S: Clone> TaskHandle<S> {
    /// Ask the worker to stop. Observed at its next await point; a worker
    /// mid-session still runs the safe-state sequence before returning.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Clone of the worker's current published state.
    pub fn snapshot(&self) -> S {
        self.state.read().unwrap().clone()
    }

    /// Wait for the worker to end and return its outcome.
    pub async fn join(&mut self) -> Result<Outcome, EngineError> {
        (&mut self.join).await?
    }
}

/// Spawn a worker with its stop channel and shared state wired up.
pub(crate) fn spawn_worker<S, Fut>(
    initial: S,
    build: impl FnOnce(Arc<RwLock<S>>, watch::Receiver<bool>) -> Fut,
) -> TaskHandle<S>
where
    S: Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, EngineError>> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let state = Arc::new(RwLock::new(initial));
    let join = tokio::spawn(build(Arc::clone(&state), stop_rx));
    TaskHandle {
        stop_tx,
        state,
        join,
    }
}
