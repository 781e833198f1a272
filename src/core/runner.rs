//! Batch and undo workers - Run the sequencer on tokio and report over a channel

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::controllers::Controllers;
use super::registry::Workspace;
use super::sequencer::{BatchSummary, Sequencer, SequencerState, StepReport};
use super::undo::{undo, UndoReport};

const EVENT_BUFFER: usize = 64;

/// Timing of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Countdown tick length
    pub tick: Duration,
    /// Pause before each processing step
    pub step_delay: Duration,
}

impl Timing {
    pub fn new(step_delay_ms: u64) -> Self {
        Self {
            tick: Duration::from_secs(1),
            step_delay: Duration::from_millis(step_delay_ms),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(300)
    }
}

/// Progress reported by a running batch or undo.
///
/// The final event of every run hands the workspace back.
#[derive(Debug)]
pub enum RunnerEvent {
    CountdownTick(u32),
    Step(StepReport),
    BatchFinished {
        workspace: Workspace,
        sequencer: Sequencer,
        summary: BatchSummary,
    },
    Cancelled {
        workspace: Workspace,
        sequencer: Sequencer,
    },
    UndoFinished {
        workspace: Workspace,
        report: UndoReport,
    },
    /// The worker died; the workspace is lost if it was inside the failed task
    Aborted {
        reason: String,
        workspace: Option<Workspace>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Countdown,
    Cancelled,
    Processing,
}

/// Shared between a batch worker and its handle. Cancelling and leaving the
/// countdown take the same lock, so exactly one of them wins.
#[derive(Debug, Clone)]
struct CountdownGate {
    phase: Arc<Mutex<Phase>>,
    token: CancellationToken,
}

impl CountdownGate {
    fn new() -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Countdown)),
            token: CancellationToken::new(),
        }
    }

    fn with_phase<T>(&self, f: impl FnOnce(&mut Phase) -> T) -> T {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut phase)
    }

    /// Cancel if the countdown is still running
    fn cancel(&self) -> bool {
        self.with_phase(|phase| {
            if *phase != Phase::Countdown {
                return false;
            }
            *phase = Phase::Cancelled;
            self.token.cancel();
            true
        })
    }

    /// Enter processing. False if a cancel got in first.
    fn close(&self) -> bool {
        self.with_phase(|phase| {
            if *phase == Phase::Cancelled {
                return false;
            }
            *phase = Phase::Processing;
            true
        })
    }
}

/// Receiving end of a running batch or undo
pub struct OperationHandle {
    pub events: mpsc::Receiver<RunnerEvent>,
    gate: Option<CountdownGate>,
}

impl OperationHandle {
    /// Request cancellation. Refused once processing has started, and
    /// always refused for undo.
    pub fn cancel(&self) -> bool {
        self.gate.as_ref().map(CountdownGate::cancel).unwrap_or(false)
    }
}

/// Spawn a batch for a sequencer already in its countdown
pub fn spawn_batch(
    sequencer: Sequencer,
    workspace: Workspace,
    controllers: Arc<Controllers>,
    timing: Timing,
) -> OperationHandle {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let gate = CountdownGate::new();

    tokio::spawn(run_batch(
        sequencer,
        workspace,
        controllers,
        timing,
        gate.clone(),
        tx,
    ));

    OperationHandle {
        events: rx,
        gate: Some(gate),
    }
}

/// Spawn an undo of the workspace's last record
pub fn spawn_undo(workspace: Workspace, controllers: Arc<Controllers>) -> OperationHandle {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let event = match tokio::task::spawn_blocking(move || {
            let mut workspace = workspace;
            let report = undo(&mut workspace, &controllers);
            (workspace, report)
        })
        .await
        {
            Ok((workspace, report)) => RunnerEvent::UndoFinished { workspace, report },
            Err(e) => {
                error!("Undo worker failed: {}", e);
                RunnerEvent::Aborted {
                    reason: e.to_string(),
                    workspace: None,
                }
            }
        };
        send(&tx, event).await;
    });

    OperationHandle {
        events: rx,
        gate: None,
    }
}

async fn run_batch(
    mut sequencer: Sequencer,
    mut workspace: Workspace,
    controllers: Arc<Controllers>,
    timing: Timing,
    gate: CountdownGate,
    tx: mpsc::Sender<RunnerEvent>,
) {
    while let SequencerState::Countdown { remaining, .. } = sequencer.state() {
        if remaining > 0 {
            send(&tx, RunnerEvent::CountdownTick(remaining)).await;

            tokio::select! {
                _ = gate.token.cancelled() => {
                    cancelled(&tx, sequencer, workspace).await;
                    return;
                }
                _ = sleep(timing.tick) => {}
            }
        }

        // The last tick enters processing
        if remaining <= 1 && !gate.close() {
            cancelled(&tx, sequencer, workspace).await;
            return;
        }

        if let Err(e) = sequencer.tick(controllers.control()) {
            abort(&tx, e.to_string(), Some(workspace)).await;
            return;
        }
    }

    // Past this point the batch always runs to completion
    loop {
        sleep(timing.step_delay).await;

        let ctl = controllers.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = sequencer.step(&mut workspace, &ctl);
            (sequencer, workspace, result)
        })
        .await;

        let (seq, ws, result) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                abort(&tx, e.to_string(), None).await;
                return;
            }
        };
        sequencer = seq;
        workspace = ws;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                abort(&tx, e.to_string(), Some(workspace)).await;
                return;
            }
        };

        debug!("{} step {}/{} done", report.kind, report.index + 1, report.total);
        let finished = report.summary.clone();
        send(&tx, RunnerEvent::Step(report)).await;

        if let Some(summary) = finished {
            info!("{}", summary.completion_line());
            send(
                &tx,
                RunnerEvent::BatchFinished {
                    workspace,
                    sequencer,
                    summary,
                },
            )
            .await;
            return;
        }
    }
}

async fn cancelled(tx: &mpsc::Sender<RunnerEvent>, mut sequencer: Sequencer, workspace: Workspace) {
    if let Err(e) = sequencer.cancel() {
        error!("Cancel outside countdown: {}", e);
    }
    send(tx, RunnerEvent::Cancelled { workspace, sequencer }).await;
}

async fn abort(tx: &mpsc::Sender<RunnerEvent>, reason: String, workspace: Option<Workspace>) {
    error!("Batch aborted: {}", reason);
    send(tx, RunnerEvent::Aborted { reason, workspace }).await;
}

async fn send(tx: &mpsc::Sender<RunnerEvent>, event: RunnerEvent) {
    if tx.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}
