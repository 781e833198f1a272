//! Operation sequencer - Drives one kind across the registry, one entry per step

use thiserror::Error;
use tracing::{debug, info};

use super::controllers::Controllers;
use super::history::{AppSnapshot, OperationRecord};
use super::operation::{LogLine, OperationKind, StepOutcome};
use super::process::ProcessControl;
use super::registry::Workspace;

/// Sequencer misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("an operation is already in progress")]
    Busy,
    #[error("no countdown is running")]
    NotCountingDown,
    #[error("no batch is processing")]
    NotProcessing,
    #[error("no finished batch to acknowledge")]
    NotDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    /// Ticks left before processing starts
    Countdown { kind: OperationKind, remaining: u32 },
    /// Next entry to process
    Processing { kind: OperationKind, index: usize },
    /// Finished; waiting for the operator to acknowledge
    Done { kind: OperationKind },
}

/// What a finished batch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub kind: OperationKind,
    pub succeeded: usize,
    pub failed: usize,
    /// Ledger id of the appended record
    pub record_id: usize,
    /// Kill only; `None` when usage went up during the batch
    pub reclaimed_mb: Option<u64>,
}

impl BatchSummary {
    pub fn completion_line(&self) -> String {
        match (self.kind, self.reclaimed_mb) {
            (OperationKind::Kill, Some(mb)) => format!("RAM Reclaimed: {} MB", mb),
            (OperationKind::Kill, None) => "Cleanup complete".to_string(),
            (kind, _) => format!(
                "{} complete: {} succeeded, {} failed",
                kind, self.succeeded, self.failed
            ),
        }
    }
}

/// Result of one processing step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub kind: OperationKind,
    pub index: usize,
    pub total: usize,
    /// Fraction of entries processed, in [0, 1]
    pub progress: f32,
    /// `None` only when the registry was empty
    pub line: Option<LogLine>,
    /// Set on the step that finished the batch
    pub summary: Option<BatchSummary>,
}

/// Explicit state machine for one batch.
///
/// `begin` enters the countdown, `tick` counts it down, `step` processes one
/// entry. Timing lives with the caller; the sequencer only reacts to events.
#[derive(Debug, Clone)]
pub struct Sequencer {
    state: SequencerState,
    countdown_ticks: u32,
    log: Vec<String>,
    progress: f32,
    baseline_ram_mb: u64,
    succeeded: usize,
    failed: usize,
}

impl Sequencer {
    pub fn new(countdown_ticks: u32) -> Self {
        Self {
            state: SequencerState::Idle,
            countdown_ticks,
            log: Vec::new(),
            progress: 0.0,
            baseline_ram_mb: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SequencerState::Idle
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Start the countdown for `kind`
    pub fn begin(&mut self, kind: OperationKind) -> Result<(), SequencerError> {
        if !self.is_idle() {
            return Err(SequencerError::Busy);
        }

        info!("Starting {} countdown ({} ticks)", kind, self.countdown_ticks);
        self.state = SequencerState::Countdown {
            kind,
            remaining: self.countdown_ticks,
        };
        Ok(())
    }

    /// One countdown tick. Reaching zero snapshots the RAM baseline and
    /// enters processing at the first entry.
    pub fn tick(&mut self, control: &dyn ProcessControl) -> Result<(), SequencerError> {
        let SequencerState::Countdown { kind, remaining } = self.state else {
            return Err(SequencerError::NotCountingDown);
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = SequencerState::Countdown { kind, remaining };
            return Ok(());
        }

        self.baseline_ram_mb = control.used_memory_mb();
        self.progress = 0.0;
        self.succeeded = 0;
        self.failed = 0;
        debug!("Baseline RAM {} MB", self.baseline_ram_mb);
        info!("Processing {}", kind);
        self.state = SequencerState::Processing { kind, index: 0 };
        Ok(())
    }

    /// Abort the countdown. Nothing has been touched yet.
    pub fn cancel(&mut self) -> Result<(), SequencerError> {
        let SequencerState::Countdown { kind, .. } = self.state else {
            return Err(SequencerError::NotCountingDown);
        };

        info!("{} cancelled during countdown", kind);
        self.state = SequencerState::Idle;
        self.log.clear();
        Ok(())
    }

    /// Process the current entry and advance, finalizing after the last one
    pub fn step(
        &mut self,
        workspace: &mut Workspace,
        controllers: &Controllers,
    ) -> Result<StepReport, SequencerError> {
        let SequencerState::Processing { kind, index } = self.state else {
            return Err(SequencerError::NotProcessing);
        };

        let total = workspace.registry.len();
        let line = match workspace.registry.get_mut(index) {
            Some(entry) => {
                let outcome = if entry.selected {
                    controllers.execute(kind, entry)
                } else {
                    StepOutcome::Unselected
                };

                if outcome.is_success() {
                    self.succeeded += 1;
                } else if outcome.is_failure() {
                    self.failed += 1;
                }

                let line = LogLine::new(kind, entry.name.clone(), outcome);
                self.log.push(line.to_string());
                Some(line)
            }
            None => None,
        };

        let next = index + 1;
        let summary = if next >= total {
            self.progress = 1.0;
            Some(self.finalize(kind, workspace, controllers))
        } else {
            self.progress = next as f32 / total as f32;
            self.state = SequencerState::Processing { kind, index: next };
            None
        };

        Ok(StepReport {
            kind,
            index,
            total,
            progress: self.progress,
            line,
            summary,
        })
    }

    /// Leave `Done`, clearing the log
    pub fn acknowledge(&mut self) -> Result<(), SequencerError> {
        if !matches!(self.state, SequencerState::Done { .. }) {
            return Err(SequencerError::NotDone);
        }

        self.state = SequencerState::Idle;
        self.log.clear();
        self.progress = 0.0;
        Ok(())
    }

    fn finalize(
        &mut self,
        kind: OperationKind,
        workspace: &mut Workspace,
        controllers: &Controllers,
    ) -> BatchSummary {
        let apps: Vec<AppSnapshot> = workspace
            .registry
            .selected()
            .map(AppSnapshot::from)
            .collect();
        let record = OperationRecord::new(kind, apps, self.succeeded, self.failed);
        let record_id = workspace.ledger.append(record);

        let reclaimed_mb = match kind {
            OperationKind::Kill => self
                .baseline_ram_mb
                .checked_sub(controllers.control().used_memory_mb()),
            _ => None,
        };

        let summary = BatchSummary {
            kind,
            succeeded: self.succeeded,
            failed: self.failed,
            record_id,
            reclaimed_mb,
        };
        self.log.push(summary.completion_line());
        info!(
            "{} finished: {} succeeded, {} failed",
            kind, summary.succeeded, summary.failed
        );

        self.state = SequencerState::Done { kind };
        summary
    }
}
