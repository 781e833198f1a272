//! Undo engine - Reverses the most recent batch from its stored snapshot

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::controllers::Controllers;
use super::history::AppSnapshot;
use super::operation::{LogLine, OperationKind, StepOutcome};
use super::registry::Workspace;

/// Result of one undo pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoReport {
    /// Kind of the batch that was undone, `None` if the ledger was empty
    pub undone: Option<OperationKind>,
    pub lines: Vec<LogLine>,
    pub succeeded: usize,
    pub failed: usize,
}

impl UndoReport {
    pub fn summary(&self) -> String {
        match self.undone {
            None => "Nothing to undo".to_string(),
            Some(_) => format!(
                "Undo complete: {} succeeded, {} failed",
                self.succeeded, self.failed
            ),
        }
    }
}

/// Apply the inverse of the last ledger record, then pop it.
///
/// Runs against the snapshot taken when the batch completed, not the live
/// registry. Tracked-id changes are written back to the live entry with the
/// same id when it still exists. The record is popped whatever the outcome.
pub fn undo(workspace: &mut Workspace, controllers: &Controllers) -> UndoReport {
    let Some(record) = workspace.ledger.peek_last().cloned() else {
        info!("Undo requested with empty history");
        return UndoReport::default();
    };

    let inverse = record.kind.inverse();
    info!(
        "Undoing {} of {} apps with {}",
        record.kind,
        record.apps.len(),
        inverse
    );

    let mut report = UndoReport {
        undone: Some(record.kind),
        ..Default::default()
    };

    for snapshot in &record.apps {
        let outcome = invert(inverse, snapshot, workspace, controllers);
        if outcome.is_success() {
            report.succeeded += 1;
        } else if outcome.is_failure() {
            report.failed += 1;
        }
        report
            .lines
            .push(LogLine::new(inverse, snapshot.name.clone(), outcome));
    }

    workspace.ledger.pop_last();
    info!("{}", report.summary());
    report
}

fn invert(
    inverse: OperationKind,
    snapshot: &AppSnapshot,
    workspace: &mut Workspace,
    controllers: &Controllers,
) -> StepOutcome {
    if let Err(e) = controllers.guard().check(inverse, &snapshot.targets) {
        warn!("Undo {} blocked for '{}': {}", inverse, snapshot.name, e);
        return StepOutcome::Protected;
    }

    let live = workspace.registry.find_mut(snapshot.entry_id);
    if live.is_none() {
        warn!("'{}' no longer in registry; undo will not track its ids", snapshot.name);
    }

    match inverse {
        OperationKind::Restore => match controllers.restore(snapshot.exec_path.as_deref()) {
            Ok(Some(pid)) => StepOutcome::Launched { pid },
            Ok(None) => StepOutcome::NoExecutable,
            Err(e) => StepOutcome::Failed(e),
        },
        OperationKind::Resume => {
            let mut remaining = snapshot.tracked_pids.clone();
            let report = controllers.resume(&mut remaining, snapshot.exec_path.as_deref());

            // Resumed and stale ids leave the live set; failed ones stay
            if let Some(entry) = live {
                let settled: BTreeSet<u32> =
                    snapshot.tracked_pids.difference(&remaining).copied().collect();
                entry.tracked_pids_mut().retain(|pid| !settled.contains(pid));
            }
            report.into_outcome()
        }
        OperationKind::Suspend => {
            let mut paused = BTreeSet::new();
            let result = controllers.suspend(&snapshot.targets, &mut paused);
            if let Some(entry) = live {
                entry.tracked_pids_mut().extend(paused);
            }
            match result {
                Ok(count) => StepOutcome::Suspended { count },
                Err(e) => StepOutcome::Failed(e),
            }
        }
        OperationKind::Kill => match controllers.kill(&snapshot.targets) {
            Ok(count) => StepOutcome::Terminated { count },
            Err(e) => StepOutcome::Failed(e),
        },
    }
}
