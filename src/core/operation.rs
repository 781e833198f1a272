//! Operation kinds and per-entry step outcomes

use serde::{Deserialize, Serialize};

use super::error::OperationError;

/// The four lifecycle actions the engine can apply to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Terminate every matching process
    Kill,
    /// Pause every matching process and track its id
    Suspend,
    /// Continue the processes tracked by a previous suspend
    Resume,
    /// Launch a fresh instance from the executable path
    Restore,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Kill => "KILL",
            Self::Suspend => "SUSPEND",
            Self::Resume => "RESUME",
            Self::Restore => "RESTORE",
        }
    }

    /// Kill and suspend are gated by the exclusion list
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Kill | Self::Suspend)
    }

    /// The action that logically reverses this one
    pub fn inverse(&self) -> Self {
        match self {
            Self::Kill => Self::Restore,
            Self::Suspend => Self::Resume,
            Self::Resume => Self::Suspend,
            Self::Restore => Self::Kill,
        }
    }

    pub fn all() -> &'static [OperationKind] {
        &[Self::Kill, Self::Suspend, Self::Resume, Self::Restore]
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What happened to one entry during one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Entry was not selected; nothing was called
    Unselected,
    /// Exclusion list blocked the action; nothing was called
    Protected,
    Terminated { count: usize },
    Suspended { count: usize },
    /// At least one tracked id was resumed; `invalid` ids were discarded
    Resumed { resumed: usize, invalid: usize },
    Launched { pid: u32 },
    /// Restore without a recorded executable path
    NoExecutable,
    Failed(OperationError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Terminated { .. }
                | Self::Suspended { .. }
                | Self::Resumed { .. }
                | Self::Launched { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One operator-facing log line: kind, entry name, outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: OperationKind,
    pub name: String,
    pub outcome: StepOutcome,
}

impl LogLine {
    pub fn new(kind: OperationKind, name: impl Into<String>, outcome: StepOutcome) -> Self {
        Self {
            kind,
            name: name.into(),
            outcome,
        }
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = &self.name;
        match &self.outcome {
            StepOutcome::Unselected => write!(f, "[SKIP] {}", name),
            StepOutcome::Protected => write!(f, "[PROTECTED] {} cannot be modified", name),
            StepOutcome::Terminated { .. } => write!(f, "[KILL] Terminated {}", name),
            StepOutcome::Suspended { .. } => write!(f, "[SUSP] Suspended {}", name),
            StepOutcome::Resumed {
                resumed,
                invalid: 0,
            } if *resumed <= 1 => write!(f, "[RESM] Resumed {}", name),
            StepOutcome::Resumed {
                resumed,
                invalid: 0,
            } => write!(f, "[RESM] Resumed {} ({} processes)", name, resumed),
            StepOutcome::Resumed { resumed, invalid } => write!(
                f,
                "[RESM] Resumed {} ({})",
                name,
                OperationError::PartialFailure {
                    resumed: *resumed,
                    invalid: *invalid,
                }
            ),
            StepOutcome::Launched { .. } => write!(f, "[REST] Launched {}", name),
            StepOutcome::NoExecutable => write!(f, "[SKIP] {}: no executable path", name),
            StepOutcome::Failed(err) => write!(f, "[ERR]  {}: {}", name, err),
        }
    }
}
