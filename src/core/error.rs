//! Error types for lifecycle operations

use thiserror::Error;

/// Why a single entry's step did not fully succeed.
///
/// These never abort a batch; the sequencer records them in the log line and
/// moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// No live process matched the entry's targets
    #[error("no matching processes found")]
    NotFound,

    /// The exclusion list blocked a destructive action
    #[error("protected by exclusion list")]
    Protected,

    /// Some tracked ids were resumed, others had gone stale
    #[error("resumed {resumed}, {invalid} process ids no longer valid")]
    PartialFailure { resumed: usize, invalid: usize },

    /// A privileged OS call failed; carries the raw OS text
    #[error("{0}")]
    Os(String),

    /// Every tracked id had exited or been reassigned
    #[error("{count} tracked process ids no longer valid")]
    StaleReference { count: usize },

    /// Launching a new instance failed
    #[error("failed to launch: {0}")]
    Spawn(String),
}

impl OperationError {
    pub fn os(err: impl std::fmt::Display) -> Self {
        Self::Os(err.to_string())
    }
}
