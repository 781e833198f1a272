//! Protection guard - Refuses destructive actions against excluded process names

use std::collections::HashSet;

use super::entry::TargetList;
use super::error::OperationError;
use super::operation::OperationKind;

/// Exclusion list, matched exactly and case-insensitively. Names are
/// literal; there is no pattern syntax.
#[derive(Debug, Clone, Default)]
pub struct ProtectionGuard {
    excluded: HashSet<String>,
}

impl ProtectionGuard {
    pub fn new<I, S>(exclusion_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: exclusion_list
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// True if any of `targets` is on the exclusion list
    pub fn is_protected(&self, targets: &TargetList) -> bool {
        targets
            .iter()
            .any(|t| self.excluded.contains(&t.to_lowercase()))
    }

    /// `Protected` if a destructive `kind` would touch an excluded name
    pub fn check(&self, kind: OperationKind, targets: &TargetList) -> Result<(), OperationError> {
        if kind.is_destructive() && self.is_protected(targets) {
            return Err(OperationError::Protected);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }
}
