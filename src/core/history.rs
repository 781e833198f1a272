//! History ledger - Bounded journal of completed batches

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::entry::{ApplicationEntry, EntryId, TargetList};
use super::operation::OperationKind;

/// Default number of records kept
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// What an entry looked like when a batch completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSnapshot {
    pub entry_id: EntryId,
    pub name: String,
    pub targets: TargetList,
    pub exec_path: Option<PathBuf>,
    pub tracked_pids: BTreeSet<u32>,
}

impl From<&ApplicationEntry> for AppSnapshot {
    fn from(entry: &ApplicationEntry) -> Self {
        Self {
            entry_id: entry.id,
            name: entry.name.clone(),
            targets: entry.targets.clone(),
            exec_path: entry.exec_path.clone(),
            tracked_pids: entry.tracked_pids().clone(),
        }
    }
}

/// One completed batch
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Position in the ledger; renumbered on eviction, display only
    pub id: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub apps: Vec<AppSnapshot>,
    pub succeeded: usize,
    pub failed: usize,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, apps: Vec<AppSnapshot>, succeeded: usize, failed: usize) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            kind,
            apps,
            succeeded,
            failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLedger {
    records: VecDeque<OperationRecord>,
    max_size: usize,
}

impl HistoryLedger {
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Push a record, evicting the oldest if over the bound. Returns the id
    /// the record ends up with.
    pub fn append(&mut self, mut record: OperationRecord) -> usize {
        record.id = self.records.len();
        self.records.push_back(record);

        if self.records.len() > self.max_size {
            if let Some(evicted) = self.records.pop_front() {
                debug!("History full, evicting {} from {}", evicted.kind, evicted.timestamp);
            }
            self.renumber();
        }

        self.records.len() - 1
    }

    pub fn peek_last(&self) -> Option<&OperationRecord> {
        self.records.back()
    }

    pub fn pop_last(&mut self) -> Option<OperationRecord> {
        self.records.pop_back()
    }

    /// Oldest first
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &OperationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn renumber(&mut self) {
        for (id, record) in self.records.iter_mut().enumerate() {
            record.id = id;
        }
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(succeeded: usize) -> OperationRecord {
        OperationRecord::new(OperationKind::Kill, Vec::new(), succeeded, 0)
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let mut ledger = HistoryLedger::new(5);
        assert_eq!(ledger.append(record(0)), 0);
        assert_eq!(ledger.append(record(1)), 1);
        assert_eq!(ledger.peek_last().map(|r| r.succeeded), Some(1));
    }

    #[test]
    fn test_eviction_renumbers_contiguously() {
        let mut ledger = HistoryLedger::new(3);
        for n in 0..5 {
            ledger.append(record(n));
        }

        assert_eq!(ledger.len(), 3);
        let ids: Vec<_> = ledger.records().map(|r| r.id).collect();
        let order: Vec<_> = ledger.records().map(|r| r.succeeded).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn test_pop_last_removes_exactly_one() {
        let mut ledger = HistoryLedger::default();
        ledger.append(record(7));
        ledger.append(record(8));

        assert_eq!(ledger.pop_last().map(|r| r.succeeded), Some(8));
        assert_eq!(ledger.len(), 1);
        ledger.clear();
        assert!(ledger.pop_last().is_none());
    }

    #[test]
    fn test_snapshot_copies_tracked_pids() {
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe").with_exec_path("/opt/foo");
        entry.tracked_pids_mut().extend([3, 4]);

        let snapshot = AppSnapshot::from(&entry);
        entry.tracked_pids_mut().clear();

        assert_eq!(snapshot.entry_id, entry.id);
        assert_eq!(snapshot.tracked_pids, BTreeSet::from([3, 4]));
    }
}
